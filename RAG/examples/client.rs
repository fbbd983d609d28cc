use reqwest::Client;
use serde_json::json;

// Exercises a running medichat_api server: health, query and a streamed chat reply.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    let base_url = std::env::var("MEDICHAT_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
    let token = std::env::var("API_TOKEN").ok();

    println!("Health Check:");
    let health_response = client.get(format!("{}/health", base_url)).send().await?;
    println!("Status: {}", health_response.status());
    let health_json: serde_json::Value = health_response.json().await?;
    println!("Response: {}", serde_json::to_string_pretty(&health_json)?);

    println!("\nQuery:");
    let mut request = client
        .post(format!("{}/query", base_url))
        .json(&json!({ "queryText": "Which medicines treat bacterial infections without causing diarrhea?" }));
    if let Some(token) = &token {
        request = request.bearer_auth(token);
    }
    let query_response = request.send().await?;
    println!("Status: {}", query_response.status());
    println!("Response: {}", query_response.text().await?);

    println!("\nChat:");
    let chat_response = client
        .post(format!("{}/chat", base_url))
        .json(&json!({ "message": "What should I do about a mild headache?" }))
        .send()
        .await?;
    println!("Status: {}", chat_response.status());
    println!("{}", chat_response.text().await?);

    Ok(())
}
