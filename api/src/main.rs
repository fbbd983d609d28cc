mod app;
mod auth;
mod chat;
mod query_payload;

use app::{build_router, AppState};
use medicine_rag::Config;

#[tokio::main]
async fn main() {
    // Initialize environment variables and logging
    dotenv::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    log::debug!("{:?}", config);

    let bind_addr = config.bind_addr.clone();
    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            log::error!("Failed to initialize RAG system: {:#}", e);
            std::process::exit(1);
        }
    };
    if state.config.api_token.is_none() {
        log::warn!("API_TOKEN not set, ingestion and query routes are open");
    }

    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Failed to bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    log::info!("Listening on {}", bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        log::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
