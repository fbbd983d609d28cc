use crate::categories::ExtractedCategories;
use crate::openai_service::OpenAiService;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Input limit of the OpenAI embedding models.
pub const MAX_EMBEDDING_TOKENS: usize = 8191;

pub struct EmbeddingService {
    openai: Arc<OpenAiService>,
    tokenizer: CoreBPE,
    max_tokens: usize,
}

impl EmbeddingService {
    pub fn new(openai: Arc<OpenAiService>) -> Result<Self> {
        log::info!("Initializing embedding service...");

        Ok(Self {
            openai,
            tokenizer: tiktoken_rs::cl100k_base()?,
            max_tokens: MAX_EMBEDDING_TOKENS,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// One embedding per extracted category, in category order.
    pub async fn embed_categories(
        &self,
        categories: &ExtractedCategories,
    ) -> Result<Vec<(String, Vec<f32>)>> {
        let keys: Vec<String> = categories.iter().map(|(k, _)| k.to_string()).collect();
        let texts: Vec<String> = categories.iter().map(|(_, t)| t.to_string()).collect();

        let embeddings = self.embed_texts(&texts).await?;
        Ok(keys.into_iter().zip(embeddings).collect())
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| anyhow!("no embedding returned for query"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs = texts
            .iter()
            .map(|t| self.truncate(t))
            .collect::<Result<Vec<_>>>()?;

        let embeddings = self.openai.embed(&inputs).await?;
        if embeddings.len() != inputs.len() {
            return Err(anyhow!(
                "expected {} embeddings, got {}",
                inputs.len(),
                embeddings.len()
            ));
        }
        Ok(embeddings)
    }

    /// Cuts `text` to at most `max_tokens` tokens.
    ///
    /// Multibyte characters can span several byte-level tokens, so the cut backs
    /// off until the kept tokens decode to whole characters.
    fn truncate(&self, text: &str) -> Result<String> {
        let tokens = self.tokenizer.encode_ordinary(text);
        if tokens.len() <= self.max_tokens {
            return Ok(text.to_string());
        }

        log::warn!(
            "Truncating embedding input from {} to {} tokens",
            tokens.len(),
            self.max_tokens
        );
        (0..=self.max_tokens)
            .rev()
            .find_map(|end| self.tokenizer.decode(tokens[..end].to_vec()).ok())
            .ok_or_else(|| anyhow!("failed to truncate embedding input"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(base_url: &str) -> EmbeddingService {
        let config = Config::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "OPENAI_BASE_URL" => Some(base_url.to_string()),
            "PINECONE_API_KEY" => Some("pc-test".to_string()),
            "PINECONE_HOST" => Some("http://localhost:1".to_string()),
            _ => None,
        })
        .unwrap();
        let openai = Arc::new(OpenAiService::new(&config).unwrap());
        EmbeddingService::new(openai).unwrap()
    }

    #[test]
    fn truncate_limits_token_count() {
        let service = service("http://localhost:1").with_max_tokens(5);
        let long = "headache nausea dizziness rash vomiting fatigue insomnia";
        let truncated = service.truncate(long).unwrap();

        assert!(long.starts_with(&truncated));
        assert!(service.tokenizer.encode_ordinary(&truncated).len() <= 5);
        assert!(truncated.len() < long.len());
        assert_eq!(service.truncate("rash").unwrap(), "rash");
    }

    #[test]
    fn truncate_keeps_multibyte_characters_whole() {
        let text = "頭痛と吐き気 👍🏽 めまい 😵‍💫";
        let mut service = service("http://localhost:1");
        for max_tokens in 1..12 {
            service.max_tokens = max_tokens;
            let truncated = service.truncate(text).unwrap();
            assert!(
                text.starts_with(&truncated),
                "{:?} is not a prefix at {} tokens",
                truncated,
                max_tokens
            );
        }
    }

    #[tokio::test]
    async fn embeds_categories_in_one_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(json!({ "input": ["Nausea", "Fever"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "index": 0, "embedding": [0.1, 0.2] },
                    { "index": 1, "embedding": [0.3, 0.4] }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let categories =
            ExtractedCategories::from_pairs([("sideEffects", "Nausea"), ("uses", "Fever")]);
        let embedded = service(&server.uri())
            .embed_categories(&categories)
            .await
            .unwrap();

        assert_eq!(
            embedded,
            vec![
                ("sideEffects".to_string(), vec![0.1, 0.2]),
                ("uses".to_string(), vec![0.3, 0.4]),
            ]
        );
    }

    #[tokio::test]
    async fn rejects_short_embedding_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "index": 0, "embedding": [0.1] }]
            })))
            .mount(&server)
            .await;

        let categories =
            ExtractedCategories::from_pairs([("sideEffects", "Nausea"), ("uses", "Fever")]);
        let err = service(&server.uri())
            .embed_categories(&categories)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 2 embeddings"));
    }
}
