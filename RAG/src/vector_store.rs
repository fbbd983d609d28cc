use crate::config::Config;
use crate::models::*;
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;

const API_VERSION: &str = "2024-07";
const UPSERT_BATCH_SIZE: usize = 100;

/// Id of the vector holding `category` of entity `entity`.
pub fn vector_id(entity: usize, category: &str) -> String {
    format!("medicine_{}_{}", entity, category)
}

/// Data-plane client for a single Pinecone index.
pub struct PineconeService {
    client: Client,
    api_key: String,
    host: String,
    namespace: Option<String>,
}

impl PineconeService {
    pub fn new(config: &Config) -> Result<Self> {
        log::info!(
            "Using Pinecone index '{}' at {}",
            config.pinecone_index,
            config.pinecone_host
        );

        Ok(Self {
            client: Client::new(),
            api_key: config.pinecone_api_key.clone(),
            host: config.pinecone_host.clone(),
            namespace: config.pinecone_namespace.clone(),
        })
    }

    /// Upserts `records` in batches and returns how many Pinecone reports as written.
    pub async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        let mut upserted = 0;

        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let request = UpsertRequest {
                vectors: batch,
                namespace: self.namespace.as_deref(),
            };
            let response: UpsertResponse = self
                .post("vectors/upsert", &request)
                .await?
                .json()
                .await
                .context("invalid upsert response")?;

            log::debug!("Upserted {} vectors", response.upserted_count);
            upserted += response.upserted_count;
        }

        Ok(upserted)
    }

    /// Nearest neighbours of `vector` among the vectors of one category.
    pub async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        category: &str,
    ) -> Result<Vec<VectorMatch>> {
        let request = PineconeQueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
            filter: json!({ "category": { "$eq": category } }),
            namespace: self.namespace.as_deref(),
        };

        let response: PineconeQueryResponse = self
            .post("query", &request)
            .await?
            .json()
            .await
            .context("invalid query response")?;

        let matches: Vec<VectorMatch> = response
            .matches
            .into_iter()
            .filter_map(|m| match m.metadata {
                Some(metadata) => Some(VectorMatch {
                    id: m.id,
                    score: m.score,
                    metadata,
                }),
                None => {
                    log::warn!("Skipping match {} without metadata", m.id);
                    None
                }
            })
            .collect();

        log::debug!("Category '{}' returned {} matches", category, matches.len());
        Ok(matches)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.host, path);
        let response = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Pinecone API error ({}): {}", status, error_text));
        }

        Ok(response)
    }
}
