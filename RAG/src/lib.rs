pub mod categories;
pub mod config;
pub mod dataset;
pub mod embedding_service;
pub mod ingest_service;
pub mod models;
pub mod openai_service;
pub mod query_service;
pub mod utils;
pub mod vector_store;

pub use categories::{Category, CategorySet, ExtractedCategories};
pub use config::Config;
pub use dataset::{DatasetProcessor, MEDICINE_COLUMNS};
pub use embedding_service::EmbeddingService;
pub use ingest_service::IngestService;
pub use models::*;
pub use openai_service::OpenAiService;
pub use query_service::{QueryService, ScoreBoard};
pub use vector_store::PineconeService;

use anyhow::Result;
use std::sync::Arc;

/// The wired-up pipeline shared by the CLI and the HTTP server.
pub struct RagLibrary {
    pub openai: Arc<OpenAiService>,
    pub ingest_service: Arc<IngestService>,
    pub query_service: Arc<QueryService>,
}

impl RagLibrary {
    pub fn new(config: &Config) -> Result<Self> {
        log::info!("Initializing RAG Library...");

        let categories = CategorySet::medicine();
        let openai = Arc::new(OpenAiService::new(config)?);
        let embedding_service = Arc::new(EmbeddingService::new(openai.clone())?);
        let pinecone = Arc::new(PineconeService::new(config)?);

        let ingest_service = Arc::new(IngestService::new(
            categories.clone(),
            openai.clone(),
            embedding_service.clone(),
            pinecone.clone(),
        ));
        let query_service = Arc::new(QueryService::new(
            categories,
            openai.clone(),
            embedding_service,
            pinecone,
            config.top_k,
            config.max_candidates,
        ));

        log::info!("RAG Library initialized successfully!");
        Ok(Self {
            openai,
            ingest_service,
            query_service,
        })
    }
}
