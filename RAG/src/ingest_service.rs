use crate::categories::CategorySet;
use crate::dataset::{DatasetProcessor, MEDICINE_COLUMNS};
use crate::embedding_service::EmbeddingService;
use crate::models::*;
use crate::openai_service::OpenAiService;
use crate::utils::excerpt;
use crate::vector_store::{vector_id, PineconeService};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub struct IngestService {
    categories: CategorySet,
    dataset: DatasetProcessor,
    openai: Arc<OpenAiService>,
    embedding_service: Arc<EmbeddingService>,
    pinecone: Arc<PineconeService>,
}

impl IngestService {
    pub fn new(
        categories: CategorySet,
        openai: Arc<OpenAiService>,
        embedding_service: Arc<EmbeddingService>,
        pinecone: Arc<PineconeService>,
    ) -> Self {
        Self {
            categories,
            dataset: DatasetProcessor::new(),
            openai,
            embedding_service,
            pinecone,
        }
    }

    /// Extracts, embeds and stores every record of the CSV at `csv_path`.
    ///
    /// Records are processed one after another; the first failure aborts the run.
    pub async fn generate_embeddings(&self, csv_path: &Path) -> Result<IngestReport> {
        let run_id = Uuid::new_v4();
        let start_time = std::time::Instant::now();
        log::info!("Ingest run {} started for {}", run_id, csv_path.display());

        let records = self.dataset.parse_csv(csv_path, &MEDICINE_COLUMNS)?;
        let mut vectors = 0;

        for (entity, med) in records.iter().enumerate() {
            let stored = self
                .store_record(entity, med)
                .await
                .with_context(|| format!("failed to ingest record {}", entity))?;
            vectors += stored;
            log::info!(
                "Stored record {}/{} ({} vectors): {}",
                entity + 1,
                records.len(),
                stored,
                excerpt(med, 60)
            );
        }

        let report = IngestReport {
            run_id,
            records: records.len(),
            vectors,
            elapsed_ms: start_time.elapsed().as_millis(),
        };
        log::info!(
            "Embeddings generated and stored in Pinecone: {} records, {} vectors in {} ms",
            report.records,
            report.vectors,
            report.elapsed_ms
        );
        Ok(report)
    }

    async fn store_record(&self, entity: usize, med: &str) -> Result<usize> {
        let extracted = self.openai.extract_categories(med, &self.categories).await?;
        if extracted.is_empty() {
            log::warn!("Record {} produced no categories", entity);
            return Ok(0);
        }

        let embeddings = self.embedding_service.embed_categories(&extracted).await?;
        let records: Vec<VectorRecord> = embeddings
            .into_iter()
            .map(|(category, values)| VectorRecord {
                id: vector_id(entity, &category),
                values,
                metadata: VectorMetadata {
                    id: entity,
                    med: med.to_string(),
                    category,
                },
            })
            .collect();

        let upserted = self.pinecone.upsert(&records).await?;
        if upserted != records.len() {
            log::warn!(
                "Pinecone upserted {} of {} vectors for record {}",
                upserted,
                records.len(),
                entity
            );
        }
        Ok(upserted)
    }
}
