use crate::categories::CategorySet;
use crate::embedding_service::EmbeddingService;
use crate::models::*;
use crate::openai_service::OpenAiService;
use crate::vector_store::PineconeService;
use anyhow::Result;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct EntityScore {
    pub id: usize,
    pub text: String,
    pub total: f32,
    pub hits: usize,
}

/// Accumulates similarity scores per entity across category searches.
#[derive(Debug, Default)]
pub struct ScoreBoard {
    entities: HashMap<usize, EntityScore>,
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hit: &VectorMatch) {
        let entry = self
            .entities
            .entry(hit.metadata.id)
            .or_insert_with(|| EntityScore {
                id: hit.metadata.id,
                text: hit.metadata.med.clone(),
                total: 0.0,
                hits: 0,
            });
        entry.total += hit.score;
        entry.hits += 1;
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Highest total first; equal totals keep the lower entity id first.
    pub fn top(&self, limit: usize) -> Vec<EntityScore> {
        let mut ranked: Vec<EntityScore> = self.entities.values().cloned().collect();
        ranked.sort_by(|a, b| {
            b.total
                .partial_cmp(&a.total)
                .unwrap_or(Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        ranked.truncate(limit);
        ranked
    }
}

pub struct QueryService {
    categories: CategorySet,
    openai: Arc<OpenAiService>,
    embedding_service: Arc<EmbeddingService>,
    pinecone: Arc<PineconeService>,
    top_k: usize,
    max_candidates: usize,
}

impl QueryService {
    pub fn new(
        categories: CategorySet,
        openai: Arc<OpenAiService>,
        embedding_service: Arc<EmbeddingService>,
        pinecone: Arc<PineconeService>,
        top_k: usize,
        max_candidates: usize,
    ) -> Self {
        Self {
            categories,
            openai,
            embedding_service,
            pinecone,
            top_k,
            max_candidates,
        }
    }

    pub async fn query(&self, query: &str) -> Result<QueryResponse> {
        let start_time = std::time::Instant::now();

        let searches = self.category_embeddings(query).await?;

        let mut board = ScoreBoard::new();
        for (category, embedding) in &searches {
            let matches = self.pinecone.query(embedding, self.top_k, category).await?;
            for hit in &matches {
                board.add(hit);
            }
        }
        log::info!("Found {} candidate medicines", board.len());

        let top = board.top(self.max_candidates);
        let matches = if top.is_empty() {
            Vec::new()
        } else {
            let candidates: Vec<Candidate> = top
                .iter()
                .map(|e| Candidate {
                    id: e.id,
                    text: e.text.clone(),
                })
                .collect();
            let ranked = self.openai.rank_candidates(query, &candidates).await?;
            attach_scores(ranked, &top)
        };

        Ok(QueryResponse {
            status: "success".to_string(),
            query: query.to_string(),
            matches,
            processing_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Category searches for `query`: its extracted categories, or the raw text
    /// under every category when extraction yields nothing.
    async fn category_embeddings(&self, query: &str) -> Result<Vec<(String, Vec<f32>)>> {
        let extracted = self.openai.extract_categories(query, &self.categories).await?;
        if !extracted.is_empty() {
            return self.embedding_service.embed_categories(&extracted).await;
        }

        log::info!("No categories extracted from query, searching raw text");
        let embedding = self.embedding_service.embed_query(query).await?;
        Ok(self
            .categories
            .iter()
            .map(|c| (c.key.clone(), embedding.clone()))
            .collect())
    }
}

fn attach_scores(ranked: Vec<Candidate>, scores: &[EntityScore]) -> Vec<RankedMatch> {
    ranked
        .into_iter()
        .map(|candidate| {
            let score = scores
                .iter()
                .find(|s| s.id == candidate.id)
                .map(|s| s.total)
                .unwrap_or(0.0);
            RankedMatch {
                id: candidate.id,
                text: candidate.text,
                score,
            }
        })
        .collect()
}
