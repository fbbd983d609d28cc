use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---- OpenAI chat completions ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    pub choices: Vec<ChatChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChunkChoice {
    pub delta: ChatDelta,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatDelta {
    pub content: Option<String>,
}

// ---- OpenAI embeddings ----

#[derive(Debug, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingData {
    pub index: usize,
    pub embedding: Vec<f32>,
}

// ---- Pinecone ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    #[serde(deserialize_with = "entity_id_from_number")]
    pub id: usize,
    pub med: String,
    pub category: String,
}

// Pinecone hands numeric metadata back as floats ("id": 3.0).
fn entity_id_from_number<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value < 0.0 || value.fract() != 0.0 {
        return Err(serde::de::Error::custom(format!(
            "invalid entity id: {}",
            value
        )));
    }
    Ok(value as usize)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

#[derive(Debug, Serialize)]
pub struct UpsertRequest<'a> {
    pub vectors: &'a [VectorRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertResponse {
    #[serde(default)]
    pub upserted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PineconeQueryRequest<'a> {
    pub vector: &'a [f32],
    pub top_k: usize,
    pub include_metadata: bool,
    pub include_values: bool,
    pub filter: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct PineconeQueryResponse {
    #[serde(default)]
    pub matches: Vec<PineconeMatch>,
}

#[derive(Debug, Deserialize)]
pub struct PineconeMatch {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    pub metadata: Option<VectorMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

// ---- Service level ----

/// A record handed to the re-rank prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMatch {
    pub id: usize,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(rename = "queryText")]
    pub query_text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    pub query: String,
    pub matches: Vec<RankedMatch>,
    pub processing_time_ms: u128,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestReport {
    pub run_id: uuid::Uuid,
    pub records: usize,
    pub vectors: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}
