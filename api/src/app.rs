use crate::auth::require_token;
use crate::chat::chat;
use crate::query_payload::{JsonOrForm, QueryPayload};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use medicine_rag::{Config, ErrorResponse, RagLibrary};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

#[derive(Clone)]
pub struct AppState {
    pub library: Arc<RagLibrary>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let library = RagLibrary::new(&config)?;
        Ok(Self {
            library: Arc::new(library),
            config: Arc::new(config),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let public_dir = state.config.public_dir.clone();

    let protected = Router::new()
        .route("/generate-embeddings", post(generate_embeddings))
        .route("/query", post(query))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .merge(protected)
        .route_service("/", ServeFile::new(public_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(public_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            status: "error".to_string(),
            error: message.to_string(),
        }),
    )
        .into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn generate_embeddings(State(state): State<AppState>) -> Response {
    match state
        .library
        .ingest_service
        .generate_embeddings(&state.config.dataset_path)
        .await
    {
        Ok(report) => {
            log::info!(
                "Ingest run {} stored {} vectors for {} records",
                report.run_id,
                report.vectors,
                report.records
            );
            "Embeddings generated and stored in Pinecone.".into_response()
        }
        Err(e) => {
            log::error!("Error generating embeddings: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error generating embeddings.",
            )
                .into_response()
        }
    }
}

async fn query(
    State(state): State<AppState>,
    JsonOrForm(payload): JsonOrForm<QueryPayload>,
) -> Response {
    let query_text = payload.query_text.trim();
    if query_text.is_empty() {
        return bad_request("queryText must not be empty");
    }

    match state.library.query_service.query(query_text).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            log::error!("Error querying Pinecone: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error querying Pinecone.").into_response()
        }
    }
}
