//! Rutas HTTP de la base de conocimiento.

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    app_state::KnowledgeState,
    config::ChunkingConfig,
    error::{ApiError, ApiResult},
    models::{ChunkView, DocumentInfo, SearchResult},
};

pub const UPLOAD_FIELD: &str = "file";

/// Tamaño máximo de una subida (axum limita a 2 MB por defecto).
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

// --- Payloads ---

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    query: String,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ChunksQuery {
    filename: Option<String>,
}

// --- Router ---

pub fn create_router(state: KnowledgeState) -> Router {
    Router::new()
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/search", get(search_handler))
        .route("/document/:filename", delete(delete_handler))
        .route("/documents", get(documents_handler))
        .route("/chunks", get(chunks_handler))
        .route("/settings", get(get_settings_handler).post(update_settings_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<KnowledgeState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<Value>> {
    let mut multipart = multipart?;
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidInput(format!("Invalid multipart body: {e}")))?;
        upload = filename.map(|name| (name, bytes));
        break;
    }

    let Some((filename, bytes)) = upload.filter(|(name, _)| !name.is_empty()) else {
        warn!("Subida sin fichero");
        return Err(ApiError::InvalidInput("No file provided".to_string()));
    };

    // Copia de los ajustes vigentes; un cambio posterior no afecta a esta subida.
    let chunking = *state.chunking.read().await;
    let filename = state.kb.ingest(bytes.to_vec(), &filename, chunking).await?;

    Ok(Json(json!({
        "message": "File processed successfully",
        "filename": filename,
    })))
}

#[axum::debug_handler]
async fn search_handler(
    State(state): State<KnowledgeState>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<SearchResult>>> {
    let Query(q) = query?;
    let results = state.kb.search(&q.query, q.limit).await?;
    Ok(Json(results))
}

#[axum::debug_handler]
async fn delete_handler(
    State(state): State<KnowledgeState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<Value>> {
    state.kb.delete_document(&filename).await?;
    Ok(Json(json!({ "message": "Document and its vectors deleted successfully" })))
}

#[axum::debug_handler]
async fn documents_handler(State(state): State<KnowledgeState>) -> ApiResult<Json<Vec<DocumentInfo>>> {
    Ok(Json(state.kb.list_documents().await?))
}

#[axum::debug_handler]
async fn chunks_handler(
    State(state): State<KnowledgeState>,
    query: Result<Query<ChunksQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ChunkView>>> {
    let Query(q) = query?;
    let chunks = state.kb.list_chunks(q.filename.as_deref()).await?;
    Ok(Json(chunks))
}

#[axum::debug_handler]
async fn get_settings_handler(State(state): State<KnowledgeState>) -> Json<ChunkingConfig> {
    Json(*state.chunking.read().await)
}

#[axum::debug_handler]
async fn update_settings_handler(
    State(state): State<KnowledgeState>,
    body: Result<Json<ChunkingConfig>, JsonRejection>,
) -> ApiResult<Json<ChunkingConfig>> {
    let Json(settings) = body?;
    settings
        .validate()
        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
    *state.chunking.write().await = settings;
    info!(
        "Ajustes de troceado actualizados: tamaño={}, solapamiento={}",
        settings.chunk_size, settings.chunk_overlap
    );
    Ok(Json(settings))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
