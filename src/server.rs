//! HTTP surface.
//!
//! JSON API over axum:
//!
//! | Method | Path | Purpose | Status |
//! |--------|------|---------|--------|
//! | `POST` | `/v1/kb/{kb_id}/documents` | Upload a document | 201, 400 |
//! | `POST` | `/v1/kb/{kb_id}/documents/{document_id}/chunking` | Re-chunk the latest version | 202, 400, 404 |
//! | `POST` | `/v1/kb/{kb_id}/chunks/{chunk_id}/embed` | Re-embed one chunk | 200, 400, 404, 503 |
//! | `POST` | `/v1/kb/{kb_id}/query` | Hybrid retrieval | 200, 400, 5xx |
//! | `POST` | `/v1/kb/{kb_id}/hydrate` | Neighbor expansion | 200, 400, 5xx |
//! | `POST` | `/v1/kb/{kb_id}/retrieve` | Alias of `/query` | same |
//! | `GET`  | `/health` | Liveness + version | 200 |
//!
//! Error responses are `{"error": "<message>"}`; 5xx bodies never leak
//! internal detail. Unknown JSON fields are rejected.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::chunk_service::{ChunkService, ChunkServiceError, InitiateRequest};
use crate::chunking::{parse_language_hints, Strategy};
use crate::document::{DocumentService, UploadRequest};
use crate::retrieval::{
    Filters, HydrateRequest, RetrievalError, RetrievalRequest, RetrievalService,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub chunking: Arc<ChunkService>,
    pub retrieval: Arc<RetrievalService>,
    pub documents: Arc<DocumentService>,
}

/// Build the router with all application routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/kb/{kb_id}/documents", post(handle_upload))
        .route(
            "/v1/kb/{kb_id}/documents/{document_id}/chunking",
            post(handle_chunking),
        )
        .route("/v1/kb/{kb_id}/chunks/{chunk_id}/embed", post(handle_embed))
        .route("/v1/kb/{kb_id}/query", post(handle_query))
        .route("/v1/kb/{kb_id}/hydrate", post(handle_hydrate))
        .route("/v1/kb/{kb_id}/retrieve", post(handle_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve until the process terminates.
pub async fn run_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!(port, "starting server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error mapping ============

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = if self.status.is_server_error() {
            "internal server error".to_string()
        } else {
            self.message
        };
        (
            self.status,
            Json(serde_json::json!({ "error": message })),
        )
            .into_response()
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        if err.is_client_error() {
            AppError::new(StatusCode::BAD_REQUEST, err.to_string())
        } else {
            AppError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<ChunkServiceError> for AppError {
    fn from(err: ChunkServiceError) -> Self {
        let status = match err {
            ChunkServiceError::DocumentNotFound | ChunkServiceError::ChunkNotFound => {
                StatusCode::NOT_FOUND
            }
            ChunkServiceError::EmbedderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        };
        AppError::new(status, err.to_string())
    }
}

// ============ POST /v1/kb/{kb_id}/documents ============

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UploadBody {
    path: String,
    content: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    document_type: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    source_metadata: Option<crate::models::JsonMap>,
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(kb_id): Path<String>,
    Json(body): Json<UploadBody>,
) -> Result<impl IntoResponse, AppError> {
    let result = state
        .documents
        .upload(UploadRequest {
            kb_id,
            path: body.path,
            title: body.title,
            document_type: body.document_type,
            content_type: body.content_type,
            source_metadata: body.source_metadata,
            file_name: body.file_name,
            content: body.content.into_bytes(),
        })
        .await
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?;

    Ok((StatusCode::CREATED, Json(result)))
}

// ============ POST /v1/kb/{kb_id}/documents/{document_id}/chunking ============

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ChunkingBody {
    #[serde(default)]
    strategy: String,
    #[serde(default)]
    max_runes: i64,
    #[serde(default)]
    overlap_runes: i64,
    #[serde(default)]
    separators: Vec<String>,
    #[serde(default)]
    language_hints: Vec<String>,
}

async fn handle_chunking(
    State(state): State<AppState>,
    Path((kb_id, document_id)): Path<(String, String)>,
    Json(body): Json<ChunkingBody>,
) -> Result<impl IntoResponse, AppError> {
    info!(kb_id = %kb_id, document_id = %document_id, "chunking request received");

    let strategy = Strategy::parse(&body.strategy)
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?;
    let language_hints = parse_language_hints(&body.language_hints).map_err(|err| {
        warn!(kb_id = %kb_id, document_id = %document_id, error = %err, "invalid language hints");
        AppError::new(StatusCode::BAD_REQUEST, err.to_string())
    })?;
    if body.max_runes < 0 {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "max_runes must be greater than zero",
        ));
    }
    if body.overlap_runes < 0 {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "overlap_runes must be zero or greater",
        ));
    }

    let result = state
        .chunking
        .initiate_document_chunking(InitiateRequest {
            kb_id,
            document_id,
            strategy,
            max_runes: body.max_runes as usize,
            overlap_runes: body.overlap_runes as usize,
            separators: body.separators,
            language_hints,
        })
        .await?;

    info!(
        document_id = %result.document_id,
        document_version_id = %result.document_version_id,
        strategy = %result.strategy,
        chunk_count = result.chunk_count,
        "chunking request accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(result)))
}

// ============ POST /v1/kb/{kb_id}/chunks/{chunk_id}/embed ============

async fn handle_embed(
    State(state): State<AppState>,
    Path((kb_id, chunk_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    info!(kb_id = %kb_id, chunk_id = %chunk_id, "chunk re-embed request received");
    let result = state.chunking.embed_chunk_by_id(&kb_id, &chunk_id).await?;
    Ok(Json(result))
}

// ============ POST /v1/kb/{kb_id}/query ============

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryBody {
    query: String,
    #[serde(default)]
    top_k: Option<i32>,
    #[serde(default)]
    hybrid_weight: Option<f64>,
    #[serde(default)]
    retrieval_profile: Option<String>,
    #[serde(default)]
    semantic_weight: Option<f64>,
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    filters: Option<FiltersBody>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FiltersBody {
    #[serde(default)]
    path_prefix: Option<String>,
    #[serde(default)]
    document_type: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    created_after: Option<String>,
    #[serde(default)]
    created_before: Option<String>,
    #[serde(default)]
    updated_after: Option<String>,
}

fn parse_rfc3339(value: &str, field: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AppError::new(StatusCode::BAD_REQUEST, format!("{} must be RFC3339", field)))
}

fn build_filters(body: Option<FiltersBody>) -> Result<Filters, AppError> {
    let Some(body) = body else {
        return Ok(Filters::default());
    };

    // updated_after is an accepted alias that narrows the same version
    // timestamp as created_after.
    let created_after_raw = match (&body.updated_after, &body.created_after) {
        (Some(updated), _) if !updated.trim().is_empty() => Some(updated.clone()),
        (_, Some(created)) => Some(created.clone()),
        _ => None,
    };

    let created_after = created_after_raw
        .filter(|v| !v.is_empty())
        .map(|v| parse_rfc3339(&v, "created_after"))
        .transpose()?;
    let created_before = body
        .created_before
        .filter(|v| !v.is_empty())
        .map(|v| parse_rfc3339(&v, "created_before"))
        .transpose()?;

    Ok(Filters {
        document_type: body.document_type,
        path_prefix: body.path_prefix,
        source: body.source,
        tags: body.tags,
        created_after,
        created_before,
    })
}

async fn handle_query(
    State(state): State<AppState>,
    Path(kb_id): Path<String>,
    Json(body): Json<QueryBody>,
) -> Result<impl IntoResponse, AppError> {
    if kb_id.trim().is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "kb_id is required"));
    }

    let request = RetrievalRequest {
        kb_id,
        query: body.query.trim().to_string(),
        top_k: body.top_k,
        hybrid_weight: body.hybrid_weight,
        retrieval_profile: body.retrieval_profile,
        semantic_weight: body.semantic_weight,
        debug: body.debug,
        filters: build_filters(body.filters)?,
    };

    let response = state.retrieval.retrieve(request).await?;
    Ok(Json(response))
}

// ============ POST /v1/kb/{kb_id}/hydrate ============

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct HydrateBody {
    chunk_ids: Vec<String>,
    #[serde(default)]
    adjacent_before: i32,
    #[serde(default)]
    adjacent_after: i32,
}

async fn handle_hydrate(
    State(state): State<AppState>,
    Path(kb_id): Path<String>,
    Json(body): Json<HydrateBody>,
) -> Result<impl IntoResponse, AppError> {
    if kb_id.trim().is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "kb_id is required"));
    }

    let response = state
        .retrieval
        .hydrate(HydrateRequest {
            kb_id,
            chunk_ids: body.chunk_ids,
            adjacent_before: body.adjacent_before,
            adjacent_after: body.adjacent_after,
        })
        .await?;
    Ok(Json(response))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
