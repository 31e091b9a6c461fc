//! HTTP surface of the relay.
//!
//! Sender endpoints authenticate with the `x-owner-id` header; receiver
//! endpoints authenticate with nothing but the lookup segment, which is the
//! whole point of a pickup code. Error bodies always carry a
//! machine-readable `code` so clients dispatch on reasons, not on status
//! numbers or message text. A key fetched before the sender finished is a
//! 404 like an unknown lookup, told apart only by its `KEY_NOT_READY`
//! reason.
//!
//! ```text
//! POST /codes                                issue a pickup code
//! POST /codes/{lookup}/upload-chunk?index=   upload one encrypted chunk
//! POST /codes/{lookup}/store-encrypted-key   store the wrapped content key
//! POST /codes/{lookup}/upload-complete       finalize the upload
//! GET  /codes/{lookup}/status                sender-side status snapshot
//! POST /codes/files/{fileId}/invalidate      invalidate every code over a file
//! GET  /codes/{lookup}/encrypted-key         fetch wrapped key, opens a session
//! GET  /codes/{lookup}/file-info             fetch file metadata
//! POST /codes/{lookup}/download-chunks       batched chunk download
//! POST /codes/{lookup}/download-complete     report a finished download
//! GET  /healthz                              liveness probe
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use qsr_core::config::RelayConfig;
use qsr_core::error::RelayError;
use qsr_core::types::{CodeIssue, CreateCodeRequest, FileId, FileInfo, OwnerId, SessionId};

use crate::service::RelayService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RelayService>,
    pub config: Arc<RelayConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/codes", post(create_code))
        .route("/codes/{lookup}/upload-chunk", post(store_chunk))
        .route("/codes/{lookup}/store-encrypted-key", post(store_key))
        .route("/codes/{lookup}/upload-complete", post(upload_complete))
        .route("/codes/{lookup}/status", get(code_status))
        .route("/codes/files/{file_id}/invalidate", post(invalidate_file))
        .route("/codes/{lookup}/encrypted-key", get(pickup_key))
        .route("/codes/{lookup}/file-info", get(pickup_info))
        .route("/codes/{lookup}/download-chunks", post(pickup_chunks))
        .route("/codes/{lookup}/download-complete", post(pickup_complete))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Serve the relay API on `addr` until the process exits.
pub async fn serve(addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("relay bind {addr}: {e}"))?;
    tracing::info!(addr, "relay: listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("relay server: {e}"))
}

// ---------------------------------------------------------------- errors

struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            // not-ready answers are 404s too; the reason code is what
            // separates "poll again" from "no such code"
            RelayError::CodeNotFound
            | RelayError::FileNotFound { .. }
            | RelayError::SessionNotFound
            | RelayError::ChunkMissing { .. }
            | RelayError::KeyNotReady
            | RelayError::FileInfoNotReady => StatusCode::NOT_FOUND,
            RelayError::CodeExpired
            | RelayError::CodeCompleted
            | RelayError::CodeInvalidated
            | RelayError::ChunkExpired { .. } => StatusCode::GONE,
            RelayError::DuplicateContent { .. } | RelayError::UploadIncomplete { .. } => {
                StatusCode::CONFLICT
            }
            RelayError::InvalidCode(_) | RelayError::EmptyChunk => StatusCode::BAD_REQUEST,
            RelayError::Storage(_) | RelayError::Io(_) | RelayError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(code = err.reason(), "relay request failed: {err}");
        }

        let mut body = serde_json::json!({
            "code": err.reason(),
            "message": err.to_string(),
        });
        match &err {
            RelayError::DuplicateContent { file_id } => {
                body["fileId"] = serde_json::json!(file_id);
            }
            RelayError::UploadIncomplete { missing } => {
                body["missing"] = serde_json::json!(missing);
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

fn owner_from(headers: &HeaderMap) -> Result<OwnerId, ApiError> {
    headers
        .get("x-owner-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            ApiError(RelayError::InvalidCode(
                "missing or malformed x-owner-id header".into(),
            ))
        })
}

// --------------------------------------------------------------- sender

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCodeBody {
    file_name: String,
    file_size: u64,
    mime_type: String,
    content_hash: Option<String>,
    usage_limit: Option<u32>,
    ttl_secs: Option<u64>,
    reuse_file_id: Option<FileId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssuedCodeBody {
    code: String,
    file_id: FileId,
    expires_at: std::time::SystemTime,
    reused: bool,
}

async fn create_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateCodeBody>,
) -> Result<Response, ApiError> {
    let owner = owner_from(&headers)?;
    let req = CreateCodeRequest {
        file_name: body.file_name,
        file_size: body.file_size,
        mime_type: body.mime_type,
        content_hash: body.content_hash,
        usage_limit: body.usage_limit.unwrap_or(state.config.default_usage_limit),
        ttl: Duration::from_secs(
            body.ttl_secs
                .unwrap_or(state.config.default_ttl_hours * 3600),
        ),
        reuse_file_id: body.reuse_file_id,
    };
    match state.service.create_code(owner, &req)? {
        CodeIssue::Issued(issued) => Ok((
            StatusCode::CREATED,
            Json(IssuedCodeBody {
                code: issued.code.as_str().to_string(),
                file_id: issued.file_id,
                expires_at: issued.expires_at,
                reused: issued.reused,
            }),
        )
            .into_response()),
        CodeIssue::Duplicate { file_id } => {
            Err(ApiError(RelayError::DuplicateContent { file_id }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChunkIndexQuery {
    index: u32,
}

async fn store_chunk(
    State(state): State<AppState>,
    Path(lookup): Path<String>,
    Query(query): Query<ChunkIndexQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let owner = owner_from(&headers)?;
    let ack = state.service.store_chunk(owner, &lookup, query.index, body)?;
    Ok(Json(ack).into_response())
}

async fn store_key(
    State(state): State<AppState>,
    Path(lookup): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let owner = owner_from(&headers)?;
    state.service.store_wrapped_key(owner, &lookup, body)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_complete(
    State(state): State<AppState>,
    Path(lookup): Path<String>,
    headers: HeaderMap,
    Json(info): Json<FileInfo>,
) -> Result<Response, ApiError> {
    let owner = owner_from(&headers)?;
    let view = state.service.upload_complete(owner, &lookup, &info)?;
    Ok(Json(view).into_response())
}

async fn code_status(
    State(state): State<AppState>,
    Path(lookup): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let owner = owner_from(&headers)?;
    let view = state.service.code_status(owner, &lookup)?;
    Ok(Json(view).into_response())
}

async fn invalidate_file(
    State(state): State<AppState>,
    Path(file_id): Path<FileId>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let owner = owner_from(&headers)?;
    state.service.invalidate(owner, file_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// -------------------------------------------------------------- receiver

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyFetchBody {
    wrapped_key: String,
    session_id: SessionId,
}

async fn pickup_key(
    State(state): State<AppState>,
    Path(lookup): Path<String>,
) -> Result<Response, ApiError> {
    let fetch = state.service.fetch_wrapped_key(&lookup)?;
    Ok(Json(KeyFetchBody {
        wrapped_key: BASE64.encode(&fetch.wrapped_key),
        session_id: fetch.session_id,
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session: Option<SessionId>,
}

async fn pickup_info(
    State(state): State<AppState>,
    Path(lookup): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ApiError> {
    let info = state.service.fetch_file_info(&lookup, query.session)?;
    Ok(Json(info).into_response())
}

#[derive(Debug, Deserialize)]
struct ChunksBody {
    indices: Vec<u32>,
    session: Option<SessionId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkBody {
    index: u32,
    data: String,
    digest: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkBatchBody {
    found: Vec<ChunkBody>,
    missing: Vec<u32>,
    expired: Vec<u32>,
}

async fn pickup_chunks(
    State(state): State<AppState>,
    Path(lookup): Path<String>,
    Json(body): Json<ChunksBody>,
) -> Result<Response, ApiError> {
    let batch = state
        .service
        .download_chunks(&lookup, body.session, &body.indices)?;
    Ok(Json(ChunkBatchBody {
        found: batch
            .found
            .into_iter()
            .map(|c| ChunkBody {
                index: c.index,
                data: BASE64.encode(&c.data),
                digest: c.digest,
            })
            .collect(),
        missing: batch.missing,
        expired: batch.expired,
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteBody {
    session_id: SessionId,
}

async fn pickup_complete(
    State(state): State<AppState>,
    Path(lookup): Path<String>,
    Json(body): Json<CompleteBody>,
) -> Result<Response, ApiError> {
    let summary = state.service.download_complete(&lookup, body.session_id)?;
    Ok(Json(summary).into_response())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
