//! Batch endpoints — submit, poll status, fetch results, clear.

use axum::extract::{Path, State};
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::config::BatchOverrides;
use crate::pipeline::types::{BatchResults, BatchSnapshot, DocumentUpload};

#[derive(Deserialize)]
pub struct SubmitBatchRequest {
    pub documents: Vec<SubmitDocument>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub config: Option<BatchOverrides>,
}

#[derive(Deserialize)]
pub struct SubmitDocument {
    pub filename: String,
    pub declared_type: String,
    /// Base64 file bytes; a `data:` URL prefix is tolerated.
    pub content: String,
}

#[derive(Serialize)]
pub struct SubmitBatchResponse {
    pub batch_id: Uuid,
}

/// `POST /api/batches` — validate and accept a batch.
///
/// Validation failures reject the whole batch before any pipeline starts.
pub async fn submit(
    State(ctx): State<ApiContext>,
    Json(payload): Json<SubmitBatchRequest>,
) -> Result<Json<SubmitBatchResponse>, ApiError> {
    let mut uploads = Vec::with_capacity(payload.documents.len());
    for document in payload.documents {
        let content = decode_content(&document.content).map_err(|e| {
            ApiError::BadRequest(format!("Document '{}': {e}", document.filename))
        })?;
        uploads.push(DocumentUpload {
            filename: document.filename,
            declared_type: document.declared_type,
            content,
        });
    }

    let batch_id = ctx
        .scheduler
        .submit(uploads, payload.instructions, payload.config)?;

    Ok(Json(SubmitBatchResponse { batch_id }))
}

/// `GET /api/batches/:id/status` — current snapshot, never blocks.
pub async fn status(
    State(ctx): State<ApiContext>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchSnapshot>, ApiError> {
    ctx.scheduler
        .status(batch_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Batch not found".into()))
}

/// `GET /api/batches/:id/results` — final reports once the batch is
/// terminal; `NOT_READY` otherwise, never partial data.
pub async fn results(
    State(ctx): State<ApiContext>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchResults>, ApiError> {
    Ok(Json(ctx.scheduler.results(batch_id)?))
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub cleared: bool,
}

/// `DELETE /api/batches/:id` — explicit eviction.
pub async fn clear(
    State(ctx): State<ApiContext>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<ClearResponse>, ApiError> {
    if !ctx.scheduler.clear(batch_id) {
        return Err(ApiError::NotFound("Batch not found".into()));
    }
    Ok(Json(ClearResponse { cleared: true }))
}

/// Decode base64 content, tolerating a `data:...;base64,` prefix.
fn decode_content(content: &str) -> Result<Vec<u8>, String> {
    let encoded = match content.find(',') {
        Some(idx) if content.starts_with("data:") => &content[idx + 1..],
        _ => content,
    };
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64 content: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_plain_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"contract text");
        assert_eq!(decode_content(&encoded).unwrap(), b"contract text");
    }

    #[test]
    fn decode_data_url() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello");
        let data_url = format!("data:text/plain;base64,{encoded}");
        assert_eq!(decode_content(&data_url).unwrap(), b"hello");
    }

    #[test]
    fn decode_rejects_invalid() {
        assert!(decode_content("!!! not base64 !!!").is_err());
    }
}
