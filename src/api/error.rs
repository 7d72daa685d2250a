//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::error::SubmitError;
use crate::pipeline::scheduler::ResultsError;

/// Structured error response body for polling clients.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Results not ready: {completed} completed, {failed} failed of {total}")]
    NotReady {
        completed: usize,
        failed: usize,
        total: usize,
    },
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ResultsError> for ApiError {
    fn from(err: ResultsError) -> Self {
        match err {
            ResultsError::NotFound => ApiError::NotFound("Batch not found".into()),
            ResultsError::NotReady {
                completed,
                failed,
                total,
            } => ApiError::NotReady {
                completed,
                failed,
                total,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Submit(err) => {
                let (status, code) = match err {
                    SubmitError::EmptyBatch => (StatusCode::BAD_REQUEST, "EMPTY_BATCH"),
                    SubmitError::TooManyDocuments { .. } => {
                        (StatusCode::BAD_REQUEST, "TOO_MANY_DOCUMENTS")
                    }
                    SubmitError::FileTooLarge { .. } => {
                        (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE")
                    }
                    SubmitError::UnsupportedType { .. } => {
                        (StatusCode::BAD_REQUEST, "UNSUPPORTED_TYPE")
                    }
                    SubmitError::InvalidConfig(_) => (StatusCode::BAD_REQUEST, "INVALID_CONFIG"),
                };
                (status, code, err.to_string())
            }
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::NotReady {
                completed,
                failed,
                total,
            } => (
                StatusCode::CONFLICT,
                "NOT_READY",
                format!(
                    "Batch is not finished: {completed} completed, {failed} failed of {total} documents"
                ),
            ),
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[tokio::test]
    async fn too_many_documents_maps_to_400_with_code() {
        let response = ApiError::from(SubmitError::TooManyDocuments { count: 12, max: 10 })
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "TOO_MANY_DOCUMENTS");
        assert!(json["error"]["message"].as_str().unwrap().contains("12"));
    }

    #[tokio::test]
    async fn file_too_large_maps_to_413() {
        let response = ApiError::from(SubmitError::FileTooLarge {
            filename: "big.txt".into(),
            bytes: 11_000_000,
            max: 10_485_760,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "FILE_TOO_LARGE");
    }

    #[tokio::test]
    async fn unsupported_type_maps_to_400() {
        let response = ApiError::from(SubmitError::UnsupportedType {
            filename: "scan.pdf".into(),
            declared_type: "application/pdf".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "UNSUPPORTED_TYPE");
    }

    #[tokio::test]
    async fn not_ready_maps_to_409() {
        let response = ApiError::from(ResultsError::NotReady {
            completed: 2,
            failed: 0,
            total: 5,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "NOT_READY");
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let response = ApiError::Internal("lock poisoned somewhere".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }
}
