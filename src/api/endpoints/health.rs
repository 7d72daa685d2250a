//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_batches: usize,
    pub version: &'static str,
}

/// `GET /api/health` — liveness check for clients and deployments.
pub async fn check(State(ctx): State<ApiContext>) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "ok",
        active_batches: ctx.scheduler.active_batches(),
        version: crate::config::APP_VERSION,
    }))
}
