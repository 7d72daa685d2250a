//! Activity log endpoint for polling clients.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::monitor::AgentActivity;

/// Default and ceiling for the number of returned entries.
const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Deserialize)]
pub struct ActivityQuery {
    #[serde(default)]
    pub batch_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /api/activity?batch_id=&limit=` — bounded, newest-first activity
/// entries. Designed for polling at ≥200ms intervals; no persistent
/// connection needed.
pub async fn recent(
    State(ctx): State<ApiContext>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<AgentActivity>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    Ok(Json(ctx.activity.recent(limit, query.batch_id)))
}
