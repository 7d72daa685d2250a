//! Analysis API.
//!
//! Exposes the batch scheduler as HTTP endpoints for polling clients.
//! Routes are nested under `/api/`. The surface is snapshot-based —
//! submit a batch, then poll status/results/activity; no persistent
//! connection is needed.
//!
//! The router is composable — `analysis_api_router()` returns a `Router`
//! that can be mounted on any axum server instance.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::analysis_api_router;
pub use server::{start_server, ApiServer};
pub use types::ApiContext;
