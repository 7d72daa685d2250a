//! Analysis API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`. The surface is polling-only: every
//! endpoint returns an immediate snapshot, so no connection or session
//! lifecycle exists in the core.

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Build the analysis API router.
pub fn analysis_api_router(ctx: ApiContext) -> Router {
    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/batches", post(endpoints::batches::submit))
        .route("/batches/:id/status", get(endpoints::batches::status))
        .route("/batches/:id/results", get(endpoints::batches::results))
        .route("/batches/:id", delete(endpoints::batches::clear))
        .route("/activity", get(endpoints::activity::recent))
        .with_state(ctx);

    // Polling clients live on another origin during development.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new().nest("/api", api).layer(cors)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::Engine;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::config::AnalysisConfig;
    use crate::pipeline::analysis::{ChunkAnalyzer, HeuristicAnalyzer};
    use crate::pipeline::extract::PlainTextExtractor;
    use crate::pipeline::scheduler::BatchScheduler;

    fn test_ctx() -> ApiContext {
        let config = AnalysisConfig::default();
        let analyzer = Arc::new(ChunkAnalyzer::new(
            Arc::new(HeuristicAnalyzer),
            config.max_retries,
            config.retry_base_delay_ms,
        ));
        let scheduler = Arc::new(BatchScheduler::new(
            config,
            analyzer,
            Arc::new(PlainTextExtractor),
        ));
        ApiContext::new(scheduler)
    }

    fn encode(text: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(text.as_bytes())
    }

    fn submit_body(count: usize) -> String {
        let documents: Vec<String> = (0..count)
            .map(|i| {
                format!(
                    r#"{{"filename": "doc{i}.txt", "declared_type": "text/plain", "content": "{}"}}"#,
                    encode("Customer shall indemnify the provider against all claims.")
                )
            })
            .collect();
        format!(r#"{{"documents": [{}]}}"#, documents.join(","))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = analysis_api_router(test_ctx());
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn submit_accepts_valid_batch() {
        let app = analysis_api_router(test_ctx());
        let response = app
            .oneshot(
                Request::post("/api/batches")
                    .header("content-type", "application/json")
                    .body(Body::from(submit_body(2)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["batch_id"].is_string());
    }

    #[tokio::test]
    async fn submit_rejects_twelve_documents() {
        let app = analysis_api_router(test_ctx());
        let response = app
            .oneshot(
                Request::post("/api/batches")
                    .header("content-type", "application/json")
                    .body(Body::from(submit_body(12)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "TOO_MANY_DOCUMENTS");
    }

    #[tokio::test]
    async fn submit_rejects_unsupported_type() {
        let app = analysis_api_router(test_ctx());
        let body = format!(
            r#"{{"documents": [{{"filename": "scan.pdf", "declared_type": "application/pdf", "content": "{}"}}]}}"#,
            encode("%PDF-1.4")
        );
        let response = app
            .oneshot(
                Request::post("/api/batches")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "UNSUPPORTED_TYPE");
    }

    #[tokio::test]
    async fn submit_rejects_invalid_base64() {
        let app = analysis_api_router(test_ctx());
        let body = r#"{"documents": [{"filename": "a.txt", "declared_type": "text/plain", "content": "!!!"}]}"#;
        let response = app
            .oneshot(
                Request::post("/api/batches")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn status_of_unknown_batch_is_404() {
        let app = analysis_api_router(test_ctx());
        let response = app
            .oneshot(
                Request::get(format!("/api/batches/{}/status", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_of_submitted_batch_returns_snapshot() {
        let ctx = test_ctx();
        let app = analysis_api_router(ctx.clone());
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/batches")
                    .header("content-type", "application/json")
                    .body(Body::from(submit_body(1)))
                    .unwrap(),
            )
            .await
            .unwrap();
        let batch_id = body_json(response).await["batch_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(
                Request::get(format!("/api/batches/{batch_id}/status"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["total_documents"], 1);
        assert!(json["documents"].is_array());
    }

    #[tokio::test]
    async fn activity_endpoint_returns_entries() {
        let ctx = test_ctx();
        let app = analysis_api_router(ctx.clone());
        let _ = app
            .clone()
            .oneshot(
                Request::post("/api/batches")
                    .header("content-type", "application/json")
                    .body(Body::from(submit_body(1)))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::get("/api/activity?limit=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json.as_array().map(|a| !a.is_empty()).unwrap_or(false));
    }

    #[tokio::test]
    async fn clear_of_unknown_batch_is_404() {
        let app = analysis_api_router(test_ctx());
        let response = app
            .oneshot(
                Request::delete(format!("/api/batches/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
