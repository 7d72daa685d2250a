pub mod api; // HTTP surface for polling clients
pub mod config;
pub mod monitor; // Shared activity log
pub mod pipeline;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use pipeline::analysis::{AnalysisClient, ChunkAnalyzer, HeuristicAnalyzer, HttpAnalysisClient};
use pipeline::extract::PlainTextExtractor;
use pipeline::scheduler::BatchScheduler;

/// Build the batch scheduler with its collaborators wired in.
///
/// The analysis collaborator comes from `LEXISCAN_ANALYSIS_URL` when set;
/// without it the deterministic heuristic analyzer runs, so the service
/// works end-to-end with no external credentials.
pub fn build_scheduler(config: config::AnalysisConfig) -> Arc<BatchScheduler> {
    let client: Arc<dyn AnalysisClient> = match std::env::var("LEXISCAN_ANALYSIS_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let model = std::env::var("LEXISCAN_ANALYSIS_MODEL")
                .unwrap_or_else(|_| "contract-review".to_string());
            tracing::info!(url = %url, model = %model, "Using external analysis service");
            Arc::new(HttpAnalysisClient::new(
                &url,
                &model,
                config.analysis_timeout_secs,
            ))
        }
        _ => {
            tracing::info!("No analysis service configured, using heuristic analyzer");
            Arc::new(HeuristicAnalyzer)
        }
    };

    let analyzer = Arc::new(ChunkAnalyzer::new(
        client,
        config.max_retries,
        config.retry_base_delay_ms,
    ));

    Arc::new(BatchScheduler::new(
        config,
        analyzer,
        Arc::new(PlainTextExtractor),
    ))
}

/// Start the service and serve until interrupted.
pub async fn run() -> Result<(), String> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let scheduler = build_scheduler(config::AnalysisConfig::default());
    let ctx = api::ApiContext::new(scheduler);

    let addr: SocketAddr = std::env::var("LEXISCAN_BIND")
        .unwrap_or_else(|_| "127.0.0.1:8710".to_string())
        .parse()
        .map_err(|e| format!("Invalid LEXISCAN_BIND address: {e}"))?;

    let mut server = api::start_server(ctx, addr).await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for shutdown signal: {e}"))?;
    tracing::info!("Shutdown requested");
    server.shutdown();

    Ok(())
}
