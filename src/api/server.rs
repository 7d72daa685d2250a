//! API server lifecycle — bind → spawn background task → return handle with
//! shutdown channel.

use std::net::SocketAddr;

use tokio::sync::oneshot;

use crate::api::router::analysis_api_router;
use crate::api::types::ApiContext;

/// Handle to a running API server.
pub struct ApiServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ApiServer {
    /// Shut down the server gracefully.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
    }
}

/// Bind the analysis API on `addr` and serve it in a background task.
pub async fn start_server(ctx: ApiContext, addr: SocketAddr) -> Result<ApiServer, String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind API server on {addr}: {e}"))?;
    let addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {e}"))?;

    let app = analysis_api_router(ctx);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "API server stopped unexpectedly");
        }
    });

    tracing::info!(%addr, "API server listening");

    Ok(ApiServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AnalysisConfig;
    use crate::pipeline::analysis::{ChunkAnalyzer, HeuristicAnalyzer};
    use crate::pipeline::extract::PlainTextExtractor;
    use crate::pipeline::scheduler::BatchScheduler;

    #[tokio::test]
    async fn binds_ephemeral_port_and_shuts_down() {
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
        let ctx = ApiContext::new(scheduler);

        let mut server = start_server(ctx, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_ne!(server.addr.port(), 0);
        server.shutdown();
    }
}
