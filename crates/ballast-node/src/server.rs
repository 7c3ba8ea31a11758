//! Serving modes: an HTTP listener, or one wire session on stdin/stdout.

use crate::api::{create_router, AppState};
use crate::config::NodeConfig;
use ballast_proto::{stdio, WireHandler};
use tokio::net::TcpListener;
use tracing::info;

/// Builds the shared state for a node configuration.
pub fn app_state(config: &NodeConfig) -> AppState {
    AppState::new(WireHandler::new(config.cache_hierarchy()))
        .with_upload_limit(config.upload_limit())
}

/// Serves the HTTP API until Ctrl+C.
pub async fn run_http(config: &NodeConfig) -> anyhow::Result<()> {
    let state = app_state(config);
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(
        addr = %listener.local_addr()?,
        cache_dir = %config.cache_dir.display(),
        system_cache = %config.system_cache_dir().display(),
        "Node is ready"
    );

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Node stopped");
    Ok(())
}

/// Answers wire requests on stdin/stdout until stdin closes.
///
/// This is the remote end of an ssh transport.
pub async fn run_stdio(config: &NodeConfig) -> anyhow::Result<()> {
    let handler = WireHandler::new(config.cache_hierarchy());
    info!(cache_dir = %config.cache_dir.display(), "Serving wire protocol on stdio");
    stdio::serve(&handler, tokio::io::stdin(), tokio::io::stdout()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
