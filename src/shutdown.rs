use tracing::warn;

/// Resolves on the first Ctrl-C, or right away if the handler cannot be installed
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {}", e);
    }
}
