//! edge-connector - connection acceptance with admission control
//!
//! This is the composition root that wires together all the components.

use edge_connector::infrastructure::shutdown_signal;
use edge_connector::{
    load_config, Connector, DashMapMetricsBackend, DimensionKeys, DiscardHandler, ListenChannel,
};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting edge-connector name={} port={} acceptors={} throttling={}",
        cfg.connector.name,
        cfg.connector.listen_port,
        cfg.connector.acceptors,
        cfg.connector.throttling.enabled
    );

    // ===== COMPOSITION ROOT =====

    // 1. Metrics backend, sharing dimension keys with the connector
    let keys = Arc::new(DimensionKeys::default());
    let metrics = Arc::new(DashMapMetricsBackend::new(keys.clone()));

    // 2. Connector, adopting the activator's channel when there is one
    let connector = Arc::new(Connector::new(cfg.connector.clone(), metrics.clone(), keys)?);
    connector.open(ListenChannel::from_activator_env())?;

    // 3. Accept loops
    let handler = Arc::new(DiscardHandler::new(metrics.clone()));
    let server = {
        let connector = connector.clone();
        tokio::spawn(async move { connector.serve(handler).await })
    };

    shutdown_signal().await;

    if !connector.close().await {
        tracing::warn!("closed with connections still open");
    }
    server.await??;

    tracing::debug!("final metrics:\n{}", metrics.export_prometheus());
    Ok(())
}
