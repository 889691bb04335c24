//! Discard Handler
//!
//! Minimal connection handler for running a connector on its own: reads
//! each connection to EOF and counts the bytes against the connector.

use crate::adapters::inbound::AcceptedConnection;
use crate::domain::metric_names;
use crate::domain::ports::{ConnectionHandler, MetricsBackend};
use async_trait::async_trait;
use std::sync::Arc;

pub struct DiscardHandler {
    metrics: Arc<dyn MetricsBackend>,
}

impl DiscardHandler {
    pub fn new(metrics: Arc<dyn MetricsBackend>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl ConnectionHandler<AcceptedConnection> for DiscardHandler {
    async fn handle(&self, connection: AcceptedConnection) {
        let peer = connection.peer_addr();
        let (mut stream, connector, _guard) = connection.into_parts();
        let ctx = connector.connector_metric_context();

        match tokio::io::copy(&mut stream, &mut tokio::io::sink()).await {
            Ok(bytes) => {
                self.metrics.add(metric_names::BYTES_RECEIVED, bytes, &ctx);
                tracing::debug!("{} closed after {} bytes on {}", peer, bytes, connector.name());
            }
            Err(e) => {
                tracing::debug!("{} read error on {}: {}", peer, connector.name(), e);
            }
        }
    }
}
