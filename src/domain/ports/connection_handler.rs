//! Connection Handler Port
//!
//! The request-processing layer that runs on top of accepted connections.

use async_trait::async_trait;

/// Consumer of accepted, configured connections.
///
/// This is an inbound port implemented by the server framework. `C` is the
/// connection type delivered by the inbound adapter; the connector delivers
/// connections that carry a handle back to the connector that accepted them.
#[async_trait]
pub trait ConnectionHandler<C>: Send + Sync
where
    C: Send + 'static,
{
    async fn handle(&self, connection: C);
}
