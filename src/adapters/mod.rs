//! Adapters Layer
//!
//! Inbound: the connector accepting TCP connections.
//! Outbound: metrics backend implementations.

pub mod inbound;
pub mod outbound;
