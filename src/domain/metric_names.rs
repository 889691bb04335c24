//! Metric names recorded by connectors.

/// Connections accepted (counter, connector context)
pub const CONNECTIONS_ACCEPTED: &str = "connections.accepted";
/// Connections currently open (gauge, connector context)
pub const CONNECTIONS_ACTIVE: &str = "connections.active";
/// Accepts delayed by the throttler (counter, connector context)
pub const CONNECTIONS_THROTTLED: &str = "connections.throttled";
/// Failed accept calls (counter, connector context)
pub const ACCEPT_ERRORS: &str = "connections.accept_errors";
/// Requests seen (counter, request context)
pub const REQUESTS: &str = "requests";
/// Bytes read from a connection (counter, connector context)
pub const BYTES_RECEIVED: &str = "connections.bytes_received";
