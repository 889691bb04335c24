//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the connector domain.
//! They depend on nothing outside the domain apart from serde derives.

use crate::domain::value_objects::Dimensions;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Immutable handle for a fixed set of metric dimensions.
///
/// Contexts are created by a metrics backend, which assigns the `id`.
/// Values are recorded against the context instead of re-specifying
/// the dimensions on every call.
#[derive(Debug, PartialEq, Eq)]
pub struct MetricContext {
    id: u64,
    dimensions: Dimensions,
}

impl MetricContext {
    pub fn new(id: u64, dimensions: Dimensions) -> Self {
        Self { id, dimensions }
    }

    /// Backend-assigned identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }
}

/// Shared reference to a metric context.
pub type MetricContextRef = Arc<MetricContext>;

/// Connector lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// Constructed, no channel yet
    Unopened,
    /// Channel bound or adopted
    Open,
    /// At least one accept loop running
    Accepting,
    /// Shutdown requested, waiting for live connections
    Draining,
    /// Channel released
    Closed,
}

impl ConnectorState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectorState::Unopened => 0,
            ConnectorState::Open => 1,
            ConnectorState::Accepting => 2,
            ConnectorState::Draining => 3,
            ConnectorState::Closed => 4,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectorState::Unopened,
            1 => ConnectorState::Open,
            2 => ConnectorState::Accepting,
            3 => ConnectorState::Draining,
            _ => ConnectorState::Closed,
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorState::Unopened => write!(f, "unopened"),
            ConnectorState::Open => write!(f, "open"),
            ConnectorState::Accepting => write!(f, "accepting"),
            ConnectorState::Draining => write!(f, "draining"),
            ConnectorState::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time view of a connector's connection counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    /// Connections accepted since the connector opened
    pub accepted: u64,
    /// Connections currently open
    pub active: usize,
    /// Connections closed since the connector opened
    pub closed: u64,
    /// Highest number of simultaneously open connections
    pub max_active: usize,
    /// Accepts that were delayed by the throttler
    pub throttled: u64,
    /// Sum of all throttling delays in milliseconds
    pub throttle_delay_ms: u64,
    /// Mean lifetime of closed connections in milliseconds
    pub mean_duration_ms: f64,
}
