//! edge-connector Library
//!
//! Connection acceptance and admission control for a serving node: one
//! [`Connector`] per listening port, with channel handoff from an external
//! activator, accept throttling, per-socket options and cached metric
//! contexts.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::inbound::{AcceptedConnection, Connector, ConnectorHandle};
pub use adapters::outbound::DashMapMetricsBackend;
pub use application::DiscardHandler;
pub use config::{load_config, ConfigError, ConnectorConfig, ThrottlingConfig};
pub use domain::entities::{ConnectorState, MetricContext, MetricContextRef, StatisticsSnapshot};
pub use domain::ports::{ConnectionHandler, MetricsBackend};
pub use domain::value_objects::{DimensionKeys, DimensionValue, Dimensions, RequestDimensions};
pub use error::ConnectorError;
pub use infrastructure::ListenChannel;
