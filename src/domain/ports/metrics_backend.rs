//! Metrics Backend Port
//!
//! Defines the interface connectors use to create metric contexts and
//! record values against them.

use crate::domain::entities::MetricContextRef;
use crate::domain::value_objects::Dimensions;

/// Backend that owns metric contexts and recorded values.
///
/// This is an outbound port. Connectors create contexts once and record
/// against them on the hot path.
pub trait MetricsBackend: Send + Sync {
    /// Create an immutable context for a dimension set.
    fn create_context(&self, dimensions: Dimensions) -> MetricContextRef;

    /// Add to a counter.
    fn add(&self, metric: &str, value: u64, ctx: &MetricContextRef);

    /// Set a gauge.
    fn set(&self, metric: &str, value: f64, ctx: &MetricContextRef);
}
