//! DashMap Metrics Backend
//!
//! Implements MetricsBackend in memory using DashMap for lock-free
//! concurrent access, with Prometheus text exposition.

use crate::domain::entities::{MetricContext, MetricContextRef};
use crate::domain::ports::MetricsBackend;
use crate::domain::value_objects::{DimensionKeys, Dimensions};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Series key: metric name and context id.
type SeriesKey = (String, u64);

/// In-memory metrics backend.
///
/// Each created context gets a unique id; values are stored per
/// (metric, context) series.
pub struct DashMapMetricsBackend {
    keys: Arc<DimensionKeys>,
    next_id: AtomicU64,
    contexts: DashMap<u64, MetricContextRef>,
    counters: DashMap<SeriesKey, AtomicU64>,
    /// f64 values stored as bits
    gauges: DashMap<SeriesKey, AtomicU64>,
}

impl DashMapMetricsBackend {
    /// Create a new backend labelling series with `keys`.
    pub fn new(keys: Arc<DimensionKeys>) -> Self {
        Self {
            keys,
            next_id: AtomicU64::new(0),
            contexts: DashMap::new(),
            counters: DashMap::new(),
            gauges: DashMap::new(),
        }
    }

    /// Number of contexts created so far.
    pub fn contexts_created(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Current counter value for a context.
    pub fn counter(&self, metric: &str, ctx: &MetricContextRef) -> u64 {
        self.counters
            .get(&(metric.to_string(), ctx.id()))
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current gauge value for a context.
    pub fn gauge(&self, metric: &str, ctx: &MetricContextRef) -> Option<f64> {
        self.gauges
            .get(&(metric.to_string(), ctx.id()))
            .map(|v| f64::from_bits(v.load(Ordering::Relaxed)))
    }

    /// Export all series in Prometheus text format.
    ///
    /// Dimension keys from the shared [`DimensionKeys`] come first in
    /// every label set, in a fixed order.
    pub fn export_prometheus(&self) -> String {
        let mut counters: BTreeMap<String, Vec<(u64, String)>> = BTreeMap::new();
        for entry in self.counters.iter() {
            let (metric, id) = entry.key();
            counters
                .entry(metric.clone())
                .or_default()
                .push((*id, entry.value().load(Ordering::Relaxed).to_string()));
        }

        let mut gauges: BTreeMap<String, Vec<(u64, String)>> = BTreeMap::new();
        for entry in self.gauges.iter() {
            let (metric, id) = entry.key();
            let value = f64::from_bits(entry.value().load(Ordering::Relaxed));
            gauges
                .entry(metric.clone())
                .or_default()
                .push((*id, value.to_string()));
        }

        let mut output = String::new();
        self.write_family(&mut output, "counter", counters);
        self.write_family(&mut output, "gauge", gauges);
        output
    }

    fn write_family(&self, output: &mut String, kind: &str, families: BTreeMap<String, Vec<(u64, String)>>) {
        for (metric, mut series) in families {
            let name = prometheus_name(&metric);
            let _ = writeln!(output, "# TYPE {} {}", name, kind);
            series.sort_by_key(|(id, _)| *id);
            for (id, value) in series {
                let labels = self
                    .contexts
                    .get(&id)
                    .map(|ctx| self.labels(ctx.dimensions()))
                    .unwrap_or_default();
                let _ = writeln!(output, "{}{} {}", name, labels, value);
            }
        }
    }

    fn labels(&self, dims: &Dimensions) -> String {
        if dims.is_empty() {
            return String::new();
        }
        let known = [
            &self.keys.name,
            &self.keys.port,
            &self.keys.method,
            &self.keys.scheme,
        ];
        let ordered = known
            .iter()
            .filter_map(|k| dims.get(k).map(|v| (k.as_str(), v)))
            .chain(
                dims.iter()
                    .filter(|(k, _)| !known.contains(k))
                    .map(|(k, v)| (k.as_str(), v)),
            );

        let parts: Vec<String> = ordered
            .map(|(k, v)| format!("{}=\"{}\"", prometheus_name(k), v))
            .collect();
        format!("{{{}}}", parts.join(","))
    }
}

fn prometheus_name(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

impl MetricsBackend for DashMapMetricsBackend {
    fn create_context(&self, dimensions: Dimensions) -> MetricContextRef {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let ctx = Arc::new(MetricContext::new(id, dimensions));
        self.contexts.insert(id, ctx.clone());
        ctx
    }

    fn add(&self, metric: &str, value: u64, ctx: &MetricContextRef) {
        self.counters
            .entry((metric.to_string(), ctx.id()))
            .or_default()
            .fetch_add(value, Ordering::Relaxed);
    }

    fn set(&self, metric: &str, value: f64, ctx: &MetricContextRef) {
        self.gauges
            .entry((metric.to_string(), ctx.id()))
            .or_default()
            .store(value.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::value_objects::RequestDimensions;

    fn backend() -> DashMapMetricsBackend {
        DashMapMetricsBackend::new(Arc::new(DimensionKeys::default()))
    }

    #[test]
    fn test_context_ids_are_unique() {
        let backend = backend();
        let keys = DimensionKeys::default();

        let a = backend.create_context(keys.connector("a", 1));
        let b = backend.create_context(keys.connector("a", 1));

        assert_ne!(a.id(), b.id());
        assert_eq!(backend.contexts_created(), 2);
    }

    #[test]
    fn test_counter_starts_at_zero() {
        let backend = backend();
        let ctx = backend.create_context(Dimensions::new());
        assert_eq!(backend.counter("requests", &ctx), 0);
    }

    #[test]
    fn test_counter_add() {
        let backend = backend();
        let ctx = backend.create_context(Dimensions::new());

        backend.add("requests", 1, &ctx);
        backend.add("requests", 2, &ctx);

        assert_eq!(backend.counter("requests", &ctx), 3);
    }

    #[test]
    fn test_counters_are_per_context() {
        let backend = backend();
        let keys = DimensionKeys::default();
        let a = backend.create_context(keys.connector("a", 1));
        let b = backend.create_context(keys.connector("b", 2));

        backend.add("requests", 5, &a);

        assert_eq!(backend.counter("requests", &a), 5);
        assert_eq!(backend.counter("requests", &b), 0);
    }

    #[test]
    fn test_gauge_set_overwrites() {
        let backend = backend();
        let ctx = backend.create_context(Dimensions::new());

        assert!(backend.gauge("active", &ctx).is_none());
        backend.set("active", 4.0, &ctx);
        backend.set("active", 2.5, &ctx);

        assert_eq!(backend.gauge("active", &ctx), Some(2.5));
    }

    #[test]
    fn test_export_prometheus_orders_labels() {
        let backend = backend();
        let keys = DimensionKeys::default();
        let ctx = backend.create_context(keys.request(
            "default",
            8080,
            &RequestDimensions::new("GET", "http"),
        ));

        backend.add("requests", 2, &ctx);
        backend.set("connections.active", 1.0, &ctx);

        let output = backend.export_prometheus();
        assert!(output.contains("# TYPE requests counter"));
        assert!(output.contains(
            "requests{name=\"default\",port=\"8080\",method=\"GET\",scheme=\"http\"} 2"
        ));
        assert!(output.contains("# TYPE connections_active gauge"));
    }

    #[test]
    fn test_export_prometheus_empty() {
        assert!(backend().export_prometheus().is_empty());
    }

    #[test]
    fn test_concurrent_adds() {
        use std::thread;

        let backend = Arc::new(backend());
        let ctx = backend.create_context(Dimensions::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = backend.clone();
                let c = ctx.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        b.add("requests", 1, &c);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(backend.counter("requests", &ctx), 4000);
    }
}
