mod dashmap_metrics_backend;

pub use dashmap_metrics_backend::DashMapMetricsBackend;
