//! Metric Context Cache
//!
//! One context per connector and one per distinct (method, scheme).
//!
//! Entries are never evicted. The key space is the handful of methods and
//! schemes a server actually sees, so the map stays small for the life of
//! the connector.

use crate::domain::entities::MetricContextRef;
use crate::domain::ports::MetricsBackend;
use crate::domain::value_objects::{DimensionKeys, RequestDimensions};
use dashmap::DashMap;
use std::sync::Arc;

pub struct MetricContextCache {
    backend: Arc<dyn MetricsBackend>,
    keys: Arc<DimensionKeys>,
    name: String,
    port: u16,
    connector_ctx: MetricContextRef,
    requests: DashMap<RequestDimensions, MetricContextRef>,
}

impl MetricContextCache {
    /// Build the cache and its connector context.
    pub fn new(backend: Arc<dyn MetricsBackend>, keys: Arc<DimensionKeys>, name: &str, port: u16) -> Self {
        let connector_ctx = backend.create_context(keys.connector(name, port));
        Self {
            backend,
            keys,
            name: name.to_string(),
            port,
            connector_ctx,
            requests: DashMap::new(),
        }
    }

    pub fn connector_context(&self) -> MetricContextRef {
        self.connector_ctx.clone()
    }

    /// Context for a request shape, created on first use.
    ///
    /// Creation happens under the map's entry lock, so concurrent first
    /// lookups of one key build exactly one context.
    pub fn request_context(&self, method: &str, scheme: &str) -> MetricContextRef {
        let key = RequestDimensions::new(method, scheme);
        if let Some(ctx) = self.requests.get(&key) {
            return ctx.value().clone();
        }

        self.requests
            .entry(key.clone())
            .or_insert_with(|| {
                let dims = self.keys.request(&self.name, self.port, &key);
                tracing::debug!("creating metric context for {} on {}", key, self.name);
                self.backend.create_context(dims)
            })
            .value()
            .clone()
    }

    /// Number of cached request contexts.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
