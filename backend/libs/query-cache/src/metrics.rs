//! Cache metrics for observability

use prometheus::{CounterVec, Opts, Registry};
use std::borrow::Cow;
use std::sync::OnceLock;

use crate::keys::extract_resource;

static METRICS: OnceLock<CacheMetricsInner> = OnceLock::new();

struct CacheMetricsInner {
    hits: CounterVec,
    misses: CounterVec,
    writes: CounterVec,
    invalidations: CounterVec,
    fetch_errors: CounterVec,
}

impl CacheMetricsInner {
    fn new() -> Self {
        Self {
            hits: CounterVec::new(
                Opts::new("query_cache_hits_total", "Total cache hits"),
                &["resource"],
            )
            .expect("valid metric definition"),
            misses: CounterVec::new(
                Opts::new("query_cache_misses_total", "Total cache misses"),
                &["resource"],
            )
            .expect("valid metric definition"),
            writes: CounterVec::new(
                Opts::new("query_cache_writes_total", "Total cache writes"),
                &["resource"],
            )
            .expect("valid metric definition"),
            invalidations: CounterVec::new(
                Opts::new(
                    "query_cache_invalidations_total",
                    "Total cache entries invalidated",
                ),
                &["resource"],
            )
            .expect("valid metric definition"),
            fetch_errors: CounterVec::new(
                Opts::new(
                    "query_cache_fetch_errors_total",
                    "Total failed fetches behind cache misses",
                ),
                &["resource"],
            )
            .expect("valid metric definition"),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.hits.clone()))?;
        registry.register(Box::new(self.misses.clone()))?;
        registry.register(Box::new(self.writes.clone()))?;
        registry.register(Box::new(self.invalidations.clone()))?;
        registry.register(Box::new(self.fetch_errors.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static CacheMetricsInner {
    METRICS.get_or_init(CacheMetricsInner::new)
}

fn label(key: &str) -> Cow<'_, str> {
    extract_resource(key).unwrap_or(Cow::Borrowed("unknown"))
}

/// Cache metrics wrapper
#[derive(Clone, Default)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Register metrics with a Prometheus registry
    pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
        get_metrics().register(registry)
    }

    pub fn record_hit(&self, key: &str) {
        get_metrics().hits.with_label_values(&[&*label(key)]).inc();
    }

    pub fn record_miss(&self, key: &str) {
        get_metrics().misses.with_label_values(&[&*label(key)]).inc();
    }

    pub fn record_write(&self, key: &str) {
        get_metrics().writes.with_label_values(&[&*label(key)]).inc();
    }

    /// `pattern` labels the batch; a prefix carries its resource like a key does
    pub fn record_invalidations(&self, pattern: &str, count: usize) {
        if count == 0 {
            return;
        }
        get_metrics()
            .invalidations
            .with_label_values(&[&*label(pattern)])
            .inc_by(count as f64);
    }

    pub fn record_fetch_error(&self, key: &str) {
        get_metrics()
            .fetch_errors
            .with_label_values(&[&*label(key)])
            .inc();
    }
}
