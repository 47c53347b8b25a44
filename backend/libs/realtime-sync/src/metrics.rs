//! Prometheus counters for change subscriptions

use prometheus::{CounterVec, Opts, Registry};
use std::sync::OnceLock;

static METRICS: OnceLock<SyncMetricsInner> = OnceLock::new();

struct SyncMetricsInner {
    events: CounterVec,
    reconnects: CounterVec,
    exhausted: CounterVec,
}

impl SyncMetricsInner {
    fn new() -> Self {
        Self {
            events: CounterVec::new(
                Opts::new("realtime_sync_events_total", "Change events delivered"),
                &["resource"],
            )
            .expect("valid metric definition"),
            reconnects: CounterVec::new(
                Opts::new(
                    "realtime_sync_reconnects_total",
                    "Reconnect attempts after channel failures",
                ),
                &["resource"],
            )
            .expect("valid metric definition"),
            exhausted: CounterVec::new(
                Opts::new(
                    "realtime_sync_exhausted_total",
                    "Subscriptions closed after running out of retries",
                ),
                &["resource"],
            )
            .expect("valid metric definition"),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.events.clone()))?;
        registry.register(Box::new(self.reconnects.clone()))?;
        registry.register(Box::new(self.exhausted.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static SyncMetricsInner {
    METRICS.get_or_init(SyncMetricsInner::new)
}

#[derive(Clone, Default)]
pub struct SyncMetrics;

impl SyncMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Register metrics with a Prometheus registry
    pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
        get_metrics().register(registry)
    }

    pub fn record_event(&self, resource: &str) {
        get_metrics().events.with_label_values(&[resource]).inc();
    }

    pub fn record_reconnect(&self, resource: &str) {
        get_metrics().reconnects.with_label_values(&[resource]).inc();
    }

    pub fn record_exhausted(&self, resource: &str) {
        get_metrics().exhausted.with_label_values(&[resource]).inc();
    }
}
