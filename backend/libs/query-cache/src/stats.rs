//! Per-instance statistics for cache operations

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Maximum fetch latency samples kept for percentile estimation
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Snapshot of cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    /// Misses served by another caller's in-flight fetch
    pub coalesced: u64,
    pub fetch_errors: u64,
    pub fetch_p50_ms: f64,
    pub fetch_p99_ms: f64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe statistics collector
#[derive(Clone, Default)]
pub struct StatsCollector {
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
    invalidations: Arc<AtomicU64>,
    coalesced: Arc<AtomicU64>,
    fetch_errors: Arc<AtomicU64>,
    latencies: Arc<Mutex<Vec<f64>>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record fetch latency (in milliseconds)
    pub fn record_latency(&self, latency_ms: f64) {
        let mut latencies = self.latencies.lock();
        latencies.push(latency_ms);
        if latencies.len() > MAX_LATENCY_SAMPLES {
            latencies.drain(0..MAX_LATENCY_SAMPLES / 2);
        }
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> CacheStats {
        let (p50, p99) = {
            let mut latencies = self.latencies.lock();
            if latencies.is_empty() {
                (0.0, 0.0)
            } else {
                latencies.sort_by(|a, b| a.total_cmp(b));
                let last = latencies.len() - 1;
                let p50_idx = (latencies.len() as f64 * 0.50) as usize;
                let p99_idx = (latencies.len() as f64 * 0.99) as usize;
                (latencies[p50_idx.min(last)], latencies[p99_idx.min(last)])
            }
        };

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            fetch_p50_ms: p50,
            fetch_p99_ms: p99,
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.coalesced.store(0, Ordering::Relaxed);
        self.fetch_errors.store(0, Ordering::Relaxed);
        self.latencies.lock().clear();
    }
}
