//! Statistics tracking for change subscriptions

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters across every subscription of one manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub subscriptions_opened: u64,
    pub events_delivered: u64,
    pub channel_failures: u64,
    pub reconnect_attempts: u64,
    pub exhaustions: u64,
}

/// Thread-safe statistics collector
#[derive(Clone, Default)]
pub struct SyncStatsCollector {
    subscriptions_opened: Arc<AtomicU64>,
    events_delivered: Arc<AtomicU64>,
    channel_failures: Arc<AtomicU64>,
    reconnect_attempts: Arc<AtomicU64>,
    exhaustions: Arc<AtomicU64>,
}

impl SyncStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(&self) {
        self.subscriptions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.channel_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> SyncStats {
        SyncStats {
            subscriptions_opened: self.subscriptions_opened.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            channel_failures: self.channel_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            exhaustions: self.exhaustions.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.subscriptions_opened.store(0, Ordering::Relaxed);
        self.events_delivered.store(0, Ordering::Relaxed);
        self.channel_failures.store(0, Ordering::Relaxed);
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        self.exhaustions.store(0, Ordering::Relaxed);
    }
}
