//! In-memory cache store
//!
//! Maps serialized query keys to JSON payloads with a per-entry TTL. Expiry is
//! lazy: a stale entry reads as a miss and stays in the map until it is
//! overwritten, invalidated, cleared or swept by [`CacheStore::purge_expired`].

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::metrics::CacheMetrics;
use crate::stats::{CacheStats, StatsCollector};
use crate::{CacheError, CacheResult};

/// A cached payload and its expiry metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    /// Rust type the payload was written from, when written through [`CacheStore::set_as`]
    pub type_tag: Option<&'static str>,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Fresh while `now - stored_at <= ttl`
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) <= self.ttl
    }

    fn decode<T: DeserializeOwned>(&self) -> CacheResult<T> {
        let expected = type_name::<T>();
        if let Some(found) = self.type_tag {
            if found != expected {
                return Err(CacheError::TypeMismatch {
                    key: self.key.clone(),
                    expected,
                    found,
                });
            }
        }
        Ok(T::deserialize(&self.value)?)
    }
}

/// Process-wide query cache.
///
/// Built once by the composition root and shared as `Arc<CacheStore>`. All
/// operations are synchronous and never fail.
pub struct CacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    stats: StatsCollector,
    metrics: CacheMetrics,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            stats: StatsCollector::new(),
            metrics: CacheMetrics::new(),
        }
    }

    /// Get the raw payload if present and fresh
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let value = self
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_fresh_at(now))
            .map(|entry| entry.value.clone());

        self.record_lookup(key, value.is_some());
        value
    }

    /// Get a typed payload if present and fresh.
    ///
    /// An entry written from a different type, or whose payload no longer
    /// decodes, is dropped and reported as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.peek_as(key);
        self.record_lookup(key, value.is_some());
        value
    }

    /// Typed read that leaves hit/miss counters alone
    pub(crate) fn peek_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let (error, stale) = {
            let entries = self.entries.read();
            let entry = entries.get(key).filter(|entry| entry.is_fresh_at(now))?;
            match entry.decode::<T>() {
                Ok(value) => return Some(value),
                Err(e) => (e, entry.clone()),
            }
        };

        warn!(key = %key, error = %error, "Dropping undecodable cache entry");
        self.remove_if_unchanged(&stale);
        None
    }

    /// Remove `stale` only if it is still the entry stored under its key.
    ///
    /// A `set` that landed between the failed read and this write lock wins.
    fn remove_if_unchanged(&self, stale: &CacheEntry) -> bool {
        let mut entries = self.entries.write();
        let unchanged = entries.get(&stale.key).is_some_and(|current| {
            current.stored_at == stale.stored_at
                && current.type_tag == stale.type_tag
                && current.value == stale.value
        });
        if unchanged {
            entries.remove(&stale.key);
        }
        unchanged
    }

    /// Insert or replace the entry for `key`
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        self.insert(key.into(), value, None, ttl);
    }

    /// Serialize and store a typed payload
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T, ttl: Duration) -> CacheResult<()> {
        let payload = serde_json::to_value(value)?;
        self.insert(key.into(), payload, Some(type_name::<T>()), ttl);
        Ok(())
    }

    fn insert(&self, key: String, value: Value, type_tag: Option<&'static str>, ttl: Duration) {
        let entry = CacheEntry {
            key: key.clone(),
            value,
            type_tag,
            stored_at: self.clock.now(),
            ttl,
        };

        debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Cache set");
        self.stats.record_write();
        self.metrics.record_write(&key);
        self.entries.write().insert(key, entry);
    }

    /// Remove exactly one entry; returns whether it existed
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            debug!(key = %key, "Cache delete");
            self.stats.record_invalidations(1);
            self.metrics.record_invalidations(key, 1);
        }
        removed
    }

    /// Remove every entry whose key starts with `pattern`.
    ///
    /// A trailing `*` is accepted and ignored, so `clients:*` and `clients:`
    /// are equivalent. Returns the number of entries removed.
    pub fn delete_by_prefix(&self, pattern: &str) -> usize {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);

        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|key, _| !key.starts_with(prefix));
            before - entries.len()
        };

        debug!(pattern = %pattern, deleted = removed, "Cache prefix delete");
        self.stats.record_invalidations(removed as u64);
        self.metrics.record_invalidations(prefix, removed);
        removed
    }

    /// Remove all entries
    pub fn clear(&self) -> usize {
        let removed = {
            let mut entries = self.entries.write();
            let count = entries.len();
            entries.clear();
            count
        };

        debug!(deleted = removed, "Cache cleared");
        self.stats.record_invalidations(removed as u64);
        removed
    }

    /// Sweep stale entries eagerly; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh_at(now));
        before - entries.len()
    }

    /// Whether a fresh entry exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .read()
            .get(key)
            .is_some_and(|entry| entry.is_fresh_at(now))
    }

    /// Number of stored entries, stale ones included until swept
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Sorted keys of all fresh entries
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.is_fresh_at(now))
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub(crate) fn stats_collector(&self) -> &StatsCollector {
        &self.stats
    }

    pub(crate) fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    fn record_lookup(&self, key: &str, hit: bool) {
        if hit {
            debug!(key = %key, "Cache hit");
            self.stats.record_hit();
            self.metrics.record_hit(key);
        } else {
            debug!(key = %key, "Cache miss");
            self.stats.record_miss();
            self.metrics.record_miss(key);
        }
    }
}
