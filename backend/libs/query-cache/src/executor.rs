//! Query executor
//!
//! Wraps an arbitrary async read with cache-check / cache-populate semantics.
//! With single-flight enabled, concurrent misses on one key queue behind a
//! per-key gate: the first caller fetches, the others re-check the cache once
//! the gate opens and are served the value it stored. Failed fetches are never
//! shared or cached, so a waiter behind a failed leader fetches for itself.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::store::CacheStore;
use crate::QueryError;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub single_flight: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            single_flight: true,
        }
    }
}

impl From<&CacheConfig> for ExecutorConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            single_flight: config.single_flight,
        }
    }
}

type GateMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Cache-aware read executor
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<CacheStore>,
    config: ExecutorConfig,
    gates: GateMap,
}

impl QueryExecutor {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self::with_config(store, ExecutorConfig::default())
    }

    pub fn with_config(store: Arc<CacheStore>, config: ExecutorConfig) -> Self {
        Self {
            store,
            config,
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Serve `key` from cache, or run `fetch` once and cache its success.
    ///
    /// A failed fetch leaves the cache untouched and comes back as
    /// [`QueryError::FetchFailed`] carrying the caller's error.
    pub async fn execute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, QueryError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.store.get_as::<T>(key) {
            return Ok(value);
        }

        if !self.config.single_flight {
            return self.fetch_and_store(key, ttl, fetch).await;
        }

        let _gate = self.enter_gate(key).await;
        if let Some(value) = self.store.peek_as::<T>(key) {
            debug!(key = %key, "Served by in-flight fetch");
            self.store.stats_collector().record_coalesced();
            return Ok(value);
        }
        self.fetch_and_store(key, ttl, fetch).await
    }

    /// Always run `fetch` and replace the cached entry on success
    pub async fn fetch_fresh<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, QueryError<E>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.fetch_and_store(key, ttl, fetch).await
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.store.delete(key)
    }

    pub fn invalidate_by_prefix(&self, pattern: &str) -> usize {
        self.store.delete_by_prefix(pattern)
    }

    /// Number of keys with a fetch currently in progress or queued
    pub fn in_flight(&self) -> usize {
        self.gates.lock().len()
    }

    async fn fetch_and_store<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, QueryError<E>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        match fetch().await {
            Ok(value) => {
                let stats = self.store.stats_collector();
                stats.record_latency(started.elapsed().as_secs_f64() * 1000.0);
                if let Err(e) = self.store.set_as(key, &value, ttl) {
                    warn!(key = %key, error = %e, "Fetched value not cacheable");
                }
                Ok(value)
            }
            Err(e) => {
                debug!(key = %key, "Fetch failed, cache left untouched");
                self.store.stats_collector().record_fetch_error();
                self.store.metrics().record_fetch_error(key);
                Err(QueryError::FetchFailed(e))
            }
        }
    }

    async fn enter_gate(&self, key: &str) -> GateGuard {
        let gate = {
            let mut gates = self.gates.lock();
            Arc::clone(
                gates
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = Arc::clone(&gate).lock_owned().await;

        GateGuard {
            gates: Arc::clone(&self.gates),
            key: key.to_string(),
            gate,
            guard: Some(guard),
        }
    }
}

/// Holds a key's gate; on drop, releases it and forgets the gate once unused.
///
/// Dropping also covers a caller cancelled mid-fetch.
struct GateGuard {
    gates: GateMap,
    key: String,
    gate: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut gates = self.gates.lock();
        // one reference in the map, one here: nobody else is queued
        if Arc::strong_count(&self.gate) == 2 {
            gates.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_gate_is_forgotten_after_use() {
        let executor = QueryExecutor::new(Arc::new(CacheStore::new()));

        let value: u32 = executor
            .execute("clients:1", TTL, || async { Ok::<_, String>(1) })
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_gate_is_forgotten_after_failure() {
        let executor = QueryExecutor::new(Arc::new(CacheStore::new()));

        let result = executor
            .execute::<u32, _, _, _>("clients:1", TTL, || async { Err("down") })
            .await;

        assert!(matches!(result, Err(QueryError::FetchFailed("down"))));
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_fetch_fresh_replaces_entry() {
        let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
        let calls = Arc::new(AtomicU32::new(0));

        for expected in 1..=2u32 {
            let calls = Arc::clone(&calls);
            let value = executor
                .fetch_fresh("clients:1", TTL, || async move {
                    Ok::<_, String>(calls.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await
                .unwrap();
            assert_eq!(value, expected);
        }

        assert_eq!(executor.store().get_as::<u32>("clients:1"), Some(2));
    }

    #[tokio::test]
    async fn test_config_from_cache_config() {
        let config = CacheConfig {
            single_flight: false,
            ..Default::default()
        };
        assert!(!ExecutorConfig::from(&config).single_flight);
    }
}
