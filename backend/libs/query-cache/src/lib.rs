//! Client-side query cache
//!
//! Memoizes backend reads and drops them again when writes or change
//! notifications make them stale:
//! - [`CacheStore`]: key → JSON payload with per-entry TTL, prefix invalidation
//! - [`QueryExecutor`]: cache-check / fetch / populate, single-flight per key
//! - [`MutationCoordinator`]: write, then invalidate the affected key prefixes
//! - [`QueryKey`]: deterministic keys from an ordered parameter tuple
//!
//! # Example
//!
//! ```
//! use query_cache::{ttl, CacheStore, MutationCoordinator, MutationRecord, QueryExecutor, QueryKey};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = Arc::new(CacheStore::new());
//! let executor = QueryExecutor::new(Arc::clone(&store));
//!
//! let key = QueryKey::new("clients").param(42).build();
//! let name: String = executor
//!     .execute(&key, ttl::STANDARD, || async { Ok::<_, std::io::Error>("Acme".to_string()) })
//!     .await
//!     .unwrap();
//! assert_eq!(name, "Acme");
//!
//! let mutations = MutationCoordinator::new(executor.clone());
//! mutations
//!     .mutate(
//!         || async { Ok::<_, std::io::Error>(()) },
//!         &MutationRecord::new().entity("clients", 42),
//!     )
//!     .await
//!     .unwrap();
//! assert!(!store.contains(&key));
//! # }
//! ```

mod clock;
mod config;
mod error;
mod executor;
mod keys;
mod metrics;
mod mutation;
mod stats;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, TtlTier};
pub use error::{CacheError, CacheResult, QueryError};
pub use executor::{ExecutorConfig, QueryExecutor};
pub use keys::{
    entity_prefix, extract_resource, parse_key, resource_prefix, resources, validate_key,
    QueryKey, CACHE_VERSION,
};
pub use metrics::CacheMetrics;
pub use mutation::{MutationCoordinator, MutationRecord};
pub use stats::{CacheStats, StatsCollector};
pub use store::{CacheEntry, CacheStore};

/// Default TTL tiers
pub mod ttl {
    use std::time::Duration;

    pub const SHORT: Duration = Duration::from_secs(5 * 60);
    pub const STANDARD: Duration = Duration::from_secs(15 * 60);
    pub const LONG: Duration = Duration::from_secs(60 * 60);
}
