//! Realtime change subscriptions for the query cache
//!
//! Keeps cached reads in step with server-side writes made by other
//! clients.
//!
//! # Architecture
//!
//! ```text
//! Backend writer:
//!   1. Update a contract row
//!   2. PUBLISH changes:contracts {"operation":"update","resource":"contracts","record":{...}}
//!      ↓
//! PushChannel (Redis pub/sub)
//!      ↓
//! SubscriptionManager (one driver task per subscription):
//!   3. Connecting → Subscribed, reconnecting with backoff on failure
//!   4. Forward the change on the subscription's ChangeStream
//!      ↓
//! spawn_invalidation:
//!   5. Drop the stale prefixes through the QueryExecutor
//! ```
//!
//! # Example
//!
//! ```no_run
//! use query_cache::{CacheStore, QueryExecutor};
//! use realtime_sync::{
//!     spawn_invalidation, RedisPushChannel, ResourcePrefixes, SubscriptionManager, SyncConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::from_env();
//!     let channel = Arc::new(RedisPushChannel::from_config(&config)?);
//!     let manager = SubscriptionManager::new(channel, &config)?;
//!
//!     let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
//!     let task = spawn_invalidation(
//!         manager.subscribe("contracts", None),
//!         executor,
//!         ResourcePrefixes::new().cascade("contracts", "clients"),
//!     );
//!
//!     // logout
//!     manager.unsubscribe(task.handle());
//!     task.join().await?;
//!     Ok(())
//! }
//! ```

mod backoff;
mod channel;
mod config;
mod error;
mod event;
mod handle;
mod invalidation;
mod manager;
mod metrics;
mod redis_channel;
mod stats;

pub use backoff::BackoffPolicy;
pub use channel::{ChannelMessage, ChannelSpec, ChannelStream, PushChannel};
pub use config::SyncConfig;
pub use error::{ChannelError, SubscriptionError};
pub use event::{ChangeEvent, ChangeOperation};
pub use handle::{
    ChangeStream, CloseReason, Subscription, SubscriptionEvent, SubscriptionHandle,
    SubscriptionStatus,
};
pub use invalidation::{spawn_invalidation, InvalidationTask, KeyMapper, ResourcePrefixes};
pub use manager::SubscriptionManager;
pub use metrics::SyncMetrics;
pub use redis_channel::{RedisChangePublisher, RedisPushChannel, DEFAULT_FILTER_FIELD};
pub use stats::{SyncStats, SyncStatsCollector};
