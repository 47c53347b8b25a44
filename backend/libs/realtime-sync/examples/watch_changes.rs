//! Example: Keeping a query cache in step with Redis change events
//!
//! Run with: cargo run --example watch_changes
//! Publish with: redis-cli PUBLISH changes:clients '{"operation":"update","resource":"clients","record":{"id":1}}'

use query_cache::{CacheConfig, CacheStore, QueryExecutor, TtlTier};
use realtime_sync::{
    spawn_invalidation, RedisPushChannel, ResourcePrefixes, SubscriptionManager,
    SubscriptionStatus, SyncConfig,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,realtime_sync=debug".into()),
        )
        .init();

    let config = SyncConfig::from_env();
    config.validate()?;

    let store = Arc::new(CacheStore::new());
    let executor = QueryExecutor::new(Arc::clone(&store));

    let cache_config = CacheConfig::from_env();
    let key = cache_config.key("clients").op("list").build();
    let clients: Vec<String> = executor
        .execute(&key, cache_config.ttl(TtlTier::Standard), || async {
            Ok::<_, anyhow::Error>(vec!["Acme".to_string(), "Globex".to_string()])
        })
        .await
        .map_err(|e| e.into_inner())?;
    println!("Cached {} clients under {}", clients.len(), key);

    let channel = Arc::new(RedisPushChannel::from_config(&config)?);
    let manager = SubscriptionManager::new(channel, &config)?;
    let task = spawn_invalidation(
        manager.subscribe("clients", None),
        executor,
        ResourcePrefixes::from_config(&cache_config).cascade("contracts", "clients"),
    );

    let status = task
        .handle()
        .wait_for(|s| s == SubscriptionStatus::Subscribed || s.is_closed())
        .await;
    println!("Subscription {}: {}", task.handle().channel_id(), status);
    println!("Listening for changes. Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            manager.unsubscribe_all();
        }
        _ = task.handle().wait_for(|s| s.is_closed()) => {}
    }

    let invalidated = task.join().await?;
    println!("Invalidated {} entries, {} still cached", invalidated, store.len());
    println!("{:?}", manager.stats());

    Ok(())
}
