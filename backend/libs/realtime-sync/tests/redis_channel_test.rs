//! Redis pub/sub round trips
//!
//! These tests require a running Redis instance.
//! Run with: cargo test --test redis_channel_test -- --ignored

use realtime_sync::{
    ChangeEvent, ChangeOperation, RedisChangePublisher, RedisPushChannel, Subscription,
    SubscriptionEvent, SubscriptionManager, SubscriptionStatus, SyncConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const REDIS_URL: &str = "redis://127.0.0.1:6379";

fn config(prefix: &str) -> SyncConfig {
    SyncConfig {
        redis_url: REDIS_URL.to_string(),
        channel_prefix: prefix.to_string(),
        ..Default::default()
    }
}

async fn next_change(subscription: &mut Subscription) -> ChangeEvent {
    let event = tokio::time::timeout(Duration::from_secs(2), subscription.events.recv())
        .await
        .expect("Timed out waiting for change");

    match event {
        Some(SubscriptionEvent::Change(change)) => change,
        other => panic!("expected change, got {:?}", other),
    }
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_publish_and_receive_change() {
    let config = config("test-changes-basic");
    let channel = RedisPushChannel::from_config(&config).expect("Failed to create channel");
    let manager = SubscriptionManager::new(Arc::new(channel), &config).unwrap();
    let publisher = RedisChangePublisher::new(REDIS_URL, config.channel_prefix.clone())
        .await
        .expect("Failed to create publisher");

    let mut subscription = manager.subscribe("clients", None);
    subscription
        .handle
        .wait_for(|s| s == SubscriptionStatus::Subscribed)
        .await;

    let subscribers = publisher
        .publish(&ChangeEvent::update("clients", json!({"id": 42, "name": "Acme"})))
        .await
        .expect("Failed to publish");
    assert!(subscribers > 0, "No subscribers received the change");

    let change = next_change(&mut subscription).await;
    assert_eq!(change.operation, ChangeOperation::Update);
    assert_eq!(change.record_id(), Some("42".to_string()));
    assert_eq!(change.channel_id, subscription.handle.channel_id());

    manager.unsubscribe(&subscription.handle);
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_filtered_subscription_skips_other_parents() {
    let config = config("test-changes-filter");
    let channel = RedisPushChannel::from_config(&config).expect("Failed to create channel");
    let manager = SubscriptionManager::new(Arc::new(channel), &config).unwrap();
    let publisher = RedisChangePublisher::new(REDIS_URL, config.channel_prefix.clone())
        .await
        .expect("Failed to create publisher");

    let mut subscription = manager.subscribe("contacts", Some("7"));
    subscription
        .handle
        .wait_for(|s| s == SubscriptionStatus::Subscribed)
        .await;

    publisher
        .publish(&ChangeEvent::insert("contacts", json!({"id": 1, "parent_id": 8})))
        .await
        .expect("Failed to publish");
    publisher
        .publish(&ChangeEvent::insert("contacts", json!({"id": 2, "parent_id": 7})))
        .await
        .expect("Failed to publish");

    let change = next_change(&mut subscription).await;
    assert_eq!(change.record_id(), Some("2".to_string()));

    manager.unsubscribe_all();
}
