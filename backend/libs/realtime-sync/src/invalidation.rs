//! Cache invalidation driven by change subscriptions

use query_cache::{CacheConfig, QueryExecutor, QueryKey};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SubscriptionError;
use crate::event::ChangeEvent;
use crate::handle::{Subscription, SubscriptionEvent, SubscriptionHandle};

/// Maps a change to the cache key prefixes it makes stale
pub trait KeyMapper: Send + Sync + 'static {
    fn prefixes(&self, event: &ChangeEvent) -> Vec<String>;
}

impl<F> KeyMapper for F
where
    F: Fn(&ChangeEvent) -> Vec<String> + Send + Sync + 'static,
{
    fn prefixes(&self, event: &ChangeEvent) -> Vec<String> {
        self(event)
    }
}

/// Drops every cached read of the changed resource, plus the reads of
/// resources registered as depending on it.
#[derive(Debug, Clone, Default)]
pub struct ResourcePrefixes {
    dependents: HashMap<String, Vec<String>>,
    version: Option<u32>,
}

impl ResourcePrefixes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes matching the keys [`CacheConfig::key`] builds
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            dependents: HashMap::new(),
            version: config.key_version,
        }
    }

    /// Invalidate keys carrying schema version `version`
    pub fn versioned(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Also invalidate `dependent` whenever `resource` changes
    pub fn cascade(mut self, resource: &str, dependent: &str) -> Self {
        self.dependents
            .entry(resource.to_string())
            .or_default()
            .push(dependent.to_string());
        self
    }

    fn prefix(&self, resource: &str) -> String {
        let key = QueryKey::new(resource);
        match self.version {
            Some(version) => key.versioned(version).prefix(),
            None => key.prefix(),
        }
    }
}

impl KeyMapper for ResourcePrefixes {
    fn prefixes(&self, event: &ChangeEvent) -> Vec<String> {
        let mut prefixes = vec![self.prefix(&event.resource)];
        if let Some(dependents) = self.dependents.get(&event.resource) {
            prefixes.extend(dependents.iter().map(|r| self.prefix(r)));
        }
        prefixes
    }
}

/// Background task invalidating the cache for one subscription
pub struct InvalidationTask {
    handle: SubscriptionHandle,
    task: JoinHandle<Result<usize, SubscriptionError>>,
}

impl InvalidationTask {
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Wait for the subscription to end.
    ///
    /// Returns the number of entries invalidated, or the terminal error if
    /// the subscription ran out of retries.
    pub async fn join(self) -> Result<usize, SubscriptionError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SubscriptionError::TaskAborted(e.to_string())),
        }
    }

    /// Stop invalidating; the subscription itself stays open until unsubscribed
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Drain `subscription`, invalidating the prefixes `mapper` yields for each change
pub fn spawn_invalidation<M>(
    subscription: Subscription,
    executor: QueryExecutor,
    mapper: M,
) -> InvalidationTask
where
    M: KeyMapper,
{
    let (handle, mut events) = subscription.into_parts();
    let channel_id = handle.channel_id().to_string();

    let task = tokio::spawn(async move {
        let mut invalidated = 0;

        while let Some(event) = events.recv().await {
            match event {
                SubscriptionEvent::Change(change) => {
                    for prefix in mapper.prefixes(&change) {
                        let removed = executor.invalidate_by_prefix(&prefix);
                        invalidated += removed;
                        debug!(
                            channel_id = %channel_id,
                            operation = %change.operation,
                            prefix = %prefix,
                            removed,
                            "Invalidated on change"
                        );
                    }
                }
                SubscriptionEvent::Exhausted(err) => {
                    warn!(channel_id = %channel_id, "Cache no longer refreshed by live updates");
                    return Err(err);
                }
            }
        }

        Ok(invalidated)
    });

    InvalidationTask { handle, task }
}
