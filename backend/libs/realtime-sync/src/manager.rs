//! Change subscription manager
//!
//! Each subscription is driven by its own task through
//! `Connecting -> Subscribed`, falling to `Error` on any channel failure and
//! reconnecting with exponential backoff until the retry budget is spent.

use dashmap::DashMap;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::channel::{ChannelMessage, ChannelSpec, PushChannel};
use crate::config::SyncConfig;
use crate::error::{ChannelError, SubscriptionError};
use crate::handle::{
    ChangeStream, CloseReason, Subscription, SubscriptionEvent, SubscriptionHandle,
    SubscriptionStatus,
};
use crate::metrics::SyncMetrics;
use crate::stats::{SyncStats, SyncStatsCollector};

type ActiveMap = Arc<DashMap<String, SubscriptionHandle>>;

/// Opens and tracks change subscriptions over one [`PushChannel`].
///
/// Dropping the manager closes every subscription it still tracks.
pub struct SubscriptionManager {
    channel: Arc<dyn PushChannel>,
    policy: BackoffPolicy,
    event_buffer: usize,
    instance_id: String,
    next_id: AtomicU64,
    active: ActiveMap,
    stats: SyncStatsCollector,
    metrics: SyncMetrics,
}

impl SubscriptionManager {
    pub fn new(channel: Arc<dyn PushChannel>, config: &SyncConfig) -> Result<Self, SubscriptionError> {
        config.validate()?;

        Ok(Self {
            channel,
            policy: config.backoff(),
            event_buffer: config.event_buffer,
            instance_id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            next_id: AtomicU64::new(1),
            active: Arc::new(DashMap::new()),
            stats: SyncStatsCollector::new(),
            metrics: SyncMetrics::new(),
        })
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Subscribe to changes of `resource`, optionally narrowed by `filter`.
    ///
    /// Returns immediately in `Connecting`; the connection is made in the
    /// background. Must be called within a tokio runtime.
    pub fn subscribe(&self, resource: &str, filter: Option<&str>) -> Subscription {
        let spec = ChannelSpec {
            channel_id: self.next_channel_id(resource, filter),
            resource: resource.to_string(),
            filter: filter.map(str::to_string),
        };
        let handle = SubscriptionHandle::new(spec);
        let (tx, rx) = mpsc::channel(self.event_buffer);

        self.active
            .insert(handle.channel_id().to_string(), handle.clone());
        self.stats.record_open();

        let driver = Driver {
            channel: Arc::clone(&self.channel),
            handle: handle.clone(),
            policy: self.policy.clone(),
            events: tx,
            active: Arc::clone(&self.active),
            stats: self.stats.clone(),
            metrics: self.metrics.clone(),
        };
        handle.attach_driver(tokio::spawn(driver.run()));

        info!(
            channel_id = %handle.channel_id(),
            resource = %resource,
            filter = ?filter,
            "Subscription opened"
        );

        Subscription {
            handle,
            events: ChangeStream::new(rx),
        }
    }

    /// Tear down a subscription.
    ///
    /// Cancels any pending reconnect and closes the channel. Safe to call
    /// more than once and on subscriptions that already gave up.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Some(driver) = handle.take_driver() {
            driver.abort();
        }
        self.active.remove(handle.channel_id());

        if handle.close(CloseReason::Unsubscribed) {
            info!(channel_id = %handle.channel_id(), "Unsubscribed");
        }
    }

    /// Tear down every tracked subscription; returns how many were open
    pub fn unsubscribe_all(&self) -> usize {
        let handles: Vec<SubscriptionHandle> =
            self.active.iter().map(|entry| entry.value().clone()).collect();

        for handle in &handles {
            self.unsubscribe(handle);
        }
        handles.len()
    }

    /// Subscriptions not yet closed
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.snapshot()
    }

    fn next_channel_id(&self, resource: &str, filter: Option<&str>) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}:{}:{}:{}",
            self.instance_id,
            resource,
            filter.unwrap_or("*"),
            n
        )
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

/// Background task behind one subscription
struct Driver {
    channel: Arc<dyn PushChannel>,
    handle: SubscriptionHandle,
    policy: BackoffPolicy,
    events: mpsc::Sender<SubscriptionEvent>,
    active: ActiveMap,
    stats: SyncStatsCollector,
    metrics: SyncMetrics,
}

/// Why a connection stopped without a channel failure
enum Stop {
    ConsumerGone,
}

impl Driver {
    async fn run(self) {
        let mut retry_count: u32 = 0;

        loop {
            self.handle.set_status(SubscriptionStatus::Connecting);

            let failure = match self.connect(&mut retry_count).await {
                Ok(Stop::ConsumerGone) => {
                    self.finish();
                    return;
                }
                Err(e) => e,
            };

            self.stats.record_failure();
            self.handle.set_status(SubscriptionStatus::Error);

            if !self.policy.allows_retry(retry_count) {
                self.exhaust(retry_count).await;
                return;
            }

            let delay = self.policy.delay_for(retry_count);
            warn!(
                channel_id = %self.handle.channel_id(),
                error = %failure,
                retry = retry_count + 1,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Subscription failed, reconnecting"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.events.closed() => {
                    self.finish();
                    return;
                }
            }

            retry_count += 1;
            self.handle.set_retry_count(retry_count);
            self.stats.record_reconnect();
            self.metrics.record_reconnect(self.handle.resource());
        }
    }

    /// Open the channel and pump it until it fails or the consumer goes away.
    ///
    /// An acknowledgement alone does not clear `retry_count`; a channel that
    /// acks and drops straight away keeps counting towards exhaustion.
    async fn connect(&self, retry_count: &mut u32) -> Result<Stop, ChannelError> {
        let mut stream = self.channel.open(self.handle.spec()).await?;
        let mut stable_at: Option<Instant> = None;

        loop {
            let message = tokio::select! {
                message = stream.next() => message,
                _ = self.events.closed() => return Ok(Stop::ConsumerGone),
                _ = sleep_until(stable_at.unwrap_or_else(Instant::now)), if stable_at.is_some() => {
                    stable_at = None;
                    self.mark_stable(retry_count);
                    continue;
                }
            };

            match message {
                Some(ChannelMessage::Subscribed) => {
                    if self.handle.set_status(SubscriptionStatus::Subscribed) {
                        info!(channel_id = %self.handle.channel_id(), "Subscribed to changes");
                    }
                    if *retry_count > 0 {
                        stable_at = Some(Instant::now() + self.policy.stable_after);
                    }
                }
                Some(ChannelMessage::Change(mut event)) => {
                    stable_at = None;
                    self.mark_stable(retry_count);

                    event.channel_id = self.handle.channel_id().to_string();
                    debug!(
                        channel_id = %event.channel_id,
                        operation = %event.operation,
                        record_id = ?event.record_id(),
                        "Change received"
                    );
                    if self
                        .events
                        .send(SubscriptionEvent::Change(event))
                        .await
                        .is_err()
                    {
                        return Ok(Stop::ConsumerGone);
                    }
                    self.stats.record_event();
                    self.metrics.record_event(self.handle.resource());
                }
                Some(ChannelMessage::Error(reason)) => return Err(ChannelError::Rejected(reason)),
                None => return Err(ChannelError::Disconnected),
            }
        }
    }

    fn mark_stable(&self, retry_count: &mut u32) {
        if *retry_count == 0 {
            return;
        }
        debug!(
            channel_id = %self.handle.channel_id(),
            retries = *retry_count,
            "Channel recovered, retry budget restored"
        );
        *retry_count = 0;
        self.handle.set_retry_count(0);
    }

    async fn exhaust(&self, attempts: u32) {
        let channel_id = self.handle.channel_id().to_string();
        let resource = self.handle.resource().to_string();

        error!(
            channel_id = %channel_id,
            resource = %resource,
            attempts,
            "Live updates stopped after exhausting reconnect attempts"
        );
        self.stats.record_exhausted();
        self.metrics.record_exhausted(&resource);

        self.handle.close(CloseReason::Exhausted);
        self.active.remove(&channel_id);

        let err = SubscriptionError::Exhausted {
            channel_id,
            resource,
            attempts,
        };
        // consumer may already be gone
        let _ = self.events.send(SubscriptionEvent::Exhausted(err)).await;
    }

    fn finish(&self) {
        self.active.remove(self.handle.channel_id());
        if self.handle.close(CloseReason::Unsubscribed) {
            debug!(
                channel_id = %self.handle.channel_id(),
                "Change stream dropped, subscription closed"
            );
        }
    }
}
