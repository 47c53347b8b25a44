//! Subscription configuration

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::SubscriptionError;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Reconnect attempts before a subscription gives up
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_jitter: bool,
    /// Time a connection must stay up, without delivering a change, to count as recovered
    pub stable_after: Duration,
    /// Change events buffered per subscription before the driver waits on the consumer
    pub event_buffer: usize,
    /// Redis URL for the pub/sub push channel
    pub redis_url: String,
    /// Pub/sub channel name prefix; resources publish on `{prefix}:{resource}`
    pub channel_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_jitter: false,
            stable_after: Duration::from_millis(10_000),
            event_buffer: 64,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            channel_prefix: "changes".to_string(),
        }
    }
}

impl SyncConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `REALTIME_MAX_RETRIES`
    /// - `REALTIME_BASE_DELAY_MS`
    /// - `REALTIME_MAX_DELAY_MS`
    /// - `REALTIME_BACKOFF_JITTER`: true/false
    /// - `REALTIME_STABLE_AFTER_MS`
    /// - `REALTIME_EVENT_BUFFER`
    /// - `REALTIME_REDIS_URL`
    /// - `REALTIME_CHANNEL_PREFIX`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_retries: env_parse("REALTIME_MAX_RETRIES").unwrap_or(defaults.max_retries),
            base_delay: env_parse("REALTIME_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: env_parse("REALTIME_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            backoff_jitter: env_parse("REALTIME_BACKOFF_JITTER").unwrap_or(defaults.backoff_jitter),
            stable_after: env_parse("REALTIME_STABLE_AFTER_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.stable_after),
            event_buffer: env_parse("REALTIME_EVENT_BUFFER").unwrap_or(defaults.event_buffer),
            redis_url: std::env::var("REALTIME_REDIS_URL").unwrap_or(defaults.redis_url),
            channel_prefix: std::env::var("REALTIME_CHANNEL_PREFIX")
                .unwrap_or(defaults.channel_prefix),
        }
    }

    pub fn validate(&self) -> Result<(), SubscriptionError> {
        if self.base_delay > self.max_delay {
            return Err(SubscriptionError::Configuration(format!(
                "base_delay ({:?}) exceeds max_delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        if self.stable_after.is_zero() {
            return Err(SubscriptionError::Configuration(
                "stable_after must be non-zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(SubscriptionError::Configuration(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: self.backoff_jitter,
            stable_after: self.stable_after,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
