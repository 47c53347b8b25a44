//! Reconnect backoff for change subscriptions
//!
//! Delay before reconnect attempt `n + 1` is `min(base_delay * 2^n, max_delay)`,
//! optionally spread by ±30% jitter. The failure count only clears once a
//! channel proves healthy: it stays subscribed for `stable_after` or delivers a
//! change.
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Reconnect attempts allowed after consecutive failures
    pub max_retries: u32,
    /// Delay before the first reconnect
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Add random jitter to each delay (±30%)
    pub jitter: bool,
    /// How long a channel must stay subscribed before the failure count is cleared
    pub stable_after: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            jitter: false,
            stable_after: Duration::from_millis(10_000),
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait when `retry_count` reconnects have already been made
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }

    /// Whether another reconnect is allowed after `retry_count` reconnects
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Every delay the policy will wait before giving up
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|n| self.delay_for(n)).collect()
    }
}

fn apply_jitter(base: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor = 1.0 + rng.gen_range(-0.3..0.3);
    Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
}
