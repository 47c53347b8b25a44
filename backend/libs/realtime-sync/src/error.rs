//! Error types for change subscriptions

use thiserror::Error;

/// Failures reported by a push channel
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Redis connection or operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Message serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend refused or dropped the channel
    #[error("Channel rejected: {0}")]
    Rejected(String),

    /// The channel stream ended without a teardown request
    #[error("Channel disconnected")]
    Disconnected,
}

/// Subscription-level errors
#[derive(Error, Debug)]
pub enum SubscriptionError {
    /// A single channel failure, retried automatically
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Retries ran out; the watched data no longer refreshes on its own
    #[error(
        "Live updates for {resource} stopped after {attempts} reconnect attempts (channel {channel_id}); data may be stale, refresh manually"
    )]
    Exhausted {
        channel_id: String,
        resource: String,
        attempts: u32,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Background task was cancelled or panicked
    #[error("Subscription task aborted: {0}")]
    TaskAborted(String),
}

impl SubscriptionError {
    /// Terminal errors need a user-facing "refresh manually" affordance
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionError::Exhausted { .. })
    }
}
