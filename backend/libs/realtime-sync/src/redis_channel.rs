//! Redis pub/sub implementation of [`PushChannel`]
//!
//! Writers publish [`ChangeEvent`] JSON on `{prefix}:{resource}`; each opened
//! channel holds its own pub/sub connection for as long as its stream lives.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{ChannelMessage, ChannelSpec, ChannelStream, PushChannel};
use crate::config::SyncConfig;
use crate::error::ChannelError;
use crate::event::ChangeEvent;

/// Record field a subscription filter is compared against
pub const DEFAULT_FILTER_FIELD: &str = "parent_id";

const FORWARD_BUFFER: usize = 64;

pub struct RedisPushChannel {
    client: Client,
    prefix: String,
    filter_field: String,
}

impl RedisPushChannel {
    /// Does not connect; connections are made per opened channel
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self, ChannelError> {
        Ok(Self {
            client: Client::open(redis_url)?,
            prefix: prefix.into(),
            filter_field: DEFAULT_FILTER_FIELD.to_string(),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, ChannelError> {
        Self::new(&config.redis_url, config.channel_prefix.clone())
    }

    pub fn with_filter_field(mut self, field: impl Into<String>) -> Self {
        self.filter_field = field.into();
        self
    }

    pub fn channel_name(&self, resource: &str) -> String {
        channel_name(&self.prefix, resource)
    }
}

#[async_trait]
impl PushChannel for RedisPushChannel {
    async fn open(&self, spec: &ChannelSpec) -> Result<ChannelStream, ChannelError> {
        let name = self.channel_name(&spec.resource);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&name).await?;

        info!(channel = %name, channel_id = %spec.channel_id, "Subscribed to change channel");

        let (tx, rx) = mpsc::channel(FORWARD_BUFFER);
        let spec = spec.clone();
        let filter_field = self.filter_field.clone();

        let forwarder = tokio::spawn(async move {
            if tx.send(ChannelMessage::Subscribed).await.is_err() {
                return;
            }

            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload = match msg.get_payload::<String>() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = ?e, "Failed to get message payload");
                        continue;
                    }
                };

                let event: ChangeEvent = match serde_json::from_str(&payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = ?e, payload = %payload, "Skipping undecodable change event");
                        continue;
                    }
                };

                if !accepts(&spec, &filter_field, &event) {
                    continue;
                }

                if tx.send(ChannelMessage::Change(event)).await.is_err() {
                    return;
                }
            }

            warn!(channel_id = %spec.channel_id, "Change channel connection ended");
        });

        Ok(ChannelStream::from_receiver(rx, forwarder))
    }
}

fn channel_name(prefix: &str, resource: &str) -> String {
    format!("{}:{}", prefix, resource)
}

/// Whether `event` belongs to the subscription described by `spec`
fn accepts(spec: &ChannelSpec, filter_field: &str, event: &ChangeEvent) -> bool {
    if event.resource != spec.resource {
        return false;
    }
    match spec.filter.as_deref() {
        None => true,
        Some(filter) => {
            event.field(filter_field).as_deref() == Some(filter)
                || event.record_id().as_deref() == Some(filter)
        }
    }
}

/// Publishes change events for [`RedisPushChannel`] subscribers
#[derive(Clone)]
pub struct RedisChangePublisher {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisChangePublisher {
    pub async fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self, ChannelError> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    /// Returns number of subscribers that received the event
    pub async fn publish(&self, event: &ChangeEvent) -> Result<usize, ChannelError> {
        let channel = channel_name(&self.prefix, &event.resource);
        let payload = serde_json::to_string(event)?;

        let mut conn = self.conn.clone();
        let subscribers: usize = conn.publish(&channel, payload).await?;

        debug!(
            channel = %channel,
            operation = %event.operation,
            subscribers,
            "Change event published"
        );

        Ok(subscribers)
    }
}
