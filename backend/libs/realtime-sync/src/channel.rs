//! Push channel port
//!
//! The subscription manager opens channels through [`PushChannel`] and adds
//! the retry policy on top. Implementations report the backend's
//! acknowledgement, each change and any failure as [`ChannelMessage`]s; the
//! channel is torn down when its [`ChannelStream`] is dropped.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ChannelError;
use crate::event::ChangeEvent;

/// What to open: one watched resource, optionally narrowed by a filter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    /// Unique among all open subscriptions
    pub channel_id: String,
    pub resource: String,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// Backend acknowledged the subscription
    Subscribed,
    Change(ChangeEvent),
    /// Backend reported a failure; the channel is unusable afterwards
    Error(String),
}

/// Messages from one open channel
pub struct ChannelStream {
    inner: BoxStream<'static, ChannelMessage>,
    forwarder: Option<JoinHandle<()>>,
}

impl ChannelStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = ChannelMessage> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
            forwarder: None,
        }
    }

    /// Stream fed by a background task; the task is aborted when the stream is dropped
    pub fn from_receiver(rx: mpsc::Receiver<ChannelMessage>, forwarder: JoinHandle<()>) -> Self {
        let inner = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        })
        .boxed();

        Self {
            inner,
            forwarder: Some(forwarder),
        }
    }

    /// Stream that yields the given messages then ends
    pub fn from_messages(messages: Vec<ChannelMessage>) -> Self {
        Self::new(stream::iter(messages))
    }
}

impl Stream for ChannelStream {
    type Item = ChannelMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for ChannelStream {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

/// Server-push collaborator
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Open a channel for `spec`.
    ///
    /// Resolving `Ok` means the request went out; the backend confirms with
    /// [`ChannelMessage::Subscribed`] on the returned stream.
    async fn open(&self, spec: &ChannelSpec) -> Result<ChannelStream, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_from_messages_yields_in_order() {
        let event = ChangeEvent::insert("clients", json!({"id": 1}));
        let mut stream = ChannelStream::from_messages(vec![
            ChannelMessage::Subscribed,
            ChannelMessage::Change(event.clone()),
        ]);

        assert_eq!(stream.next().await, Some(ChannelMessage::Subscribed));
        assert_eq!(stream.next().await, Some(ChannelMessage::Change(event)));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_dropping_stream_aborts_forwarder() {
        let (tx, rx) = mpsc::channel(4);
        let (alive_tx, mut alive_rx) = mpsc::channel::<()>(1);
        let forwarder = tokio::spawn(async move {
            let _tx = tx;
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });

        let stream = ChannelStream::from_receiver(rx, forwarder);
        drop(stream);

        // the liveness sender is dropped with the aborted task
        let closed = tokio::time::timeout(std::time::Duration::from_secs(1), alive_rx.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }

    #[tokio::test]
    async fn test_receiver_stream_ends_when_sender_drops() {
        let (tx, rx) = mpsc::channel(4);
        let forwarder = tokio::spawn(async move {
            tx.send(ChannelMessage::Subscribed).await.ok();
        });

        let mut stream = ChannelStream::from_receiver(rx, forwarder);
        assert_eq!(stream.next().await, Some(ChannelMessage::Subscribed));
        assert_eq!(stream.next().await, None);
    }
}
