//! Subscription handles, status and the consumer-facing event stream

use futures_util::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::channel::ChannelSpec;
use crate::error::SubscriptionError;
use crate::event::ChangeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Torn down by the consumer
    Unsubscribed,
    /// Reconnect attempts ran out
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Connecting,
    Subscribed,
    Error,
    Closed(CloseReason),
}

impl SubscriptionStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, SubscriptionStatus::Closed(_))
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionStatus::Connecting => write!(f, "connecting"),
            SubscriptionStatus::Subscribed => write!(f, "subscribed"),
            SubscriptionStatus::Error => write!(f, "error"),
            SubscriptionStatus::Closed(CloseReason::Unsubscribed) => write!(f, "closed"),
            SubscriptionStatus::Closed(CloseReason::Exhausted) => write!(f, "closed (exhausted)"),
        }
    }
}

/// Items of a [`ChangeStream`]
#[derive(Debug)]
pub enum SubscriptionEvent {
    Change(ChangeEvent),
    /// Sent once when retries run out; the stream ends after it
    Exhausted(SubscriptionError),
}

/// Shared view of one subscription.
///
/// Clones refer to the same subscription. Closed is terminal: once a handle
/// is closed no later status update is accepted.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    spec: ChannelSpec,
    status: watch::Sender<SubscriptionStatus>,
    retry_count: AtomicU32,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel_id", &self.inner.spec.channel_id)
            .field("status", &self.status())
            .field("retry_count", &self.retry_count())
            .finish()
    }
}

impl SubscriptionHandle {
    pub(crate) fn new(spec: ChannelSpec) -> Self {
        let (status, _) = watch::channel(SubscriptionStatus::Connecting);
        Self {
            inner: Arc::new(HandleInner {
                spec,
                status,
                retry_count: AtomicU32::new(0),
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.inner.spec.channel_id
    }

    pub fn resource(&self) -> &str {
        &self.inner.spec.resource
    }

    pub fn filter(&self) -> Option<&str> {
        self.inner.spec.filter.as_deref()
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.inner.spec
    }

    pub fn status(&self) -> SubscriptionStatus {
        *self.inner.status.borrow()
    }

    /// Reconnect attempts since the last successful subscribe
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        !self.status().is_closed()
    }

    /// Receiver notified on every status transition
    pub fn watch(&self) -> watch::Receiver<SubscriptionStatus> {
        self.inner.status.subscribe()
    }

    /// Wait until the status satisfies `predicate`
    pub async fn wait_for<P>(&self, predicate: P) -> SubscriptionStatus
    where
        P: Fn(SubscriptionStatus) -> bool,
    {
        let mut rx = self.watch();
        loop {
            let status = *rx.borrow_and_update();
            if predicate(status) {
                return status;
            }
            // the sender lives as long as `self`
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    /// Move to `status` unless already closed; returns whether it changed
    pub(crate) fn set_status(&self, status: SubscriptionStatus) -> bool {
        self.inner.status.send_if_modified(|current| {
            if current.is_closed() || *current == status {
                false
            } else {
                *current = status;
                true
            }
        })
    }

    /// Close with `reason`; only the first close takes effect
    pub(crate) fn close(&self, reason: CloseReason) -> bool {
        self.set_status(SubscriptionStatus::Closed(reason))
    }

    pub(crate) fn set_retry_count(&self, count: u32) {
        self.inner.retry_count.store(count, Ordering::SeqCst);
    }

    pub(crate) fn attach_driver(&self, driver: JoinHandle<()>) {
        *self.inner.driver.lock() = Some(driver);
    }

    pub(crate) fn take_driver(&self) -> Option<JoinHandle<()>> {
        self.inner.driver.lock().take()
    }
}

/// Change events for one subscription, in arrival order.
///
/// Ends after [`SubscriptionEvent::Exhausted`] or once the subscription is closed.
pub struct ChangeStream {
    rx: mpsc::Receiver<SubscriptionEvent>,
}

impl ChangeStream {
    pub(crate) fn new(rx: mpsc::Receiver<SubscriptionEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }
}

impl Stream for ChangeStream {
    type Item = SubscriptionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A live subscription: the handle to manage it and the stream to consume it
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub events: ChangeStream,
}

impl Subscription {
    pub fn into_parts(self) -> (SubscriptionHandle, ChangeStream) {
        (self.handle, self.events)
    }
}
