// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay connection

use std::sync::Arc;
use std::time::Duration;

use async_utility::time;
use nostr::{ClientMessage, Event, EventId, Filter, RelayUrl, SubscriptionId};
use tokio::sync::{mpsc, oneshot};

pub mod constants;
mod error;
mod inner;
pub mod options;
mod queue;
mod status;

pub use self::error::Error;
use self::inner::{Ack, InnerRelay};
pub use self::options::RelayOptions;
pub use self::status::RelayStatus;
use crate::pool::SubscriptionEvent;
use crate::transport::websocket::WebSocketTransport;

/// Snapshot of a connection's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayInspection {
    /// Relay URL
    pub url: RelayUrl,
    /// Connection status
    pub status: RelayStatus,
    /// Frames waiting for an open socket
    pub queue_len: usize,
    /// Open subscriptions
    pub subscriptions: usize,
    /// Published events waiting for an `OK`
    pub pending_acks: usize,
}

/// One persistent connection to one relay
///
/// Cheap to clone: clones share the same socket, queue and subscriptions.
/// Owned by a [`RelayPool`](crate::RelayPool), which keeps at most one per URL.
#[derive(Debug, Clone)]
pub struct RelayConnection {
    inner: InnerRelay,
}

impl PartialEq for RelayConnection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl Eq for RelayConnection {}

impl RelayConnection {
    pub(crate) fn new(
        url: RelayUrl,
        transport: Arc<dyn WebSocketTransport>,
        opts: RelayOptions,
    ) -> Self {
        Self {
            inner: InnerRelay::new(url, transport, opts),
        }
    }

    /// Relay URL
    #[inline]
    pub fn url(&self) -> &RelayUrl {
        &self.inner.url
    }

    /// Connection status
    #[inline]
    pub fn status(&self) -> RelayStatus {
        self.inner.status()
    }

    /// Check if the socket is open
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status().is_connected()
    }

    /// Inspect queue, subscriptions and pending acknowledgments
    pub fn inspect(&self) -> RelayInspection {
        RelayInspection {
            url: self.inner.url.clone(),
            status: self.inner.status(),
            queue_len: self.inner.queue_len(),
            subscriptions: self.inner.subscription_count(),
            pending_acks: self.inner.pending_ack_count(),
        }
    }

    /// Filters of an open subscription
    #[inline]
    pub fn subscription(&self, id: &SubscriptionId) -> Option<Vec<Filter>> {
        self.inner.subscription_filters(id)
    }

    /// Start the connection task, if not already running
    #[inline]
    pub(crate) fn connect(&self) {
        self.inner.spawn_connection_task();
    }

    /// Send a message.
    ///
    /// The message is queued and the connection task writes it as soon as the socket is open.
    #[inline]
    pub fn send_msg(&self, msg: ClientMessage<'_>) -> Result<(), Error> {
        self.inner.send_msg(msg)
    }

    #[inline]
    pub(crate) fn send_event(&self, event: &Event) -> Result<(), Error> {
        self.inner.send_event(event)
    }

    #[inline]
    pub(crate) fn add_subscription(
        &self,
        id: SubscriptionId,
        filters: Vec<Filter>,
        sender: mpsc::UnboundedSender<SubscriptionEvent>,
    ) -> Result<(), Error> {
        self.inner.add_subscription(id, filters, sender)
    }

    #[inline]
    pub(crate) fn remove_subscription(&self, id: &SubscriptionId) -> bool {
        self.inner.remove_subscription(id)
    }

    #[inline]
    pub(crate) fn register_ack(&self, id: EventId) -> oneshot::Receiver<Ack> {
        self.inner.register_ack(id)
    }

    /// Drop the acknowledgment receivers of `id` that were closed
    #[inline]
    pub(crate) fn prune_acks(&self, id: &EventId) {
        self.inner.prune_acks(id)
    }

    /// Poll the status until the socket is open.
    ///
    /// Returns `false` if still not open after `timeout`.
    pub async fn wait_for_open(&self, timeout: Duration, interval: Duration) -> bool {
        let check = async {
            loop {
                match self.status() {
                    RelayStatus::Connected => return true,
                    RelayStatus::Terminated => return false,
                    _ => time::sleep(interval).await,
                }
            }
        };

        time::timeout(Some(timeout), check).await.unwrap_or(false)
    }

    /// Close the current socket and open a new one without waiting for the reconnect delay.
    ///
    /// Pending acknowledgments resolve as `"connection reset"`. Subscriptions are kept and
    /// re-sent on the new socket.
    #[inline]
    pub fn reconnect(&self) -> Result<(), Error> {
        self.inner.restart()
    }

    /// Close the socket for good.
    ///
    /// Pending acknowledgments resolve as `"terminated"` and subscription streams end.
    #[inline]
    pub(crate) fn disconnect(&self) {
        self.inner.terminate();
    }
}
