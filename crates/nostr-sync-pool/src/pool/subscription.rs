// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Subscription handle

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use nostr::{Event, RelayUrl, SubscriptionId};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::relay::RelayConnection;

/// Item delivered by a [`SubscriptionHandle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// Event received from a relay
    Event {
        /// Relay that delivered the event
        relay_url: RelayUrl,
        /// Event
        event: Box<Event>,
    },
    /// The relay delivered all stored events.
    ///
    /// The subscription stays open for new events.
    EndOfStoredEvents {
        /// Relay URL
        relay_url: RelayUrl,
    },
}

/// A subscription fanned out to one or more relays
///
/// Events and EOSE signals from every relay are merged in one stream, in arrival order per
/// relay. Items are buffered until read: nothing is lost between [`RelayPool::subscribe`]
/// and the first call to [`SubscriptionHandle::next`].
///
/// The same event delivered by two relays is yielded twice.
/// Use a [`SeenTracker`](crate::SeenTracker) to skip duplicates.
///
/// Dropping the handle unsubscribes.
///
/// [`RelayPool::subscribe`]: crate::RelayPool::subscribe
#[derive(Debug)]
pub struct SubscriptionHandle {
    subscriptions: Vec<(RelayConnection, SubscriptionId)>,
    rx: UnboundedReceiver<SubscriptionEvent>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl SubscriptionHandle {
    pub(super) fn new(
        subscriptions: Vec<(RelayConnection, SubscriptionId)>,
        rx: UnboundedReceiver<SubscriptionEvent>,
    ) -> Self {
        Self { subscriptions, rx }
    }

    #[inline]
    pub(super) fn push(&mut self, relay: RelayConnection, id: SubscriptionId) {
        self.subscriptions.push((relay, id));
    }

    /// Per-relay subscription IDs
    pub fn ids(&self) -> impl Iterator<Item = (&RelayUrl, &SubscriptionId)> {
        self.subscriptions
            .iter()
            .map(|(relay, id)| (relay.url(), id))
    }

    /// Next event or EOSE.
    ///
    /// Returns `None` once every relay dropped the subscription (i.e. pool shutdown).
    #[inline]
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }

    /// Send `CLOSE` to every relay and discard the subscription state
    #[inline]
    pub fn unsubscribe(mut self) {
        self.close();
    }

    fn close(&mut self) {
        for (relay, id) in self.subscriptions.drain(..) {
            if relay.remove_subscription(&id) {
                tracing::debug!(url = %relay.url(), id = %id, "Unsubscribed.");
            }
        }

        self.rx.close();
    }
}

impl Stream for SubscriptionHandle {
    type Item = SubscriptionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
