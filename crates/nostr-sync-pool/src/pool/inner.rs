// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_utility::time;
use atomic_destructor::AtomicDestroyer;
use futures::future;
use nostr::{Event, Filter, RelayUrl, SubscriptionId};
use tokio::sync::mpsc;

use super::error::Error;
use super::options::RelayPoolOptions;
use super::publish::{PublishResult, CONNECTION_RESET, TIMEOUT};
use super::subscription::SubscriptionHandle;
use super::RelayPoolBuilder;
use crate::relay::{RelayConnection, RelayInspection};
use crate::transport::websocket::WebSocketTransport;
use crate::util;

type Relays = HashMap<RelayUrl, RelayConnection>;

// Instead of wrap every field in an `Arc<T>`, which increases the number of atomic operations,
// put all fields that require an `Arc` here.
#[derive(Debug)]
struct AtomicPrivateData {
    relays: Mutex<Relays>,
    shutdown: AtomicBool,
}

#[derive(Debug, Clone)]
pub(super) struct InnerRelayPool {
    transport: Arc<dyn WebSocketTransport>,
    atomic: Arc<AtomicPrivateData>,
    opts: RelayPoolOptions,
}

impl AtomicDestroyer for InnerRelayPool {
    fn on_destroy(&self) {
        self.shutdown();
    }
}

impl InnerRelayPool {
    pub(super) fn from_builder(builder: RelayPoolBuilder) -> Self {
        Self {
            transport: builder.websocket_transport,
            atomic: Arc::new(AtomicPrivateData {
                relays: Mutex::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
            }),
            opts: builder.opts,
        }
    }

    #[inline]
    pub(super) fn is_shutdown(&self) -> bool {
        self.atomic.shutdown.load(Ordering::SeqCst)
    }

    pub(super) fn shutdown(&self) {
        // Already shutdown
        if self.atomic.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        let relays: Vec<RelayConnection> = util::lock(&self.atomic.relays)
            .drain()
            .map(|(_, relay)| relay)
            .collect();

        for relay in relays.into_iter() {
            relay.disconnect();
        }

        tracing::debug!("Relay pool shutdown.");
    }

    pub(super) fn relays(&self) -> Vec<RelayConnection> {
        util::lock(&self.atomic.relays).values().cloned().collect()
    }

    pub(super) fn relay(&self, url: &RelayUrl) -> Option<RelayConnection> {
        util::lock(&self.atomic.relays).get(url).cloned()
    }

    pub(super) fn ensure_connection(&self, url: RelayUrl) -> Result<RelayConnection, Error> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }

        let mut relays = util::lock(&self.atomic.relays);

        if let Some(relay) = relays.get(&url) {
            return Ok(relay.clone());
        }

        tracing::debug!(url = %url, "Creating relay connection.");

        let relay: RelayConnection =
            RelayConnection::new(url.clone(), self.transport.clone(), self.opts.relay.clone());
        relay.connect();

        relays.insert(url, relay.clone());

        Ok(relay)
    }

    pub(super) fn inspect(&self) -> Vec<RelayInspection> {
        let mut list: Vec<RelayInspection> =
            self.relays().iter().map(RelayConnection::inspect).collect();
        list.sort_by(|a, b| a.url.cmp(&b.url));
        list
    }

    pub(super) fn subscribe(
        &self,
        urls: Vec<RelayUrl>,
        filters: Vec<Filter>,
    ) -> Result<SubscriptionHandle, Error> {
        if urls.is_empty() {
            return Err(Error::NoRelaysSpecified);
        }

        let (tx, rx) = mpsc::unbounded_channel();

        // On error, dropping the handle closes the relays already subscribed
        let mut handle = SubscriptionHandle::new(Vec::with_capacity(urls.len()), rx);

        for url in urls.into_iter() {
            let relay: RelayConnection = self.ensure_connection(url)?;
            let id: SubscriptionId = SubscriptionId::generate();

            relay.add_subscription(id.clone(), filters.clone(), tx.clone())?;

            tracing::debug!(url = %relay.url(), id = %id, "Subscribed.");

            handle.push(relay, id);
        }

        Ok(handle)
    }

    pub(super) async fn publish(&self, urls: Vec<RelayUrl>, event: &Event) -> Vec<PublishResult> {
        let futures = urls.into_iter().map(|url| self.publish_to(url, event));
        future::join_all(futures).await
    }

    async fn publish_to(&self, url: RelayUrl, event: &Event) -> PublishResult {
        let relay: RelayConnection = match self.ensure_connection(url.clone()) {
            Ok(relay) => relay,
            Err(e) => return PublishResult::failed(url, e.to_string()),
        };

        // Proceed anyway on timeout: the event will wait in the queue
        if !relay
            .wait_for_open(self.opts.connect_timeout, self.opts.ready_poll_interval)
            .await
        {
            tracing::debug!(url = %url, id = %event.id, "Relay not ready, queueing event.");
        }

        let mut rx = relay.register_ack(event.id);

        if let Err(e) = relay.send_event(event) {
            rx.close();
            relay.prune_acks(&event.id);
            return PublishResult::failed(url, e.to_string());
        }

        match time::timeout(Some(self.opts.publish_timeout), &mut rx).await {
            Some(Ok((ok, message))) => PublishResult::acknowledged(url, ok, message),
            Some(Err(_)) => PublishResult::failed(url, CONNECTION_RESET),
            None => {
                // An OK sent before closing is still received
                rx.close();
                relay.prune_acks(&event.id);

                match rx.try_recv() {
                    Ok((ok, message)) => PublishResult::acknowledged(url, ok, message),
                    Err(_) => {
                        tracing::warn!(url = %url, id = %event.id, "Timeout while waiting for OK.");
                        PublishResult::failed(url, TIMEOUT)
                    }
                }
            }
        }
    }

    pub(super) fn reconnect_relay(&self, url: RelayUrl) -> Result<(), Error> {
        match self.relay(&url) {
            Some(relay) => Ok(relay.reconnect()?),
            // Not connected yet: connecting is enough
            None => self.ensure_connection(url).map(|_| ()),
        }
    }
}
