// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! In-memory relays, for tests
//!
//! [`MockNetwork`] is a [`WebSocketTransport`] that routes every connection to a [`MockRelay`]
//! registered for the URL host. A mock relay stores the events it receives, answers `REQ` with
//! the stored matching events (newest first, honoring `limit`) followed by `EOSE` and answers
//! `EVENT` with `OK`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_utility::{task, time};
use async_wsocket::{ConnectionMode, Message};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{SinkExt, StreamExt};
use nostr::filter::MatchEventOptions;
use nostr::util::BoxedFuture;
use nostr::{
    ClientMessage, Event, EventId, Filter, JsonUtil, RelayMessage, RelayUrl, SubscriptionId, Url,
};

use crate::transport::error::TransportError;
use crate::transport::websocket::{BoxSink, BoxStream, WebSocketTransport};
use crate::util;

/// How a [`MockRelay`] answers
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Never answer anything
    pub silent: bool,
    /// Delay before sending `OK`
    pub ok_delay: Option<Duration>,
    /// Reject published events with this message
    pub reject: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    events: Mutex<Vec<Event>>,
    received: Mutex<Vec<Event>>,
    requests: Mutex<Vec<(SubscriptionId, Vec<Filter>)>>,
    closed: Mutex<Vec<SubscriptionId>>,
    behavior: Mutex<MockBehavior>,
    connections: Mutex<Vec<UnboundedSender<Message>>>,
    connection_count: AtomicUsize,
    offline: AtomicBool,
}

/// In-memory relay
#[derive(Debug, Clone, Default)]
pub struct MockRelay {
    state: Arc<MockState>,
}

impl MockRelay {
    /// New relay with default behavior
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the answering behavior
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *util::lock(&self.state.behavior) = behavior;
    }

    /// Store an event, as if published earlier
    pub fn add_event(&self, event: Event) {
        util::lock(&self.state.events).push(event);
    }

    /// Store many events
    pub fn add_events<I>(&self, events: I)
    where
        I: IntoIterator<Item = Event>,
    {
        util::lock(&self.state.events).extend(events);
    }

    /// Events published by clients
    pub fn received_events(&self) -> Vec<Event> {
        util::lock(&self.state.received).clone()
    }

    /// Every `REQ` received, in order
    pub fn requests(&self) -> Vec<(SubscriptionId, Vec<Filter>)> {
        util::lock(&self.state.requests).clone()
    }

    /// Every `CLOSE` received, in order
    pub fn closed(&self) -> Vec<SubscriptionId> {
        util::lock(&self.state.closed).clone()
    }

    /// Number of accepted connections so far
    #[inline]
    pub fn connection_count(&self) -> usize {
        self.state.connection_count.load(Ordering::SeqCst)
    }

    /// Refuse new connections
    #[inline]
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Close every open connection from the relay side
    pub fn disconnect_all(&self) {
        let connections: Vec<UnboundedSender<Message>> =
            util::lock(&self.state.connections).drain(..).collect();
        for tx in connections.into_iter() {
            tx.close_channel();
        }
    }

    fn accept(&self) -> Result<(BoxSink, BoxStream), TransportError> {
        if self.state.offline.load(Ordering::SeqCst) {
            return Err(TransportError::backend(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        // client -> relay
        let (client_tx, relay_rx) = mpsc::unbounded::<Message>();
        // relay -> client
        let (relay_tx, client_rx) = mpsc::unbounded::<Message>();

        self.state.connection_count.fetch_add(1, Ordering::SeqCst);
        util::lock(&self.state.connections).push(relay_tx.clone());

        task::spawn(self.clone().serve(relay_rx, relay_tx));

        let sink: BoxSink = Box::new(client_tx.sink_map_err(TransportError::backend));
        let stream: BoxStream = Box::new(client_rx.map(Ok::<Message, TransportError>));

        Ok((sink, stream))
    }

    async fn serve(self, mut rx: UnboundedReceiver<Message>, tx: UnboundedSender<Message>) {
        while let Some(msg) = rx.next().await {
            let Message::Text(json) = msg else {
                continue;
            };

            let msg: ClientMessage = match ClientMessage::from_json(&json) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(error = %e, "Mock relay received an invalid message.");
                    continue;
                }
            };

            let behavior: MockBehavior = util::lock(&self.state.behavior).clone();

            match msg {
                ClientMessage::Req {
                    subscription_id,
                    filter,
                } => self.handle_req(
                    &tx,
                    &behavior,
                    subscription_id.into_owned(),
                    vec![filter.into_owned()],
                ),
                ClientMessage::ReqMultiFilter {
                    subscription_id,
                    filters,
                } => self.handle_req(&tx, &behavior, subscription_id.into_owned(), filters),
                ClientMessage::Close(subscription_id) => {
                    util::lock(&self.state.closed).push(subscription_id.into_owned());
                }
                ClientMessage::Event(event) => {
                    let event: Event = event.into_owned();
                    util::lock(&self.state.received).push(event.clone());

                    if behavior.silent {
                        continue;
                    }

                    let ok: RelayMessage<'static> = match behavior.reject {
                        Some(message) => RelayMessage::ok(event.id, false, message),
                        None => {
                            let id: EventId = event.id;
                            util::lock(&self.state.events).push(event);
                            RelayMessage::ok(id, true, "")
                        }
                    };

                    match behavior.ok_delay {
                        Some(delay) => {
                            let tx = tx.clone();
                            task::spawn(async move {
                                time::sleep(delay).await;
                                send(&tx, ok);
                            });
                        }
                        None => send(&tx, ok),
                    }
                }
                _ => {}
            }
        }
    }

    fn handle_req(
        &self,
        tx: &UnboundedSender<Message>,
        behavior: &MockBehavior,
        subscription_id: SubscriptionId,
        filters: Vec<Filter>,
    ) {
        util::lock(&self.state.requests).push((subscription_id.clone(), filters.clone()));

        if behavior.silent {
            return;
        }

        for event in self.query(&filters).into_iter() {
            send(tx, RelayMessage::event(subscription_id.clone(), event));
        }
        send(tx, RelayMessage::eose(subscription_id));
    }

    fn query(&self, filters: &[Filter]) -> Vec<Event> {
        let events = util::lock(&self.state.events);
        let mut ids: HashSet<EventId> = HashSet::new();
        let mut out: Vec<Event> = Vec::new();

        for filter in filters.iter() {
            let mut matching: Vec<&Event> = events
                .iter()
                .filter(|e| filter.match_event(e, MatchEventOptions::new()))
                .collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            let limit: usize = filter.limit.unwrap_or(usize::MAX);
            for event in matching.into_iter().take(limit) {
                if ids.insert(event.id) {
                    out.push(event.clone());
                }
            }
        }

        out
    }
}

fn send(tx: &UnboundedSender<Message>, msg: RelayMessage<'_>) {
    // The client may be gone
    let _ = tx.unbounded_send(Message::Text(msg.as_json()));
}

/// In-memory network of [`MockRelay`]s
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    relays: Arc<Mutex<HashMap<String, MockRelay>>>,
}

impl MockNetwork {
    /// Empty network
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new relay reachable at `url`
    pub fn add_relay(&self, url: &RelayUrl) -> MockRelay {
        let relay: MockRelay = MockRelay::new();
        let url: &Url = url.into();
        util::lock(&self.relays).insert(host_key(url), relay.clone());
        relay
    }
}

impl WebSocketTransport for MockNetwork {
    fn connect<'a>(
        &'a self,
        url: &'a Url,
        _mode: &'a ConnectionMode,
        _timeout: Duration,
    ) -> BoxedFuture<'a, Result<(BoxSink, BoxStream), TransportError>> {
        Box::pin(async move {
            let relay: Option<MockRelay> = util::lock(&self.relays).get(&host_key(url)).cloned();
            match relay {
                Some(relay) => relay.accept(),
                None => Err(TransportError::Unreachable(url.to_string())),
            }
        })
    }
}

fn host_key(url: &Url) -> String {
    format!(
        "{}:{}",
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or_default()
    )
}
