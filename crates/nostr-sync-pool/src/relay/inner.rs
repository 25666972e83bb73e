// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_utility::{task, time};
use async_wsocket::Message;
use futures::{SinkExt, StreamExt};
use nostr::{ClientMessage, Event, EventId, Filter, JsonUtil, RelayMessage, RelayUrl, SubscriptionId};
use tokio::sync::{mpsc, oneshot, Notify};

use super::constants::WEBSOCKET_TX_TIMEOUT;
use super::error::Error;
use super::options::RelayOptions;
use super::queue::{InFlight, OutboundFrame, OutboundQueue};
use super::status::{AtomicRelayStatus, RelayStatus};
use crate::pool::SubscriptionEvent;
use crate::transport::websocket::{BoxSink, BoxStream, WebSocketTransport};
use crate::util;

/// `(accepted, message)` from an `OK` frame
pub(crate) type Ack = (bool, String);

#[derive(Debug)]
pub(super) struct ActiveSubscription {
    pub(super) filters: Vec<Filter>,
    sender: mpsc::UnboundedSender<SubscriptionEvent>,
    /// The REQ went out on a socket that is now closed
    stale: bool,
}

/// Why a socket session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Restart,
    Terminated,
}

#[derive(Debug)]
struct AtomicPrivateData {
    status: AtomicRelayStatus,
    running: AtomicBool,
    queue: OutboundQueue,
    subscriptions: Mutex<HashMap<SubscriptionId, ActiveSubscription>>,
    /// Publishers waiting for an `OK`, many if the same event is published concurrently
    pending_acks: Mutex<HashMap<EventId, Vec<oneshot::Sender<Ack>>>>,
    terminate: Notify,
    restart: Notify,
}

#[derive(Debug, Clone)]
pub(crate) struct InnerRelay {
    pub(super) url: RelayUrl,
    opts: RelayOptions,
    transport: Arc<dyn WebSocketTransport>,
    atomic: Arc<AtomicPrivateData>,
}

impl InnerRelay {
    pub(super) fn new(
        url: RelayUrl,
        transport: Arc<dyn WebSocketTransport>,
        opts: RelayOptions,
    ) -> Self {
        Self {
            url,
            atomic: Arc::new(AtomicPrivateData {
                status: AtomicRelayStatus::default(),
                running: AtomicBool::new(false),
                queue: OutboundQueue::new(opts.max_queue_len),
                subscriptions: Mutex::new(HashMap::new()),
                pending_acks: Mutex::new(HashMap::new()),
                terminate: Notify::new(),
                restart: Notify::new(),
            }),
            opts,
            transport,
        }
    }

    #[inline]
    pub(super) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.atomic, &other.atomic)
    }

    #[inline]
    pub(super) fn status(&self) -> RelayStatus {
        self.atomic.status.load()
    }

    fn set_status(&self, status: RelayStatus, log: bool) {
        let prev: RelayStatus = self.atomic.status.set(status);

        if log && prev != status && !prev.is_terminated() {
            match status {
                RelayStatus::Initialized => tracing::trace!(url = %self.url, "Relay initialized."),
                RelayStatus::Connecting => tracing::debug!(url = %self.url, "Connecting to relay."),
                RelayStatus::Connected => tracing::info!(url = %self.url, "Connected to relay."),
                RelayStatus::Disconnected => {
                    tracing::info!(url = %self.url, "Disconnected from relay.")
                }
                RelayStatus::Terminated => {
                    tracing::info!(url = %self.url, "Completely disconnected from relay.")
                }
            }
        }
    }

    #[inline]
    pub(super) fn is_running(&self) -> bool {
        self.atomic.running.load(Ordering::SeqCst)
    }

    #[inline]
    pub(super) fn queue_len(&self) -> usize {
        self.atomic.queue.len()
    }

    #[inline]
    pub(super) fn subscription_count(&self) -> usize {
        util::lock(&self.atomic.subscriptions).len()
    }

    #[inline]
    pub(super) fn pending_ack_count(&self) -> usize {
        util::lock(&self.atomic.pending_acks)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub(super) fn subscription_filters(&self, id: &SubscriptionId) -> Option<Vec<Filter>> {
        util::lock(&self.atomic.subscriptions)
            .get(id)
            .map(|sub| sub.filters.clone())
    }

    pub(super) fn spawn_connection_task(&self) {
        // Set as running here, so a second call in the meantime is a no-op
        if self.atomic.running.swap(true, Ordering::SeqCst) {
            tracing::trace!(url = %self.url, "Connection task is already running.");
            return;
        }

        let relay: InnerRelay = self.clone();
        task::spawn(relay.connection_task());
    }

    async fn connection_task(self) {
        // Store the last error to avoid logging the same connection error on every attempt
        let mut last_ws_error: Option<String> = None;

        loop {
            let end: SessionEnd = self.connect_and_run(&mut last_ws_error).await;

            match end {
                SessionEnd::Terminated => break,
                SessionEnd::Restart => {
                    self.fail_pending_acks("connection reset");
                    continue;
                }
                SessionEnd::Closed => {}
            }

            if self.status().is_terminated() {
                break;
            }

            if !self.opts.reconnect {
                self.set_status(RelayStatus::Terminated, true);
                tracing::debug!(url = %self.url, "Reconnection disabled, breaking loop.");
                break;
            }

            self.set_status(RelayStatus::Disconnected, true);

            tracing::debug!(
                url = %self.url,
                delay = ?self.opts.reconnect_delay,
                "Scheduling reconnection."
            );

            // A single pending timer per connection: the loop is the only scheduler
            tokio::select! {
                _ = time::sleep(self.opts.reconnect_delay) => {},
                _ = self.atomic.restart.notified() => {
                    self.fail_pending_acks("connection reset");
                },
                _ = self.atomic.terminate.notified() => break,
            }
        }

        self.atomic.running.store(false, Ordering::SeqCst);

        tracing::debug!(url = %self.url, "Connection task terminated.");
    }

    async fn connect_and_run(&self, last_ws_error: &mut Option<String>) -> SessionEnd {
        self.set_status(RelayStatus::Connecting, true);

        let res = tokio::select! {
            res = self.transport.connect((&self.url).into(), &self.opts.connection_mode, self.opts.connection_timeout) => res,
            _ = self.atomic.terminate.notified() => return SessionEnd::Terminated,
            _ = self.atomic.restart.notified() => return SessionEnd::Restart,
        };

        match res {
            Ok((ws_tx, ws_rx)) => {
                *last_ws_error = None;
                self.set_status(RelayStatus::Connected, true);
                self.post_connection(ws_tx, ws_rx).await
            }
            Err(e) => {
                let e: String = e.to_string();

                // Log only if different from the last one
                if last_ws_error.as_deref() != Some(e.as_str()) {
                    tracing::error!(url = %self.url, error = %e, "Connection failed.");
                    *last_ws_error = Some(e);
                }

                SessionEnd::Closed
            }
        }
    }

    async fn post_connection(&self, mut ws_tx: BoxSink, ws_rx: BoxStream) -> SessionEnd {
        // Re-send REQs of subscriptions that were open on the previous socket.
        // The queue is flushed right after, by the writer.
        let mut end: SessionEnd = SessionEnd::Closed;
        match self.resubscribe(&mut ws_tx).await {
            Ok(()) => {
                end = tokio::select! {
                    res = self.writer(&mut ws_tx) => {
                        if let Err(e) = res {
                            tracing::error!(url = %self.url, error = %e, "Relay writer exited with error.");
                        }
                        SessionEnd::Closed
                    },
                    res = self.reader(ws_rx) => {
                        match res {
                            Ok(()) => tracing::debug!(url = %self.url, "Connection closed by relay."),
                            Err(e) => tracing::error!(url = %self.url, error = %e, "Relay reader exited with error."),
                        }
                        SessionEnd::Closed
                    },
                    _ = self.atomic.terminate.notified() => SessionEnd::Terminated,
                    _ = self.atomic.restart.notified() => SessionEnd::Restart,
                };
            }
            Err(e) => tracing::error!(url = %self.url, error = %e, "Impossible to resubscribe."),
        }

        // REQs sent on this socket must be sent again on the next one
        self.mark_subscriptions_stale();

        // Always try to close the WebSocket connection
        match ws_tx.close().await {
            Ok(()) => tracing::debug!(url = %self.url, "WebSocket connection closed."),
            Err(e) => tracing::debug!(url = %self.url, error = %e, "Can't close WebSocket connection."),
        }

        end
    }

    async fn resubscribe(&self, ws_tx: &mut BoxSink) -> Result<(), Error> {
        let reqs: Vec<(SubscriptionId, String)> = {
            let mut subscriptions = util::lock(&self.atomic.subscriptions);
            subscriptions
                .iter_mut()
                .filter(|(_, sub)| sub.stale)
                .map(|(id, sub)| {
                    sub.stale = false;
                    (id.clone(), req_json(id, &sub.filters))
                })
                .collect()
        };

        // A REQ still queued from the previous socket would open the same subscription twice
        let ids: HashSet<SubscriptionId> = reqs.iter().map(|(id, _)| id.clone()).collect();
        let removed: usize = self.atomic.queue.remove_reqs(&ids);
        if removed > 0 {
            tracing::trace!(url = %self.url, removed, "Dropped queued REQs of re-sent subscriptions.");
        }

        for (id, json) in reqs.into_iter() {
            tracing::debug!(url = %self.url, id = %id, "Re-sending subscription.");
            send_ws_msg(ws_tx, json).await?;
        }

        Ok(())
    }

    /// Drain the outbound queue while the socket is open
    async fn writer(&self, ws_tx: &mut BoxSink) -> Result<(), Error> {
        loop {
            match self.atomic.queue.pop() {
                Some(frame) => {
                    // Back in the queue if the write fails or this future is dropped
                    let in_flight = InFlight::new(&self.atomic.queue, frame);

                    tracing::debug!(url = %self.url, size = in_flight.json().len(), "Sending frame.");

                    send_ws_msg(ws_tx, in_flight.json().to_string()).await?;
                    in_flight.written();
                }
                None => self.atomic.queue.notified().await,
            }
        }
    }

    async fn reader(&self, mut ws_rx: BoxStream) -> Result<(), Error> {
        while let Some(msg) = ws_rx.next().await {
            match msg? {
                Message::Text(json) => self.handle_relay_message(&json),
                Message::Binary(_) => {
                    tracing::warn!(url = %self.url, "Binary messages aren't supported.");
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        Ok(())
    }

    fn handle_relay_message(&self, json: &str) {
        match RelayMessage::from_json(json) {
            Ok(msg) => self.handle_relay_msg(msg),
            Err(e) => {
                tracing::trace!(url = %self.url, error = %e, "Dropping unhandled relay message.");
            }
        }
    }

    fn handle_relay_msg(&self, msg: RelayMessage<'_>) {
        match msg {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                if let Err(e) = event.verify() {
                    tracing::warn!(url = %self.url, id = %event.id, error = %e, "Dropping invalid event.");
                    return;
                }

                self.dispatch(
                    &subscription_id,
                    SubscriptionEvent::Event {
                        relay_url: self.url.clone(),
                        event: Box::new(event.into_owned()),
                    },
                );
            }
            RelayMessage::EndOfStoredEvents(subscription_id) => {
                tracing::debug!(url = %self.url, id = %subscription_id, "Received EOSE.");
                self.dispatch(
                    &subscription_id,
                    SubscriptionEvent::EndOfStoredEvents {
                        relay_url: self.url.clone(),
                    },
                );
            }
            RelayMessage::Ok {
                event_id,
                status,
                message,
            } => {
                let senders = util::lock(&self.atomic.pending_acks).remove(&event_id);
                match senders {
                    Some(senders) => {
                        tracing::debug!(url = %self.url, id = %event_id, status, "Received OK.");
                        for sender in senders.into_iter() {
                            // The publisher may have given up already
                            let _ = sender.send((status, message.to_string()));
                        }
                    }
                    None => {
                        tracing::trace!(url = %self.url, id = %event_id, "OK for unknown event.")
                    }
                }
            }
            RelayMessage::Notice(message) => {
                tracing::warn!(url = %self.url, msg = %message, "Received NOTICE.");
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                tracing::debug!(url = %self.url, id = %subscription_id, msg = %message, "Subscription closed by relay.");

                // Nothing more will come: unblock the consumer, then forget it
                self.dispatch(
                    &subscription_id,
                    SubscriptionEvent::EndOfStoredEvents {
                        relay_url: self.url.clone(),
                    },
                );
                util::lock(&self.atomic.subscriptions).remove(&*subscription_id);
            }
            msg => {
                tracing::trace!(url = %self.url, msg = ?msg, "Ignoring relay message.");
            }
        }
    }

    fn dispatch(&self, id: &SubscriptionId, item: SubscriptionEvent) {
        let mut subscriptions = util::lock(&self.atomic.subscriptions);

        let Some(sub) = subscriptions.get(id) else {
            tracing::trace!(url = %self.url, id = %id, "Frame for unknown subscription.");
            return;
        };

        if sub.sender.send(item).is_err() {
            // The handle is gone without unsubscribing
            subscriptions.remove(id);
            drop(subscriptions);

            if let Err(e) = self.send_msg(ClientMessage::Close(Cow::Borrowed(id))) {
                tracing::debug!(url = %self.url, error = %e, "Can't close orphan subscription.");
            }
        }
    }

    fn mark_subscriptions_stale(&self) {
        let mut subscriptions = util::lock(&self.atomic.subscriptions);
        for sub in subscriptions.values_mut() {
            sub.stale = true;
        }
    }

    fn fail_pending_acks(&self, reason: &str) {
        let pending: Vec<oneshot::Sender<Ack>> = util::lock(&self.atomic.pending_acks)
            .drain()
            .flat_map(|(_, senders)| senders)
            .collect();

        for sender in pending.into_iter() {
            let _ = sender.send((false, reason.to_string()));
        }
    }

    /// Enqueue a message. Written immediately if the socket is open.
    pub(super) fn send_msg(&self, msg: ClientMessage<'_>) -> Result<(), Error> {
        self.enqueue(OutboundFrame::new(msg.as_json()))
    }

    fn enqueue(&self, frame: OutboundFrame) -> Result<(), Error> {
        if self.status().is_terminated() {
            return Err(Error::Terminated);
        }

        if let Some(evicted) = self.atomic.queue.push(frame) {
            tracing::warn!(
                url = %self.url,
                size = evicted.json.len(),
                "Outbound queue full, dropped the oldest frame."
            );
        }

        Ok(())
    }

    pub(super) fn add_subscription(
        &self,
        id: SubscriptionId,
        filters: Vec<Filter>,
        sender: mpsc::UnboundedSender<SubscriptionEvent>,
    ) -> Result<(), Error> {
        if self.status().is_terminated() {
            return Err(Error::Terminated);
        }

        let frame = OutboundFrame::req(id.clone(), req_json(&id, &filters));

        util::lock(&self.atomic.subscriptions).insert(
            id.clone(),
            ActiveSubscription {
                filters,
                sender,
                stale: false,
            },
        );

        if let Err(e) = self.enqueue(frame) {
            util::lock(&self.atomic.subscriptions).remove(&id);
            return Err(e);
        }

        Ok(())
    }

    /// Send CLOSE, then discard the subscription state
    pub(super) fn remove_subscription(&self, id: &SubscriptionId) -> bool {
        if !util::lock(&self.atomic.subscriptions).contains_key(id) {
            return false;
        }

        if let Err(e) = self.send_msg(ClientMessage::Close(Cow::Borrowed(id))) {
            tracing::debug!(url = %self.url, id = %id, error = %e, "Can't send CLOSE.");
        }

        util::lock(&self.atomic.subscriptions).remove(id).is_some()
    }

    pub(super) fn register_ack(&self, id: EventId) -> oneshot::Receiver<Ack> {
        let (tx, rx) = oneshot::channel();
        util::lock(&self.atomic.pending_acks)
            .entry(id)
            .or_default()
            .push(tx);
        rx
    }

    /// Forget the publishers of `id` that stopped waiting
    pub(super) fn prune_acks(&self, id: &EventId) {
        let mut pending = util::lock(&self.atomic.pending_acks);
        if let Some(senders) = pending.get_mut(id) {
            senders.retain(|sender| !sender.is_closed());
            if senders.is_empty() {
                pending.remove(id);
            }
        }
    }

    pub(super) fn send_event(&self, event: &Event) -> Result<(), Error> {
        self.send_msg(ClientMessage::Event(Cow::Borrowed(event)))
    }

    pub(super) fn restart(&self) -> Result<(), Error> {
        if self.status().is_terminated() {
            return Err(Error::Terminated);
        }

        if self.is_running() {
            self.atomic.restart.notify_one();
        } else {
            self.fail_pending_acks("connection reset");
            self.spawn_connection_task();
        }

        Ok(())
    }

    pub(super) fn terminate(&self) {
        self.set_status(RelayStatus::Terminated, true);
        self.atomic.terminate.notify_one();

        self.fail_pending_acks("terminated");

        // Dropping the senders ends every subscription stream
        util::lock(&self.atomic.subscriptions).clear();
    }
}

fn req_json(id: &SubscriptionId, filters: &[Filter]) -> String {
    let msg: ClientMessage<'_> = match filters {
        [filter] => ClientMessage::Req {
            subscription_id: Cow::Borrowed(id),
            filter: Cow::Borrowed(filter),
        },
        _ => ClientMessage::ReqMultiFilter {
            subscription_id: Cow::Borrowed(id),
            filters: filters.to_vec(),
        },
    };
    msg.as_json()
}

async fn send_ws_msg(ws_tx: &mut BoxSink, json: String) -> Result<(), Error> {
    match time::timeout(Some(WEBSOCKET_TX_TIMEOUT), ws_tx.send(Message::Text(json))).await {
        Some(res) => Ok(res?),
        None => Err(Error::WebSocketTimeout),
    }
}
