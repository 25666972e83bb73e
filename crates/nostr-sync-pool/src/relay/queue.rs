// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Outbound queue

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use nostr::SubscriptionId;
use tokio::sync::Notify;

use crate::util;

/// Serialized client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct OutboundFrame {
    pub(super) json: String,
    /// Subscription opened by this frame, for `REQ`s
    pub(super) req: Option<SubscriptionId>,
}

impl OutboundFrame {
    #[inline]
    pub(super) fn new(json: String) -> Self {
        Self { json, req: None }
    }

    #[inline]
    pub(super) fn req(id: SubscriptionId, json: String) -> Self {
        Self {
            json,
            req: Some(id),
        }
    }
}

/// Frames waiting to be written, in FIFO order
#[derive(Debug)]
pub(super) struct OutboundQueue {
    frames: Mutex<VecDeque<OutboundFrame>>,
    max_len: usize,
    notify: Notify,
}

impl OutboundQueue {
    pub(super) fn new(max_len: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            max_len,
            notify: Notify::new(),
        }
    }

    /// Enqueue a frame and wake up the writer.
    ///
    /// Returns the evicted frame, if the queue was full.
    pub(super) fn push(&self, frame: OutboundFrame) -> Option<OutboundFrame> {
        let evicted: Option<OutboundFrame> = {
            let mut frames = util::lock(&self.frames);
            let evicted = if frames.len() >= self.max_len {
                frames.pop_front()
            } else {
                None
            };
            frames.push_back(frame);
            evicted
        };

        self.notify.notify_one();

        evicted
    }

    /// Put back a frame that couldn't be written
    pub(super) fn requeue(&self, frame: OutboundFrame) {
        let mut frames = util::lock(&self.frames);
        frames.push_front(frame);
    }

    #[inline]
    pub(super) fn pop(&self) -> Option<OutboundFrame> {
        let mut frames = util::lock(&self.frames);
        frames.pop_front()
    }

    /// Drop the queued `REQ`s of these subscriptions. Returns how many were dropped.
    pub(super) fn remove_reqs(&self, ids: &HashSet<SubscriptionId>) -> usize {
        let mut frames = util::lock(&self.frames);
        let len: usize = frames.len();
        frames.retain(|frame| !frame.req.as_ref().is_some_and(|id| ids.contains(id)));
        len - frames.len()
    }

    #[inline]
    pub(super) fn len(&self) -> usize {
        util::lock(&self.frames).len()
    }

    /// Wait for a new frame
    #[inline]
    pub(super) async fn notified(&self) {
        self.notify.notified().await
    }
}

/// Frame popped from the queue and not written yet.
///
/// Put back at the front of the queue on drop, unless written.
pub(super) struct InFlight<'a> {
    queue: &'a OutboundQueue,
    frame: Option<OutboundFrame>,
}

impl<'a> InFlight<'a> {
    pub(super) fn new(queue: &'a OutboundQueue, frame: OutboundFrame) -> Self {
        Self {
            queue,
            frame: Some(frame),
        }
    }

    pub(super) fn json(&self) -> &str {
        self.frame.as_ref().map(|f| f.json.as_str()).unwrap_or_default()
    }

    /// The frame reached the socket
    #[inline]
    pub(super) fn written(mut self) {
        self.frame = None;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.queue.requeue(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: &str) -> OutboundFrame {
        OutboundFrame::new(json.to_string())
    }

    #[test]
    fn test_fifo_order() {
        let queue = OutboundQueue::new(10);
        queue.push(frame("a"));
        queue.push(frame("b"));
        assert_eq!(queue.pop(), Some(frame("a")));

        queue.requeue(frame("a"));
        assert_eq!(queue.pop(), Some(frame("a")));
        assert_eq!(queue.pop(), Some(frame("b")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let queue = OutboundQueue::new(2);
        assert!(queue.push(frame("a")).is_none());
        assert!(queue.push(frame("b")).is_none());
        assert_eq!(queue.push(frame("c")), Some(frame("a")));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(frame("b")));
    }

    #[test]
    fn test_in_flight_requeued_unless_written() {
        let queue = OutboundQueue::new(10);
        queue.push(frame("a"));
        queue.push(frame("b"));

        let in_flight = InFlight::new(&queue, queue.pop().unwrap());
        assert_eq!(in_flight.json(), "a");
        drop(in_flight);
        assert_eq!(queue.len(), 2);

        let in_flight = InFlight::new(&queue, queue.pop().unwrap());
        in_flight.written();
        assert_eq!(queue.pop(), Some(frame("b")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_remove_reqs() {
        let queue = OutboundQueue::new(10);
        let stale = SubscriptionId::new("stale");
        let fresh = SubscriptionId::new("fresh");
        queue.push(OutboundFrame::req(stale.clone(), String::from("req stale")));
        queue.push(frame("event"));
        queue.push(OutboundFrame::req(fresh.clone(), String::from("req fresh")));

        let ids: HashSet<SubscriptionId> = HashSet::from([stale]);
        assert_eq!(queue.remove_reqs(&ids), 1);
        assert_eq!(queue.pop(), Some(frame("event")));
        assert_eq!(queue.pop().and_then(|f| f.req), Some(fresh));
    }
}
