// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Seen events tracker
//!
//! The same event is usually delivered by more than one relay. Consumers that must process
//! an event only once can keep a [`SeenTracker`] next to their subscription.

use std::num::NonZeroUsize;

use lru::LruCache;
use nostr::EventId;
use tokio::sync::Mutex;

const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::new(10_000).unwrap();

/// Bounded, recency-ordered set of event IDs
#[derive(Debug)]
pub struct SeenTracker {
    ids: Mutex<LruCache<EventId, ()>>,
}

impl Default for SeenTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SeenTracker {
    /// New tracker that remembers at most `capacity` IDs
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            ids: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Mark the ID as seen.
    ///
    /// Returns `true` if it was already tracked. The least recently seen ID is evicted when full.
    pub async fn seen(&self, id: EventId) -> bool {
        let mut ids = self.ids.lock().await;
        ids.put(id, ()).is_some()
    }

    /// Check without marking
    pub async fn contains(&self, id: &EventId) -> bool {
        let ids = self.ids.lock().await;
        ids.contains(id)
    }

    /// Number of tracked IDs
    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }

    /// Check if empty
    pub async fn is_empty(&self) -> bool {
        self.ids.lock().await.is_empty()
    }

    /// Forget everything
    pub async fn clear(&self) {
        self.ids.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> EventId {
        EventId::from_byte_array([n; 32])
    }

    #[tokio::test]
    async fn test_seen_twice() {
        let tracker = SeenTracker::default();
        assert!(!tracker.seen(id(1)).await);
        assert!(tracker.seen(id(1)).await);
        assert_eq!(tracker.len().await, 1);
    }

    #[tokio::test]
    async fn test_evicts_least_recent() {
        let tracker = SeenTracker::new(NonZeroUsize::new(2).unwrap());
        tracker.seen(id(1)).await;
        tracker.seen(id(2)).await;

        // Refresh 1, so 2 becomes the oldest
        assert!(tracker.seen(id(1)).await);
        tracker.seen(id(3)).await;

        assert!(tracker.contains(&id(1)).await);
        assert!(!tracker.contains(&id(2)).await);
        assert!(tracker.contains(&id(3)).await);
    }
}
