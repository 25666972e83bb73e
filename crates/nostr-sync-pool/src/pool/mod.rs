// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay Pool

use atomic_destructor::{AtomicDestructor, StealthClone};
use nostr::{Event, Filter, RelayUrl};

pub mod builder;
pub mod constants;
mod error;
mod inner;
pub mod options;
mod publish;
mod subscription;

pub use self::builder::RelayPoolBuilder;
pub use self::error::Error;
use self::inner::InnerRelayPool;
pub use self::options::RelayPoolOptions;
pub use self::publish::{accepted_count, PublishResult};
pub use self::subscription::{SubscriptionEvent, SubscriptionHandle};
use crate::relay::{RelayConnection, RelayInspection};

/// Relay Pool
///
/// Registry of relay connections keyed by URL. Pass clones of the same pool to every consumer:
/// clones share the connections. The last dropped clone shuts the pool down.
#[derive(Debug, Clone)]
pub struct RelayPool {
    inner: AtomicDestructor<InnerRelayPool>,
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StealthClone for RelayPool {
    fn stealth_clone(&self) -> Self {
        Self {
            inner: self.inner.stealth_clone(),
        }
    }
}

impl RelayPool {
    /// Construct new default relay pool
    ///
    /// Use [`RelayPool::builder`] to customize it.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// New relay pool builder
    #[inline]
    pub fn builder() -> RelayPoolBuilder {
        RelayPoolBuilder::default()
    }

    #[inline]
    fn from_builder(builder: RelayPoolBuilder) -> Self {
        Self {
            inner: AtomicDestructor::new(InnerRelayPool::from_builder(builder)),
        }
    }

    /// Check if the relay pool is shutdown.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    /// Disconnect and remove every relay.
    ///
    /// After this call the pool can't be used anymore.
    #[inline]
    pub fn shutdown(&self) {
        self.inner.shutdown()
    }

    /// Connections created so far
    #[inline]
    pub fn relays(&self) -> Vec<RelayConnection> {
        self.inner.relays()
    }

    /// Get the connection of a relay, if already created
    #[inline]
    pub fn relay(&self, url: &RelayUrl) -> Option<RelayConnection> {
        self.inner.relay(url)
    }

    /// Get the connection for `url`, creating and connecting it on first use.
    ///
    /// Calls with the same URL return the same connection.
    ///
    /// Must be called within a tokio runtime.
    #[inline]
    pub fn ensure_connection(&self, url: RelayUrl) -> Result<RelayConnection, Error> {
        self.inner.ensure_connection(url)
    }

    /// Status, queue length, subscriptions and pending acknowledgments of every connection
    #[inline]
    pub fn inspect(&self) -> Vec<RelayInspection> {
        self.inner.inspect()
    }

    /// Force a reconnection of the relay.
    ///
    /// Creates the connection if it doesn't exist yet.
    #[inline]
    pub fn reconnect_relay(&self, url: RelayUrl) -> Result<(), Error> {
        self.inner.reconnect_relay(url)
    }

    /// Subscribe to every relay in `urls` with the same filters.
    ///
    /// Each relay gets its own subscription ID.
    pub fn subscribe<I>(&self, urls: I, filters: Vec<Filter>) -> Result<SubscriptionHandle, Error>
    where
        I: IntoIterator<Item = RelayUrl>,
    {
        self.inner.subscribe(urls.into_iter().collect(), filters)
    }

    /// Publish the event to every relay in `urls`.
    ///
    /// Never fails: returns one [`PublishResult`] per relay, in the same order, once every
    /// relay either acknowledged, failed or timed out.
    pub async fn publish<I>(&self, urls: I, event: &Event) -> Vec<PublishResult>
    where
        I: IntoIterator<Item = RelayUrl>,
    {
        self.inner.publish(urls.into_iter().collect(), event).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nostr::{EventBuilder, Keys, Kind, Timestamp};
    use tokio::time::{self, Instant};

    use super::*;
    use crate::mock::{MockBehavior, MockNetwork, MockRelay};
    use crate::relay::RelayStatus;

    fn url(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    fn pool(network: &MockNetwork) -> RelayPool {
        RelayPool::builder()
            .websocket_transport(network.clone())
            .build()
    }

    fn note(keys: &Keys, content: &str, created_at: u64) -> Event {
        EventBuilder::text_note(content)
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_connection_is_idempotent() {
        let network = MockNetwork::new();
        let relay_url = url("wss://relay-a.mock");
        let mock: MockRelay = network.add_relay(&relay_url);
        let pool = pool(&network);

        let first = pool.ensure_connection(relay_url.clone()).unwrap();
        let second = pool.ensure_connection(relay_url.clone()).unwrap();

        assert_eq!(first, second);
        assert_eq!(pool.relays().len(), 1);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(first.status(), RelayStatus::Connected);
        assert_eq!(mock.connection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_ok_and_timeout() {
        let network = MockNetwork::new();
        let url_a = url("wss://relay-a.mock");
        let url_b = url("wss://relay-b.mock");
        network.add_relay(&url_a).set_behavior(MockBehavior {
            ok_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        network.add_relay(&url_b).set_behavior(MockBehavior {
            silent: true,
            ..Default::default()
        });
        let pool = pool(&network);

        let keys = Keys::generate();
        let event = note(&keys, "hello", 1_700_000_000);

        // Open both sockets first, so the elapsed time only covers the ack wait
        pool.ensure_connection(url_a.clone()).unwrap();
        pool.ensure_connection(url_b.clone()).unwrap();
        time::sleep(Duration::from_millis(10)).await;

        let start = Instant::now();
        let results = pool.publish([url_a.clone(), url_b.clone()], &event).await;
        let elapsed = start.elapsed();

        assert_eq!(results.len(), 2);

        assert_eq!(results[0].relay, url_a);
        assert!(results[0].ok);
        assert_eq!(results[0].reason, None);

        assert_eq!(results[1].relay, url_b);
        assert!(!results[1].ok);
        assert_eq!(results[1].reason.as_deref(), Some("timeout"));
        assert!(results[1].is_timeout());

        assert!(elapsed >= Duration::from_millis(5000));
        assert!(elapsed < Duration::from_millis(5200));

        // Timed out entry removed exactly once
        let relay_b = pool.relay(&url_b).unwrap();
        assert_eq!(relay_b.inspect().pending_acks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_event_published_concurrently() {
        let network = MockNetwork::new();
        let relay_url = url("wss://relay-a.mock");
        network.add_relay(&relay_url).set_behavior(MockBehavior {
            ok_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let pool = pool(&network);

        let event = note(&Keys::generate(), "twice", 1_700_000_000);
        let (first, second) = tokio::join!(
            pool.publish([relay_url.clone()], &event),
            pool.publish([relay_url.clone()], &event)
        );

        // Both publishers get the relay answer
        assert!(first[0].ok);
        assert!(second[0].ok);
        assert_eq!(pool.relay(&relay_url).unwrap().inspect().pending_acks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_rejected() {
        let network = MockNetwork::new();
        let relay_url = url("wss://relay-a.mock");
        network.add_relay(&relay_url).set_behavior(MockBehavior {
            reject: Some(String::from("blocked: not allowed")),
            ..Default::default()
        });
        let pool = pool(&network);

        let event = note(&Keys::generate(), "spam", 1_700_000_000);
        let results = pool.publish([relay_url], &event).await;

        assert_eq!(results.len(), 1);
        assert!(!results[0].ok);
        assert_eq!(results[0].reason.as_deref(), Some("blocked: not allowed"));
        assert_eq!(accepted_count(&results), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_to_unreachable_relay_never_fails() {
        let network = MockNetwork::new();
        let pool = pool(&network);

        let event = note(&Keys::generate(), "hello", 1_700_000_000);
        let start = Instant::now();
        let results = pool
            .publish([url("wss://unknown.mock")], &event)
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].is_timeout());

        // Connect timeout, then publish timeout
        assert!(start.elapsed() >= Duration::from_millis(9000));

        // The event is still waiting in the queue
        let inspection = pool.inspect();
        assert_eq!(inspection.len(), 1);
        assert_eq!(inspection[0].queue_len, 1);
        assert_eq!(inspection[0].pending_acks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_merges_relays() {
        let network = MockNetwork::new();
        let url_a = url("wss://relay-a.mock");
        let url_b = url("wss://relay-b.mock");
        let mock_a = network.add_relay(&url_a);
        let mock_b = network.add_relay(&url_b);

        let keys = Keys::generate();
        let shared = note(&keys, "on both", 1_700_000_010);
        mock_a.add_events([shared.clone(), note(&keys, "only a", 1_700_000_000)]);
        mock_b.add_event(shared.clone());

        let pool = pool(&network);
        let filter = Filter::new().author(keys.public_key()).kind(Kind::TextNote);
        let mut sub = pool
            .subscribe([url_a.clone(), url_b.clone()], vec![filter])
            .unwrap();

        let mut events = 0;
        let mut eose = 0;
        while eose < 2 {
            match sub.next().await.unwrap() {
                SubscriptionEvent::Event { .. } => events += 1,
                SubscriptionEvent::EndOfStoredEvents { .. } => eose += 1,
            }
        }

        // No dedup across relays
        assert_eq!(events, 3);

        let ids: Vec<(RelayUrl, nostr::SubscriptionId)> = sub
            .ids()
            .map(|(url, id)| (url.clone(), id.clone()))
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0].1, ids[1].1);

        sub.unsubscribe();
        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(mock_a.closed(), vec![ids[0].1.clone()]);
        assert_eq!(mock_b.closed(), vec![ids[1].1.clone()]);
        for inspection in pool.inspect() {
            assert_eq!(inspection.subscriptions, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_buffers_until_read() {
        let network = MockNetwork::new();
        let relay_url = url("wss://relay-a.mock");
        let mock = network.add_relay(&relay_url);
        let keys = Keys::generate();
        mock.add_event(note(&keys, "early", 1_700_000_000));

        let pool = pool(&network);
        let mut sub = pool
            .subscribe([relay_url], vec![Filter::new().kind(Kind::TextNote)])
            .unwrap();

        // Everything arrives before the first read
        time::sleep(Duration::from_secs(1)).await;

        assert!(matches!(sub.next().await, Some(SubscriptionEvent::Event { .. })));
        assert!(matches!(
            sub.next().await,
            Some(SubscriptionEvent::EndOfStoredEvents { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_close_resubscribes() {
        let network = MockNetwork::new();
        let relay_url = url("wss://relay-a.mock");
        let mock = network.add_relay(&relay_url);
        let pool = pool(&network);

        let _sub = pool
            .subscribe([relay_url.clone()], vec![Filter::new().kind(Kind::TextNote)])
            .unwrap();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.requests().len(), 1);

        mock.disconnect_all();
        time::sleep(Duration::from_millis(100)).await;

        let relay = pool.relay(&relay_url).unwrap();
        assert_eq!(relay.status(), RelayStatus::Disconnected);

        // Fixed reconnect delay
        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(mock.connection_count(), 1);

        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(mock.connection_count(), 2);
        assert_eq!(relay.status(), RelayStatus::Connected);

        // Same subscription, sent again on the new socket
        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, requests[1].0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_reconnect_resets_pending_acks() {
        let network = MockNetwork::new();
        let relay_url = url("wss://relay-a.mock");
        let mock = network.add_relay(&relay_url);
        mock.set_behavior(MockBehavior {
            silent: true,
            ..Default::default()
        });
        let pool = pool(&network);

        let event = note(&Keys::generate(), "hello", 1_700_000_000);

        let publisher = {
            let pool = pool.clone();
            let relay_url = relay_url.clone();
            tokio::spawn(async move { pool.publish([relay_url], &event).await })
        };

        time::sleep(Duration::from_millis(1000)).await;
        pool.reconnect_relay(relay_url.clone()).unwrap();

        let results = publisher.await.unwrap();
        assert!(!results[0].ok);
        assert_eq!(results[0].reason.as_deref(), Some("connection reset"));

        // No reconnect delay on a forced reconnection
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.connection_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_while_offline() {
        let network = MockNetwork::new();
        let relay_url = url("wss://relay-a.mock");
        let mock = network.add_relay(&relay_url);
        mock.set_offline(true);
        let pool = pool(&network);

        let _sub = pool
            .subscribe([relay_url.clone()], vec![Filter::new().kind(Kind::TextNote)])
            .unwrap();
        time::sleep(Duration::from_millis(100)).await;

        let inspection = pool.inspect();
        assert_eq!(inspection[0].status, RelayStatus::Disconnected);
        assert_eq!(inspection[0].queue_len, 1);
        assert_eq!(inspection[0].subscriptions, 1);

        mock.set_offline(false);
        time::sleep(Duration::from_secs(4)).await;

        let inspection = pool.inspect();
        assert_eq!(inspection[0].status, RelayStatus::Connected);
        assert_eq!(inspection[0].queue_len, 0);

        // Flushed from the queue once
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown() {
        let network = MockNetwork::new();
        let relay_url = url("wss://relay-a.mock");
        network.add_relay(&relay_url).set_behavior(MockBehavior {
            silent: true,
            ..Default::default()
        });
        let pool = pool(&network);

        let mut sub = pool
            .subscribe([relay_url.clone()], vec![Filter::new().kind(Kind::TextNote)])
            .unwrap();
        time::sleep(Duration::from_millis(100)).await;

        pool.shutdown();

        assert!(pool.is_shutdown());
        assert!(sub.next().await.is_none());
        assert!(matches!(
            pool.ensure_connection(relay_url.clone()),
            Err(Error::Shutdown)
        ));
        assert!(matches!(
            pool.subscribe([relay_url], vec![Filter::new()]),
            Err(Error::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_subscribe_without_relays() {
        let pool = RelayPool::new();
        let res = pool.subscribe(Vec::new(), vec![Filter::new()]);
        assert!(matches!(res, Err(Error::NoRelaysSpecified)));
    }
}
