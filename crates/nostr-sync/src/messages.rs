// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Posts, inbox and outbox
//!
//! A post is a [`POST_KIND`] event without tags. The content is an [`Envelope`] readable by every
//! recipient and by the author. Received posts land in the inbox, sent posts in the outbox
//! together with the per-relay publish results. Both are kept per account and bounded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nostr::signer::NostrSigner;
use nostr::{Event, EventBuilder, EventId, Kind, PublicKey, RelayUrl, Timestamp, UnsignedEvent};
use nostr_sync_pool::pool::{accepted_count, PublishResult, RelayPool};
use nostr_sync_pool::SeenTracker;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::backfill::{Backfill, BackfillFilter, BackfillOptions, BackfillStats};
use crate::checkpoint::Checkpoints;
use crate::envelope::{Envelope, KeyWrap, MESSAGE_VERSION};
use crate::error::Error;
use crate::relays;
use crate::store::KeyValueStore;

/// Post event kind
pub const POST_KIND: Kind = Kind::Custom(8964);
/// Max inbox items
pub const INBOX_LIMIT: usize = 1000;
/// Max outbox items
pub const OUTBOX_LIMIT: usize = 500;

const INBOX_PREFIX: &str = "nostr_inbox";
const OUTBOX_PREFIX: &str = "nostr_outbox";
const CHECKPOINT_PREFIX: &str = "messages";

/// Received post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxItem {
    /// Event ID
    pub id: EventId,
    /// Author
    pub pubkey: PublicKey,
    /// Event creation time
    pub created_at: Timestamp,
    /// Sealed envelope, as received
    pub content: String,
}

impl From<&Event> for InboxItem {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            pubkey: event.pubkey,
            created_at: event.created_at,
            content: event.content.clone(),
        }
    }
}

/// Publish outcome of a post on one relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResult {
    /// Relay URL
    pub relay: String,
    /// Accepted
    pub ok: bool,
    /// Relay message or failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the result was resolved
    pub ts: Timestamp,
}

impl From<&PublishResult> for RelayResult {
    fn from(result: &PublishResult) -> Self {
        Self {
            relay: result.relay.to_string(),
            ok: result.ok,
            reason: result.reason.clone(),
            ts: result.timestamp,
        }
    }
}

/// Sent post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxItem {
    /// Event ID
    pub id: EventId,
    /// Event creation time
    pub created_at: Timestamp,
    /// When the publish completed
    pub sent_at: Timestamp,
    /// Sealed envelope
    pub content: String,
    /// Per-relay results
    #[serde(rename = "relayResults", default)]
    pub relay_results: Vec<RelayResult>,
}

impl OutboxItem {
    /// Count the relays that accepted the post
    #[inline]
    pub fn accepted(&self) -> usize {
        self.relay_results.iter().filter(|r| r.ok).count()
    }
}

/// Result of [`MessageBox::publish_post`]
#[derive(Debug, Clone)]
pub struct PostOutcome {
    /// Signed post
    pub event: Event,
    /// Per-relay results
    pub relay_results: Vec<PublishResult>,
}

/// Totals of [`MessageBox::backfill`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBackfill {
    /// Events received
    pub fetched: usize,
    /// Posts added to the inbox
    pub added: usize,
    /// Checkpoint after the run
    pub checkpoint: Timestamp,
}

/// Message box options
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    wrap: KeyWrap,
    backfill: BackfillOptions,
}

impl MessageOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelope key wrapping (default: NIP04)
    #[inline]
    pub fn key_wrap(mut self, wrap: KeyWrap) -> Self {
        self.wrap = wrap;
        self
    }

    /// Backfill options
    #[inline]
    pub fn backfill(mut self, opts: BackfillOptions) -> Self {
        self.backfill = opts;
        self
    }
}

#[derive(Debug, Default)]
struct MessageState {
    inbox: Vec<InboxItem>,
    outbox: Vec<OutboxItem>,
}

/// Inbox and outbox of the signer account
#[derive(Debug)]
pub struct MessageBox {
    pool: RelayPool,
    signer: Arc<dyn NostrSigner>,
    store: Arc<dyn KeyValueStore>,
    checkpoints: Checkpoints,
    seen: SeenTracker,
    opts: MessageOptions,
    state: RwLock<MessageState>,
}

impl MessageBox {
    /// New empty message box. Call [`MessageBox::load`] to restore the local state.
    pub fn new(
        pool: RelayPool,
        signer: Arc<dyn NostrSigner>,
        store: Arc<dyn KeyValueStore>,
        opts: MessageOptions,
    ) -> Self {
        Self {
            pool,
            signer,
            checkpoints: Checkpoints::new(store.clone()),
            store,
            seen: SeenTracker::default(),
            opts,
            state: RwLock::new(MessageState::default()),
        }
    }

    /// Restore the inbox and the outbox of the signer account
    ///
    /// Unreadable stored lists are replaced by empty ones.
    pub async fn load(&self) -> Result<(), Error> {
        let me: PublicKey = self.signer.get_public_key().await?;

        let inbox: Vec<InboxItem> = self.load_list(&storage_key(INBOX_PREFIX, &me)).await?;
        let outbox: Vec<OutboxItem> = self.load_list(&storage_key(OUTBOX_PREFIX, &me)).await?;

        let mut state = self.state.write().await;
        state.inbox = inbox;
        state.outbox = outbox;

        Ok(())
    }

    /// Seal `text` for `recipients` and publish it to the configured relays
    ///
    /// The author is always added to the recipients. The post is recorded in the outbox with
    /// the per-relay results, even if no relay accepted it, and in our own inbox.
    pub async fn publish_post<S>(
        &self,
        recipients: &[PublicKey],
        text: S,
    ) -> Result<PostOutcome, Error>
    where
        S: AsRef<str>,
    {
        if recipients.is_empty() {
            return Err(Error::EmptyRecipients);
        }

        let me: PublicKey = self.signer.get_public_key().await?;

        let envelope: Envelope = Envelope::seal(
            self.signer.as_ref(),
            MESSAGE_VERSION,
            recipients,
            text.as_ref(),
            self.opts.wrap,
        )
        .await?;
        let content: String = envelope.as_json()?;

        let unsigned: UnsignedEvent = EventBuilder::new(POST_KIND, content).build(me);
        let event: Event = self.signer.sign_event(unsigned).await?;

        let relays: Vec<RelayUrl> = relays::load_relays(self.store.as_ref()).await?;
        let relay_results: Vec<PublishResult> = self.pool.publish(relays, &event).await;

        let accepted: usize = accepted_count(&relay_results);
        if accepted == 0 {
            tracing::warn!(id = %event.id, "Post not accepted by any relay.");
        } else {
            tracing::debug!(id = %event.id, accepted, "Post published.");
        }

        // Our own post coming back from relays is already in the inbox
        self.seen.seen(event.id).await;

        self.add_outbox(OutboxItem {
            id: event.id,
            created_at: event.created_at,
            sent_at: Timestamp::now(),
            content: event.content.clone(),
            relay_results: relay_results.iter().map(RelayResult::from).collect(),
        })
        .await?;
        self.add_inbox(InboxItem::from(&event)).await?;

        Ok(PostOutcome {
            event,
            relay_results,
        })
    }

    /// Handle a received post
    ///
    /// Returns `true` if it was added to the inbox. Posts already handled, not addressed to us
    /// or without an envelope are skipped.
    pub async fn process_event(&self, event: &Event) -> Result<bool, Error> {
        if event.kind != POST_KIND {
            return Ok(false);
        }

        if self.seen.seen(event.id).await {
            return Ok(false);
        }

        let envelope: Envelope = match Envelope::from_json(&event.content) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(id = %event.id, error = %e, "Post without envelope.");
                return Ok(false);
            }
        };

        let me: PublicKey = self.signer.get_public_key().await?;
        if !envelope.is_recipient(&me) {
            return Ok(false);
        }

        self.add_inbox(InboxItem::from(event)).await
    }

    /// Pull the posts of `authors` and our own since the last run
    pub async fn backfill<I>(&self, authors: I) -> Result<MessageBackfill, Error>
    where
        I: IntoIterator<Item = PublicKey>,
    {
        let me: PublicKey = self.signer.get_public_key().await?;
        let relays: Vec<RelayUrl> = relays::load_relays(self.store.as_ref()).await?;
        let key: String = storage_key(CHECKPOINT_PREFIX, &me);

        let since: Timestamp = self.checkpoints.load(&key).await?.unwrap_or_default();
        let until: Timestamp = Timestamp::now();

        if since >= until {
            return Ok(MessageBackfill {
                checkpoint: since,
                ..Default::default()
            });
        }

        tracing::info!(since = %since, until = %until, "Backfilling inbox.");

        let mut filter: BackfillFilter = BackfillFilter::new()
            .kind(POST_KIND)
            .authors(authors)
            .author(me)
            .until(until);

        if since > Timestamp::from(0) {
            filter = filter.since(since);
        }

        let added: AtomicUsize = AtomicUsize::new(0);
        let counter: &AtomicUsize = &added;

        let on_event = move |event: Event| async move {
            if self.process_event(&event).await? {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok::<(), Error>(())
        };

        let stats: BackfillStats = Backfill::new(&self.pool, relays, filter, on_event)
            .opts(self.opts.backfill.clone())
            .on_progress(|stats| {
                tracing::debug!(events = stats.total_events, "Inbox backfill progress.");
            })
            .await?;

        let checkpoint: Timestamp = self.checkpoints.advance(&key, &stats, until).await?;

        let report = MessageBackfill {
            fetched: stats.total_events,
            added: added.load(Ordering::SeqCst),
            checkpoint,
        };

        tracing::info!(
            fetched = report.fetched,
            added = report.added,
            "Inbox backfill completed."
        );

        Ok(report)
    }

    /// Decrypt an inbox item
    pub async fn open(&self, item: &InboxItem) -> Result<String, Error> {
        let envelope: Envelope = Envelope::from_json(&item.content)?;
        envelope
            .open(self.signer.as_ref(), &item.pubkey, self.opts.wrap)
            .await
    }

    /// Received posts, newest first
    pub async fn inbox(&self) -> Vec<InboxItem> {
        self.state.read().await.inbox.clone()
    }

    /// Sent posts, newest first
    pub async fn outbox(&self) -> Vec<OutboxItem> {
        self.state.read().await.outbox.clone()
    }

    /// Clear the inbox and the outbox, and optionally their stored copies
    pub async fn reset(&self, remove_from_storage: bool) -> Result<(), Error> {
        let me: PublicKey = self.signer.get_public_key().await?;

        let mut state = self.state.write().await;
        state.inbox.clear();
        state.outbox.clear();

        if remove_from_storage {
            self.store.remove(&storage_key(INBOX_PREFIX, &me)).await?;
            self.store.remove(&storage_key(OUTBOX_PREFIX, &me)).await?;
        }

        Ok(())
    }

    async fn add_inbox(&self, item: InboxItem) -> Result<bool, Error> {
        let key: String = self.inbox_key().await?;
        let mut state = self.state.write().await;

        if state.inbox.iter().any(|i| i.id == item.id) {
            return Ok(false);
        }

        let mut inbox: Vec<InboxItem> = Vec::with_capacity(state.inbox.len() + 1);
        inbox.push(item);
        inbox.extend(state.inbox.iter().take(INBOX_LIMIT - 1).cloned());

        self.store.set(&key, serde_json::to_string(&inbox)?).await?;
        state.inbox = inbox;

        Ok(true)
    }

    async fn add_outbox(&self, item: OutboxItem) -> Result<(), Error> {
        let key: String = self.outbox_key().await?;
        let mut state = self.state.write().await;

        let mut outbox: Vec<OutboxItem> = Vec::with_capacity(state.outbox.len() + 1);
        outbox.push(item);
        outbox.extend(state.outbox.iter().take(OUTBOX_LIMIT - 1).cloned());

        self.store.set(&key, serde_json::to_string(&outbox)?).await?;
        state.outbox = outbox;

        Ok(())
    }

    async fn load_list<T>(&self, key: &str) -> Result<Vec<T>, Error>
    where
        T: for<'de> Deserialize<'de>,
    {
        match self.store.get(key).await? {
            Some(json) => match serde_json::from_str(&json) {
                Ok(list) => Ok(list),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Can't parse local messages.");
                    Ok(Vec::new())
                }
            },
            None => Ok(Vec::new()),
        }
    }

    async fn inbox_key(&self) -> Result<String, Error> {
        let me: PublicKey = self.signer.get_public_key().await?;
        Ok(storage_key(INBOX_PREFIX, &me))
    }

    async fn outbox_key(&self) -> Result<String, Error> {
        let me: PublicKey = self.signer.get_public_key().await?;
        Ok(storage_key(OUTBOX_PREFIX, &me))
    }
}

#[inline]
fn storage_key(prefix: &str, public_key: &PublicKey) -> String {
    format!("{prefix}_{}", public_key.to_hex())
}

#[cfg(test)]
mod tests {
    use nostr::Keys;
    use nostr_sync_pool::mock::{MockNetwork, MockRelay};

    use super::*;
    use crate::store::MemoryStore;

    struct Setup {
        keys: Keys,
        relay: MockRelay,
        store: Arc<MemoryStore>,
        messages: MessageBox,
    }

    async fn setup() -> Setup {
        let network = MockNetwork::new();
        let url = RelayUrl::parse("wss://relay.example.com").unwrap();
        let relay = network.add_relay(&url);

        let store = Arc::new(MemoryStore::new());
        relays::save_relays(store.as_ref(), &[url]).await.unwrap();

        let pool = RelayPool::builder().websocket_transport(network).build();
        let keys = Keys::generate();
        let messages = MessageBox::new(
            pool,
            Arc::new(keys.clone()),
            store.clone(),
            MessageOptions::default(),
        );

        Setup {
            keys,
            relay,
            store,
            messages,
        }
    }

    async fn post_event(author: &Keys, recipients: &[PublicKey], text: &str, created_at: u64) -> Event {
        let envelope = Envelope::seal(author, MESSAGE_VERSION, recipients, text, KeyWrap::Nip04)
            .await
            .unwrap();
        EventBuilder::new(POST_KIND, envelope.as_json().unwrap())
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(author)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_post() {
        let setup = setup().await;
        let bob = Keys::generate();
        let me = setup.keys.public_key();

        let outcome = setup
            .messages
            .publish_post(&[bob.public_key()], "hello friends")
            .await
            .unwrap();
        assert_eq!(accepted_count(&outcome.relay_results), 1);

        let received = setup.relay.received_events();
        assert_eq!(received.len(), 1);
        let event = &received[0];
        assert_eq!(event.kind, POST_KIND);
        assert!(event.tags.is_empty());

        let envelope = Envelope::from_json(&event.content).unwrap();
        assert_eq!(envelope.version, MESSAGE_VERSION);
        assert!(envelope.is_recipient(&bob.public_key()));
        assert!(envelope.is_recipient(&me));
        assert_eq!(
            envelope.open(&bob, &me, KeyWrap::Nip04).await.unwrap(),
            "hello friends"
        );

        let outbox = setup.messages.outbox().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].id, event.id);
        assert_eq!(outbox[0].accepted(), 1);
        assert_eq!(
            outbox[0].relay_results[0].relay,
            RelayUrl::parse("wss://relay.example.com").unwrap().to_string()
        );

        // Readable from our own inbox
        let inbox = setup.messages.inbox().await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(setup.messages.open(&inbox[0]).await.unwrap(), "hello friends");

        // Not added twice when it comes back from relays
        assert!(!setup.messages.process_event(event).await.unwrap());
        assert_eq!(setup.messages.inbox().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_post_without_recipients() {
        let setup = setup().await;

        let res = setup.messages.publish_post(&[], "hello").await;
        assert!(matches!(res, Err(Error::EmptyRecipients)));
        assert!(setup.relay.received_events().is_empty());
        assert!(setup.messages.outbox().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_received_posts() {
        let setup = setup().await;
        let bob = Keys::generate();
        let carol = Keys::generate();
        let me = setup.keys.public_key();

        let event = post_event(&bob, &[me], "for you", 1_000).await;
        assert!(setup.messages.process_event(&event).await.unwrap());
        assert!(!setup.messages.process_event(&event).await.unwrap());

        // Not addressed to us
        let other = post_event(&bob, &[carol.public_key()], "not for you", 1_001).await;
        assert!(!setup.messages.process_event(&other).await.unwrap());

        // Not an envelope
        let plain = EventBuilder::new(POST_KIND, "hello")
            .sign_with_keys(&bob)
            .unwrap();
        assert!(!setup.messages.process_event(&plain).await.unwrap());

        let inbox = setup.messages.inbox().await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].pubkey, bob.public_key());
        assert_eq!(setup.messages.open(&inbox[0]).await.unwrap(), "for you");
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbox_is_bounded_newest_first() {
        let setup = setup().await;
        let bob = Keys::generate();

        for n in 0..(INBOX_LIMIT as u64 + 2) {
            let mut id = [0u8; 32];
            id[..8].copy_from_slice(&n.to_be_bytes());
            let item = InboxItem {
                id: EventId::from_byte_array(id),
                pubkey: bob.public_key(),
                created_at: Timestamp::from(n),
                content: String::new(),
            };
            assert!(setup.messages.add_inbox(item).await.unwrap());
        }

        let inbox = setup.messages.inbox().await;
        assert_eq!(inbox.len(), INBOX_LIMIT);
        assert_eq!(inbox[0].created_at, Timestamp::from(INBOX_LIMIT as u64 + 1));
        assert_eq!(inbox.last().unwrap().created_at, Timestamp::from(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_and_reset() {
        let setup = setup().await;
        let bob = Keys::generate();

        let event = post_event(&bob, &[setup.keys.public_key()], "hi", 1_000).await;
        setup.messages.process_event(&event).await.unwrap();
        setup
            .messages
            .publish_post(&[bob.public_key()], "hey")
            .await
            .unwrap();

        let other = MessageBox::new(
            RelayPool::new(),
            Arc::new(setup.keys.clone()),
            setup.store.clone(),
            MessageOptions::default(),
        );
        other.load().await.unwrap();
        assert_eq!(other.inbox().await.len(), 2);
        assert_eq!(other.outbox().await.len(), 1);
        assert_eq!(other.inbox().await, setup.messages.inbox().await);

        // Outbox JSON keeps the relay results
        let key = format!("nostr_outbox_{}", setup.keys.public_key().to_hex());
        let json = setup.store.get(&key).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["relayResults"][0]["ok"], true);

        // Local reset keeps the stored copy
        other.reset(false).await.unwrap();
        assert!(other.inbox().await.is_empty());
        other.load().await.unwrap();
        assert_eq!(other.inbox().await.len(), 2);

        other.reset(true).await.unwrap();
        other.load().await.unwrap();
        assert!(other.inbox().await.is_empty());
        assert!(other.outbox().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_stored_lists_are_dropped() {
        let setup = setup().await;
        let key = format!("nostr_inbox_{}", setup.keys.public_key().to_hex());
        setup.store.set(&key, String::from("{not json")).await.unwrap();

        setup.messages.load().await.unwrap();
        assert!(setup.messages.inbox().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backfill() {
        let setup = setup().await;
        let me = setup.keys.public_key();
        let bob = Keys::generate();
        let carol = Keys::generate();
        let now = Timestamp::now().as_u64();

        setup.relay.add_events([
            post_event(&bob, &[me], "one", now - 30).await,
            post_event(&bob, &[carol.public_key()], "not for me", now - 20).await,
            post_event(&carol, &[me], "not followed", now - 10).await,
        ]);

        let report = setup.messages.backfill([bob.public_key()]).await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.added, 1);
        assert_eq!(report.checkpoint, Timestamp::from(now - 20));

        let requests = setup.relay.requests();
        let filter = &requests[0].1[0];
        let authors = filter.authors.as_ref().unwrap();
        assert!(authors.contains(&bob.public_key()));
        assert!(authors.contains(&me));
        assert!(!authors.contains(&carol.public_key()));

        let inbox = setup.messages.inbox().await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(setup.messages.open(&inbox[0]).await.unwrap(), "one");

        // Next run starts from the checkpoint
        let report = setup.messages.backfill([bob.public_key()]).await.unwrap();
        assert_eq!(report.added, 0);
        let requests = setup.relay.requests();
        assert_eq!(requests.last().unwrap().1[0].since, Some(Timestamp::from(now - 20)));
    }
}
