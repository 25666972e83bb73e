// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Encrypted interactions (likes and comments)
//!
//! An interaction is sent as a [`INTERACTION_KIND`] event tagged with the message ID (`e`) and
//! the message author (`p`). The content is an [`Envelope`] readable by the message author and
//! by the sender.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use nostr::signer::NostrSigner;
use nostr::{Event, EventBuilder, EventId, Kind, PublicKey, RelayUrl, Tag, Timestamp, UnsignedEvent};
use nostr_sync_pool::pool::{accepted_count, PublishResult, RelayPool};
use nostr_sync_pool::SeenTracker;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::backfill::{Backfill, BackfillFilter, BackfillOptions, BackfillStats};
use crate::checkpoint::Checkpoints;
use crate::envelope::{Envelope, KeyWrap, INTERACTION_VERSION};
use crate::error::Error;
use crate::relays;
use crate::store::KeyValueStore;

/// Interaction event kind
pub const INTERACTION_KIND: Kind = Kind::Custom(24243);
/// Max pages of an interaction backfill
pub const DEFAULT_MAX_BATCHES: usize = 10;

const STORAGE_PREFIX: &str = "interactions";
// Comments of the same author with the same text closer than this are duplicates
const COMMENT_DEDUP_WINDOW: u64 = 5;

/// Like
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    /// Random ID
    pub id: String,
    /// Liked message
    pub message_id: EventId,
    /// Author of the like
    pub author: PublicKey,
    /// Creation time
    pub timestamp: Timestamp,
}

/// Comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Random ID
    pub id: String,
    /// Commented message
    pub message_id: EventId,
    /// Author of the comment
    pub author: PublicKey,
    /// Text
    pub text: String,
    /// Creation time
    pub timestamp: Timestamp,
    /// Comment this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_comment_id: Option<String>,
}

/// Interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Interaction {
    /// Like
    Like(Like),
    /// Comment
    Comment(Comment),
}

impl Interaction {
    /// ID
    pub fn id(&self) -> &str {
        match self {
            Self::Like(like) => &like.id,
            Self::Comment(comment) => &comment.id,
        }
    }

    /// Target message
    pub fn message_id(&self) -> &EventId {
        match self {
            Self::Like(like) => &like.message_id,
            Self::Comment(comment) => &comment.message_id,
        }
    }

    /// Author
    pub fn author(&self) -> &PublicKey {
        match self {
            Self::Like(like) => &like.author,
            Self::Comment(comment) => &comment.author,
        }
    }

    /// Creation time
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Like(like) => like.timestamp,
            Self::Comment(comment) => comment.timestamp,
        }
    }

    fn duplicates(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Like(a), Self::Like(b)) => a.author == b.author,
            (Self::Comment(a), Self::Comment(b)) => {
                a.author == b.author
                    && a.text == b.text
                    && a.timestamp.as_u64().abs_diff(b.timestamp.as_u64()) < COMMENT_DEDUP_WINDOW
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractionState {
    interactions: BTreeMap<EventId, Vec<Interaction>>,
    #[serde(default)]
    last_synced_at: Timestamp,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredFormat {
    Current(InteractionState),
    // Bare map, without sync timestamp
    Legacy(BTreeMap<EventId, Vec<Interaction>>),
}

/// Totals of [`InteractionSync::backfill`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionBackfill {
    /// Events received
    pub fetched: usize,
    /// Interactions added
    pub processed: usize,
    /// Checkpoint after the run
    pub checkpoint: Timestamp,
}

/// Interaction sync options
#[derive(Debug, Clone)]
pub struct InteractionOptions {
    wrap: KeyWrap,
    backfill: BackfillOptions,
}

impl Default for InteractionOptions {
    fn default() -> Self {
        Self {
            wrap: KeyWrap::default(),
            backfill: BackfillOptions::default().max_batches(DEFAULT_MAX_BATCHES),
        }
    }
}

impl InteractionOptions {
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

    /// Backfill options (default: 500 events per page, 10 pages max)
    #[inline]
    pub fn backfill(mut self, opts: BackfillOptions) -> Self {
        self.backfill = opts;
        self
    }
}

/// Likes and comments of the signer account
#[derive(Debug)]
pub struct InteractionSync {
    pool: RelayPool,
    signer: Arc<dyn NostrSigner>,
    store: Arc<dyn KeyValueStore>,
    checkpoints: Checkpoints,
    seen: SeenTracker,
    opts: InteractionOptions,
    state: RwLock<InteractionState>,
}

impl InteractionSync {
    /// New empty sync. Call [`InteractionSync::load`] to restore the local state.
    pub fn new(
        pool: RelayPool,
        signer: Arc<dyn NostrSigner>,
        store: Arc<dyn KeyValueStore>,
        opts: InteractionOptions,
    ) -> Self {
        Self {
            pool,
            signer,
            checkpoints: Checkpoints::new(store.clone()),
            store,
            seen: SeenTracker::default(),
            opts,
            state: RwLock::new(InteractionState::default()),
        }
    }

    /// Restore the local state
    pub async fn load(&self) -> Result<(), Error> {
        let key: String = self.storage_key().await?;

        let state: InteractionState = match self.store.get(&key).await? {
            Some(json) => match serde_json::from_str::<StoredFormat>(&json) {
                Ok(StoredFormat::Current(state)) => state,
                Ok(StoredFormat::Legacy(interactions)) => InteractionState {
                    interactions,
                    last_synced_at: Timestamp::from(0),
                },
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Can't parse local interactions.");
                    InteractionState::default()
                }
            },
            None => InteractionState::default(),
        };

        *self.state.write().await = state;

        Ok(())
    }

    /// Like a message
    ///
    /// If the message is already liked by us, the existing like is returned and nothing is sent.
    pub async fn send_like(
        &self,
        message_id: EventId,
        message_author: PublicKey,
    ) -> Result<Like, Error> {
        let me: PublicKey = self.signer.get_public_key().await?;

        if let Some(like) = self
            .likes(&message_id)
            .await
            .into_iter()
            .find(|like| like.author == me)
        {
            return Ok(like);
        }

        let like = Like {
            id: random_id(),
            message_id,
            author: me,
            timestamp: Timestamp::now(),
        };

        self.send(Interaction::Like(like.clone()), message_author)
            .await?;

        Ok(like)
    }

    /// Comment a message, or reply to a comment
    pub async fn send_comment<S>(
        &self,
        message_id: EventId,
        message_author: PublicKey,
        text: S,
        parent_comment_id: Option<String>,
    ) -> Result<Comment, Error>
    where
        S: AsRef<str>,
    {
        let comment = Comment {
            id: random_id(),
            message_id,
            author: self.signer.get_public_key().await?,
            text: text.as_ref().trim().to_string(),
            timestamp: Timestamp::now(),
            parent_comment_id,
        };

        self.send(Interaction::Comment(comment.clone()), message_author)
            .await?;

        Ok(comment)
    }

    /// Remove our like. Local only, nothing is sent.
    pub async fn remove_like(&self, message_id: &EventId) -> Result<bool, Error> {
        let me: PublicKey = self.signer.get_public_key().await?;
        let key: String = self.storage_key().await?;

        let mut state = self.state.write().await;

        let Some(items) = state.interactions.get_mut(message_id) else {
            return Ok(false);
        };

        let Some(pos) = items
            .iter()
            .position(|i| matches!(i, Interaction::Like(like) if like.author == me))
        else {
            return Ok(false);
        };

        items.remove(pos);

        if items.is_empty() {
            state.interactions.remove(message_id);
        }

        self.save(&key, &state).await?;

        Ok(true)
    }

    /// Handle a received interaction event
    ///
    /// Returns `true` if a new interaction was added. Events already handled, not addressed to
    /// us or with an unreadable payload are skipped.
    pub async fn process_event(&self, event: &Event) -> Result<bool, Error> {
        if event.kind != INTERACTION_KIND {
            return Ok(false);
        }

        if self.seen.seen(event.id).await {
            return Ok(false);
        }

        let envelope: Envelope = match Envelope::from_json(&event.content) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(id = %event.id, error = %e, "Interaction without envelope.");
                return Ok(false);
            }
        };

        let json: String = match envelope
            .open(self.signer.as_ref(), &event.pubkey, self.opts.wrap)
            .await
        {
            Ok(json) => json,
            Err(Error::NotARecipient) => return Ok(false),
            Err(e) => {
                tracing::warn!(id = %event.id, error = %e, "Can't open interaction envelope.");
                return Ok(false);
            }
        };

        let interaction: Interaction = match serde_json::from_str(&json) {
            Ok(interaction) => interaction,
            Err(e) => {
                tracing::warn!(id = %event.id, error = %e, "Invalid interaction payload.");
                return Ok(false);
            }
        };

        if interaction.author() != &event.pubkey {
            tracing::warn!(id = %event.id, "Interaction author doesn't match the event author.");
            return Ok(false);
        }

        self.insert(interaction, Some(event.created_at)).await
    }

    /// Pull the interactions addressed to us since the last sync
    pub async fn backfill(&self) -> Result<InteractionBackfill, Error> {
        let me: PublicKey = self.signer.get_public_key().await?;
        let relays: Vec<RelayUrl> = relays::load_relays(self.store.as_ref()).await?;
        let key: String = self.storage_key().await?;

        let last_synced_at: Timestamp = self.last_synced_at().await;
        let since: Timestamp = match self.checkpoints.load(&key).await? {
            Some(checkpoint) => checkpoint.max(last_synced_at),
            None => last_synced_at,
        };
        let until: Timestamp = Timestamp::now();

        if since >= until {
            return Ok(InteractionBackfill {
                checkpoint: since,
                ..Default::default()
            });
        }

        tracing::info!(since = %since, until = %until, "Backfilling interactions.");

        let mut filter: BackfillFilter = BackfillFilter::new()
            .kind(INTERACTION_KIND)
            .pubkey(me)
            .until(until);

        if since > Timestamp::from(0) {
            filter = filter.since(since);
        }

        let processed: AtomicUsize = AtomicUsize::new(0);
        let counter: &AtomicUsize = &processed;

        let on_event = move |event: Event| async move {
            if self.process_event(&event).await? {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok::<(), Error>(())
        };

        let stats: BackfillStats = Backfill::new(&self.pool, relays, filter, on_event)
            .opts(self.opts.backfill.clone())
            .on_progress(|stats| {
                tracing::debug!(events = stats.total_events, "Interaction backfill progress.");
            })
            .await?;

        let checkpoint: Timestamp = self.checkpoints.advance(&key, &stats, until).await?;

        let report = InteractionBackfill {
            fetched: stats.total_events,
            processed: processed.load(Ordering::SeqCst),
            checkpoint,
        };

        tracing::info!(
            fetched = report.fetched,
            processed = report.processed,
            "Interaction backfill completed."
        );

        Ok(report)
    }

    /// Interactions of a message, in insertion order
    pub async fn interactions(&self, message_id: &EventId) -> Vec<Interaction> {
        let state = self.state.read().await;
        state
            .interactions
            .get(message_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Likes of a message
    pub async fn likes(&self, message_id: &EventId) -> Vec<Like> {
        self.interactions(message_id)
            .await
            .into_iter()
            .filter_map(|i| match i {
                Interaction::Like(like) => Some(like),
                Interaction::Comment(..) => None,
            })
            .collect()
    }

    /// Comments of a message, replies included
    pub async fn comments(&self, message_id: &EventId) -> Vec<Comment> {
        self.interactions(message_id)
            .await
            .into_iter()
            .filter_map(|i| match i {
                Interaction::Comment(comment) => Some(comment),
                Interaction::Like(..) => None,
            })
            .collect()
    }

    /// Replies to a comment
    pub async fn replies(&self, message_id: &EventId, parent_comment_id: &str) -> Vec<Comment> {
        self.comments(message_id)
            .await
            .into_iter()
            .filter(|c| c.parent_comment_id.as_deref() == Some(parent_comment_id))
            .collect()
    }

    /// Number of likes of a message
    pub async fn like_count(&self, message_id: &EventId) -> usize {
        self.likes(message_id).await.len()
    }

    /// Number of comments of a message
    pub async fn comment_count(&self, message_id: &EventId) -> usize {
        self.comments(message_id).await.len()
    }

    /// Check if `public_key` liked the message
    pub async fn is_liked_by(&self, message_id: &EventId, public_key: &PublicKey) -> bool {
        self.likes(message_id)
            .await
            .iter()
            .any(|like| &like.author == public_key)
    }

    /// Newest interaction event handled
    pub async fn last_synced_at(&self) -> Timestamp {
        self.state.read().await.last_synced_at
    }

    async fn send(&self, interaction: Interaction, recipient: PublicKey) -> Result<(), Error> {
        let json: String = serde_json::to_string(&interaction)?;
        let envelope: Envelope = Envelope::seal(
            self.signer.as_ref(),
            INTERACTION_VERSION,
            &[recipient],
            &json,
            self.opts.wrap,
        )
        .await?;

        let unsigned: UnsignedEvent = EventBuilder::new(INTERACTION_KIND, envelope.as_json()?)
            .tag(Tag::event(*interaction.message_id()))
            .tag(Tag::public_key(recipient))
            .build(*interaction.author());
        let event: Event = self.signer.sign_event(unsigned).await?;

        let relays: Vec<RelayUrl> = relays::load_relays(self.store.as_ref()).await?;
        let results: Vec<PublishResult> = self.pool.publish(relays, &event).await;

        if accepted_count(&results) == 0 {
            return Err(Error::NoRelaysAccepted);
        }

        tracing::debug!(id = %event.id, message = %interaction.message_id(), "Interaction published.");

        // Our own event must not be added twice when it comes back from relays
        self.seen.seen(event.id).await;
        self.insert(interaction, None).await?;

        Ok(())
    }

    async fn insert(
        &self,
        interaction: Interaction,
        event_timestamp: Option<Timestamp>,
    ) -> Result<bool, Error> {
        let key: String = self.storage_key().await?;
        let mut state = self.state.write().await;

        let items: &mut Vec<Interaction> = state
            .interactions
            .entry(*interaction.message_id())
            .or_default();

        let added: bool = !items.iter().any(|i| i.duplicates(&interaction));
        if added {
            items.push(interaction);
        }

        let mut advanced: bool = false;
        if let Some(timestamp) = event_timestamp {
            if timestamp > state.last_synced_at {
                state.last_synced_at = timestamp;
                advanced = true;
            }
        }

        if added || advanced {
            self.save(&key, &state).await?;
        }

        Ok(added)
    }

    async fn save(&self, key: &str, state: &InteractionState) -> Result<(), Error> {
        self.store.set(key, serde_json::to_string(state)?).await?;
        Ok(())
    }

    async fn storage_key(&self) -> Result<String, Error> {
        let me: PublicKey = self.signer.get_public_key().await?;
        Ok(format!("{STORAGE_PREFIX}_{}", me.to_hex()))
    }
}

fn random_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
