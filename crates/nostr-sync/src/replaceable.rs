// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Replaceable record sync
//!
//! A record is published as an addressable event (`d` tag = [`SyncRecord::IDENTIFIER`]) whose
//! content is an [`Envelope`] addressed to the author only. The whole record is replaced on
//! every mutation and the copy with the newest timestamp wins.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use nostr::signer::NostrSigner;
use nostr::{Event, EventBuilder, Filter, Kind, PublicKey, RelayUrl, Tag, Timestamp, UnsignedEvent};
use nostr_sync_pool::pool::{accepted_count, PublishResult, RelayPool};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::backfill;
use crate::envelope::{Envelope, KeyWrap, MESSAGE_VERSION};
use crate::error::Error;
use crate::relays;
use crate::store::KeyValueStore;

/// Kind of replaceable records
pub const DEFAULT_RECORD_KIND: Kind = Kind::Custom(30000);
/// Max wait for the remote copy
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Record synchronized across devices
pub trait SyncRecord: Debug + Default + Clone + Serialize + DeserializeOwned + Send + Sync {
    /// Value of the `d` tag
    const IDENTIFIER: &'static str;

    /// Prefix of the local storage key (the owner public key is appended)
    const STORAGE_PREFIX: &'static str;

    /// Check if the record holds no data
    fn is_empty(&self) -> bool;
}

/// Local copy of a record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord<T> {
    /// Record
    #[serde(alias = "settings")]
    pub record: T,
    /// Timestamp of the last mutation (local) or of the adopted event (remote)
    pub last_sync_timestamp: Timestamp,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredFormat<T> {
    Current(StoredRecord<T>),
    // Bare record, without timestamp
    Legacy(T),
}

/// Outcome of [`ReplaceableSync::sync`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDecision {
    /// The remote copy was newer or equal and replaced the local one
    AdoptedRemote,
    /// The local copy was newer (or the only one) and was republished
    KeptLocal {
        /// At least one relay accepted the republished record
        published: bool,
    },
    /// No copy anywhere
    Empty,
}

/// Replaceable record options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceableOptions {
    kind: Kind,
    fetch_timeout: Duration,
    wrap: KeyWrap,
}

impl Default for ReplaceableOptions {
    fn default() -> Self {
        Self {
            kind: DEFAULT_RECORD_KIND,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            wrap: KeyWrap::default(),
        }
    }
}

impl ReplaceableOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Event kind (default: 30000)
    #[inline]
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    /// Max wait for the remote copy (default: 5 secs)
    #[inline]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Envelope key wrapping (default: NIP04)
    #[inline]
    pub fn key_wrap(mut self, wrap: KeyWrap) -> Self {
        self.wrap = wrap;
        self
    }
}

/// Sync of one [`SyncRecord`] for the signer account
///
/// Relays are read from the store ([`relays::load_relays`]) at every network operation.
#[derive(Debug)]
pub struct ReplaceableSync<T> {
    pool: RelayPool,
    signer: Arc<dyn NostrSigner>,
    store: Arc<dyn KeyValueStore>,
    opts: ReplaceableOptions,
    state: RwLock<StoredRecord<T>>,
}

impl<T> ReplaceableSync<T>
where
    T: SyncRecord,
{
    /// New sync with an empty record. Call [`ReplaceableSync::sync`] to load it.
    pub fn new(
        pool: RelayPool,
        signer: Arc<dyn NostrSigner>,
        store: Arc<dyn KeyValueStore>,
        opts: ReplaceableOptions,
    ) -> Self {
        Self {
            pool,
            signer,
            store,
            opts,
            state: RwLock::new(StoredRecord::default()),
        }
    }

    /// Current record
    pub async fn record(&self) -> T {
        self.state.read().await.record.clone()
    }

    /// Timestamp of the current record
    pub async fn last_sync_timestamp(&self) -> Timestamp {
        self.state.read().await.last_sync_timestamp
    }

    /// Load the local copy, compare it with the newest remote copy and keep the latest
    ///
    /// - Remote newer or equal: adopt and persist it, no republish.
    /// - Remote older or missing: keep the local copy and republish it.
    pub async fn sync(&self) -> Result<SyncDecision, Error> {
        let local: Option<StoredRecord<T>> = self
            .load_local()
            .await?
            .filter(|local| !local.record.is_empty());

        let remote: Option<StoredRecord<T>> = match self.fetch_remote().await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(identifier = T::IDENTIFIER, error = %e, "Can't fetch remote record.");
                None
            }
        };

        match (local, remote) {
            (local, Some(remote))
                if local
                    .as_ref()
                    .is_none_or(|local| remote.last_sync_timestamp >= local.last_sync_timestamp) =>
            {
                tracing::info!(
                    identifier = T::IDENTIFIER,
                    timestamp = %remote.last_sync_timestamp,
                    "Using remote record."
                );

                self.save_local(&remote).await?;
                *self.state.write().await = remote;

                Ok(SyncDecision::AdoptedRemote)
            }
            (Some(local), _) => {
                tracing::info!(
                    identifier = T::IDENTIFIER,
                    timestamp = %local.last_sync_timestamp,
                    "Using local record."
                );

                *self.state.write().await = local;

                let published: bool = match self.publish().await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(identifier = T::IDENTIFIER, error = %e, "Can't publish local record.");
                        false
                    }
                };

                Ok(SyncDecision::KeptLocal { published })
            }
            (None, _) => {
                *self.state.write().await = StoredRecord::default();
                Ok(SyncDecision::Empty)
            }
        }
    }

    /// Mutate the record, persist it locally and publish it
    ///
    /// The local copy is saved even when no relay accepts the event
    /// ([`Error::NoRelaysAccepted`]).
    pub async fn update<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut T) -> R,
    {
        let output: R = {
            let mut state = self.state.write().await;
            let output: R = f(&mut state.record);

            // Relays replace only on a newer `created_at`
            let next: Timestamp = Timestamp::from(state.last_sync_timestamp.as_u64() + 1);
            state.last_sync_timestamp = Timestamp::now().max(next);

            self.save_local(&state).await?;
            output
        };

        self.publish().await?;

        Ok(output)
    }

    /// Publish the current record
    pub async fn publish(&self) -> Result<Vec<PublishResult>, Error> {
        let stored: StoredRecord<T> = self.state.read().await.clone();
        let owner: PublicKey = self.signer.get_public_key().await?;

        let json: String = serde_json::to_string(&stored.record)?;
        let envelope: Envelope = Envelope::seal(
            self.signer.as_ref(),
            MESSAGE_VERSION,
            &[owner],
            &json,
            self.opts.wrap,
        )
        .await?;

        let unsigned: UnsignedEvent = EventBuilder::new(self.opts.kind, envelope.as_json()?)
            .tag(Tag::identifier(T::IDENTIFIER))
            .custom_created_at(stored.last_sync_timestamp)
            .build(owner);
        let event: Event = self.signer.sign_event(unsigned).await?;

        let relays: Vec<RelayUrl> = relays::load_relays(self.store.as_ref()).await?;
        let total: usize = relays.len();
        let results: Vec<PublishResult> = self.pool.publish(relays, &event).await;

        let accepted: usize = accepted_count(&results);
        if accepted == 0 {
            tracing::warn!(identifier = T::IDENTIFIER, "Record not accepted by any relay.");
            return Err(Error::NoRelaysAccepted);
        }

        tracing::info!(
            identifier = T::IDENTIFIER,
            id = %event.id,
            "Record published to {accepted}/{total} relays."
        );

        Ok(results)
    }

    /// Newest remote copy
    pub async fn fetch_remote(&self) -> Result<Option<StoredRecord<T>>, Error> {
        let owner: PublicKey = self.signer.get_public_key().await?;
        let relays: Vec<RelayUrl> = relays::load_relays(self.store.as_ref()).await?;

        let filter: Filter = Filter::new()
            .kind(self.opts.kind)
            .author(owner)
            .identifier(T::IDENTIFIER)
            .limit(1);

        let events: Vec<Event> =
            backfill::fetch_batch(&self.pool, &relays, filter, self.opts.fetch_timeout).await?;

        let Some(latest) = events.into_iter().max_by_key(|e| e.created_at) else {
            return Ok(None);
        };

        let json: String = self.decrypt_content(&owner, &latest.content).await?;
        let record: T = serde_json::from_str(&json)?;

        Ok(Some(StoredRecord {
            record,
            last_sync_timestamp: latest.created_at,
        }))
    }

    /// Local copy, if any
    ///
    /// Records stored without timestamp are loaded with timestamp `0`.
    pub async fn load_local(&self) -> Result<Option<StoredRecord<T>>, Error> {
        let key: String = self.storage_key().await?;

        let Some(json) = self.store.get(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<StoredFormat<T>>(&json) {
            Ok(StoredFormat::Current(stored)) => Ok(Some(stored)),
            Ok(StoredFormat::Legacy(record)) => Ok(Some(StoredRecord {
                record,
                last_sync_timestamp: Timestamp::from(0),
            })),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Can't parse local record.");
                Ok(None)
            }
        }
    }

    /// Forget the local copy
    pub async fn reset(&self) -> Result<(), Error> {
        let key: String = self.storage_key().await?;
        self.store.remove(&key).await?;
        *self.state.write().await = StoredRecord::default();
        Ok(())
    }

    async fn save_local(&self, stored: &StoredRecord<T>) -> Result<(), Error> {
        let key: String = self.storage_key().await?;
        self.store.set(&key, serde_json::to_string(stored)?).await?;
        Ok(())
    }

    async fn storage_key(&self) -> Result<String, Error> {
        let owner: PublicKey = self.signer.get_public_key().await?;
        Ok(format!("{}_{}", T::STORAGE_PREFIX, owner.to_hex()))
    }

    async fn decrypt_content(&self, owner: &PublicKey, content: &str) -> Result<String, Error> {
        match Envelope::from_json(content) {
            Ok(envelope) => envelope.open(self.signer.as_ref(), owner, self.opts.wrap).await,
            // Records encrypted directly to the owner
            Err(_) => Ok(self.signer.nip04_decrypt(owner, content).await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use nostr::Keys;
    use nostr_sync_pool::mock::{MockBehavior, MockNetwork, MockRelay};

    use super::*;
    use crate::records::{ContactList, Friend};
    use crate::store::MemoryStore;

    struct Setup {
        keys: Keys,
        relay: MockRelay,
        store: Arc<MemoryStore>,
        sync: ReplaceableSync<ContactList>,
    }

    async fn setup() -> Setup {
        let network = MockNetwork::new();
        let url = RelayUrl::parse("wss://relay.example.com").unwrap();
        let relay = network.add_relay(&url);

        let store = Arc::new(MemoryStore::new());
        relays::save_relays(store.as_ref(), &[url]).await.unwrap();

        let pool = RelayPool::builder()
            .websocket_transport(network)
            .build();
        let keys = Keys::generate();
        let sync = ReplaceableSync::new(
            pool,
            Arc::new(keys.clone()),
            store.clone(),
            ReplaceableOptions::default(),
        );

        Setup {
            keys,
            relay,
            store,
            sync,
        }
    }

    fn contacts(name: &str) -> ContactList {
        let mut list = ContactList::default();
        list.add(Friend::new(Keys::generate().public_key(), name));
        list
    }

    async fn store_local(setup: &Setup, record: &ContactList, ts: u64) {
        let stored = StoredRecord {
            record: record.clone(),
            last_sync_timestamp: Timestamp::from(ts),
        };
        let key = format!("nostr_friends_{}", setup.keys.public_key().to_hex());
        setup
            .store
            .set(&key, serde_json::to_string(&stored).unwrap())
            .await
            .unwrap();
    }

    async fn remote_event(keys: &Keys, record: &ContactList, ts: u64) -> Event {
        let envelope = Envelope::seal(
            keys,
            MESSAGE_VERSION,
            &[keys.public_key()],
            &serde_json::to_string(record).unwrap(),
            KeyWrap::Nip04,
        )
        .await
        .unwrap();
        EventBuilder::new(DEFAULT_RECORD_KIND, envelope.as_json().unwrap())
            .tag(Tag::identifier("close-friends"))
            .custom_created_at(Timestamp::from(ts))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_remote_wins() {
        let setup = setup().await;
        let local = contacts("local");
        let remote = contacts("remote");

        store_local(&setup, &local, 100).await;
        setup
            .relay
            .add_event(remote_event(&setup.keys, &remote, 200).await);

        let decision = setup.sync.sync().await.unwrap();

        assert_eq!(decision, SyncDecision::AdoptedRemote);
        assert_eq!(setup.sync.record().await, remote);
        assert_eq!(setup.sync.last_sync_timestamp().await, Timestamp::from(200));
        assert!(setup.relay.received_events().is_empty());

        // Persisted
        let stored = setup.sync.load_local().await.unwrap().unwrap();
        assert_eq!(stored.record, remote);
        assert_eq!(stored.last_sync_timestamp, Timestamp::from(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_local_is_republished() {
        let setup = setup().await;
        let local = contacts("local");
        let remote = contacts("remote");

        store_local(&setup, &local, 200).await;
        setup
            .relay
            .add_event(remote_event(&setup.keys, &remote, 100).await);

        let decision = setup.sync.sync().await.unwrap();

        assert_eq!(decision, SyncDecision::KeptLocal { published: true });
        assert_eq!(setup.sync.record().await, local);

        let received = setup.relay.received_events();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].created_at, Timestamp::from(200));
        assert_eq!(received[0].tags.identifier(), Some("close-friends"));
        assert_eq!(received[0].kind, DEFAULT_RECORD_KIND);

        // Republished content opens to the local record
        let envelope = Envelope::from_json(&received[0].content).unwrap();
        let json = envelope
            .open(&setup.keys, &setup.keys.public_key(), KeyWrap::Nip04)
            .await
            .unwrap();
        assert_eq!(serde_json::from_str::<ContactList>(&json).unwrap(), local);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_timestamps_adopt_remote() {
        let setup = setup().await;
        let local = contacts("local");
        let remote = contacts("remote");

        store_local(&setup, &local, 150).await;
        setup
            .relay
            .add_event(remote_event(&setup.keys, &remote, 150).await);

        assert_eq!(setup.sync.sync().await.unwrap(), SyncDecision::AdoptedRemote);
        assert_eq!(setup.sync.record().await, remote);
        assert!(setup.relay.received_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_remote_republishes_local() {
        let setup = setup().await;
        let local = contacts("local");
        store_local(&setup, &local, 100).await;

        assert_eq!(
            setup.sync.sync().await.unwrap(),
            SyncDecision::KeptLocal { published: true }
        );
        assert_eq!(setup.relay.received_events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_anywhere() {
        let setup = setup().await;
        assert_eq!(setup.sync.sync().await.unwrap(), SyncDecision::Empty);
        assert!(setup.sync.record().await.friends.is_empty());
        assert!(setup.relay.received_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_local_format() {
        let setup = setup().await;
        let local = contacts("legacy");
        let key = format!("nostr_friends_{}", setup.keys.public_key().to_hex());
        setup
            .store
            .set(&key, serde_json::to_string(&local).unwrap())
            .await
            .unwrap();

        let stored = setup.sync.load_local().await.unwrap().unwrap();
        assert_eq!(stored.record, local);
        assert_eq!(stored.last_sync_timestamp, Timestamp::from(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_persists_and_publishes() {
        let setup = setup().await;
        let friend = Keys::generate().public_key();

        let added = setup
            .sync
            .update(|list| list.add(Friend::new(friend, "bob")))
            .await
            .unwrap();
        assert!(added);

        let stored = setup.sync.load_local().await.unwrap().unwrap();
        assert!(stored.record.get(&friend).is_some());

        let received = setup.relay.received_events();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].created_at, stored.last_sync_timestamp);

        // Second update gets a newer timestamp, even within the same second
        setup
            .sync
            .update(|list| list.remove(&friend))
            .await
            .unwrap();
        let received = setup.relay.received_events();
        assert!(received[1].created_at > received[0].created_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_without_accepting_relay() {
        let setup = setup().await;
        setup.relay.set_behavior(MockBehavior {
            reject: Some(String::from("blocked: no")),
            ..Default::default()
        });

        let res = setup
            .sync
            .update(|list| list.add(Friend::new(Keys::generate().public_key(), "carol")))
            .await;
        assert!(matches!(res, Err(Error::NoRelaysAccepted)));

        // Saved anyway
        let stored = setup.sync.load_local().await.unwrap().unwrap();
        assert_eq!(stored.record.friends.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_nip04_remote_content() {
        let setup = setup().await;
        let remote = contacts("direct");

        let content = NostrSigner::nip04_encrypt(
            &setup.keys,
            &setup.keys.public_key(),
            &serde_json::to_string(&remote).unwrap(),
        )
        .await
        .unwrap();
        let event = EventBuilder::new(DEFAULT_RECORD_KIND, content)
            .tag(Tag::identifier("close-friends"))
            .custom_created_at(Timestamp::from(10))
            .sign_with_keys(&setup.keys)
            .unwrap();
        setup.relay.add_event(event);

        let stored = setup.sync.fetch_remote().await.unwrap().unwrap();
        assert_eq!(stored.record, remote);
        assert_eq!(stored.last_sync_timestamp, Timestamp::from(10));
    }
}
