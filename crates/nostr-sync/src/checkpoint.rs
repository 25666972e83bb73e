// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Backfill checkpoints
//!
//! A checkpoint is the last synchronized timestamp of a backfill target. It bounds the next run
//! to new data only and never moves backward.

use std::sync::Arc;

use nostr::Timestamp;

use crate::backfill::BackfillStats;
use crate::error::Error;
use crate::store::KeyValueStore;

const KEY_PREFIX: &str = "backfill_breakpoint_";

/// Checkpoints persisted in a [`KeyValueStore`]
#[derive(Debug, Clone)]
pub struct Checkpoints {
    store: Arc<dyn KeyValueStore>,
}

impl Checkpoints {
    /// New checkpoints over a store
    #[inline]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Last checkpoint of `key`
    ///
    /// Unparsable values are treated as missing.
    pub async fn load(&self, key: &str) -> Result<Option<Timestamp>, Error> {
        let raw: Option<String> = self.store.get(&store_key(key)).await?;

        Ok(raw.and_then(|raw| match raw.trim().parse::<u64>() {
            Ok(ts) => Some(Timestamp::from(ts)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Invalid checkpoint, ignoring it.");
                None
            }
        }))
    }

    /// Store `timestamp` for `key` unless an equal or newer checkpoint exists
    ///
    /// Returns the stored checkpoint.
    pub async fn save(&self, key: &str, timestamp: Timestamp) -> Result<Timestamp, Error> {
        if let Some(current) = self.load(key).await? {
            if current >= timestamp {
                return Ok(current);
            }
        }

        self.store
            .set(&store_key(key), timestamp.as_u64().to_string())
            .await?;

        tracing::debug!(key = %key, checkpoint = %timestamp, "Checkpoint advanced.");

        Ok(timestamp)
    }

    /// Advance the checkpoint after a backfill run
    ///
    /// Moves to the newest event seen or, when the run found nothing, to the `until` anchor of
    /// the run, so empty ranges are not scanned again.
    pub async fn advance(
        &self,
        key: &str,
        stats: &BackfillStats,
        until: Timestamp,
    ) -> Result<Timestamp, Error> {
        let target: Timestamp = match stats.latest_timestamp {
            Some(latest) if stats.total_events > 0 => latest,
            _ => until,
        };

        self.save(key, target).await
    }

    /// Forget the checkpoint of `key`
    pub async fn reset(&self, key: &str) -> Result<(), Error> {
        self.store.remove(&store_key(key)).await?;
        Ok(())
    }
}

fn store_key(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}
