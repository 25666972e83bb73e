// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Backfill
//!
//! Backward (newest to oldest) pagination of one logical query over a set of relays.
//!
//! Authors are split in chunks of [`BackfillOptions::author_chunk_size`]. Each chunk is paged
//! independently, one chunk after the other: every page is a short-lived subscription with
//! `limit = batch_size` that ends on the first `EOSE` or on the page timeout. The next page is
//! anchored at `until = oldest created_at - 1`, so the anchor strictly decreases and the loop
//! always terminates.

use std::collections::HashMap;
use std::future::{Future, IntoFuture};
use std::time::Duration;

use async_utility::time;
use nostr::util::BoxedFuture;
use nostr::{Event, EventId, Filter, Kind, PublicKey, RelayUrl, Timestamp};
use nostr_sync_pool::pool::{self, RelayPool, SubscriptionEvent, SubscriptionHandle};

pub mod constants;
mod filter;
mod options;
mod stats;

pub use self::filter::{BackfillFilter, FilterError};
pub use self::options::BackfillOptions;
pub use self::stats::BackfillStats;
use crate::error::Error;

type StatsCallback<'a> = Box<dyn FnMut(&BackfillStats) + Send + 'a>;

/// Backfill events
///
/// `on_event` is awaited for every received event, in arrival order. An error returned by it
/// is logged and the event is left out of the totals. Pagination goes on.
#[must_use = "Does nothing unless you await!"]
pub struct Backfill<'a, F> {
    pool: &'a RelayPool,
    relays: Vec<RelayUrl>,
    filter: BackfillFilter,
    opts: BackfillOptions,
    on_event: F,
    on_progress: Option<StatsCallback<'a>>,
    on_complete: Option<StatsCallback<'a>>,
}

impl<'a, F, Fut> Backfill<'a, F>
where
    F: FnMut(Event) -> Fut + Send + 'a,
    Fut: Future<Output = Result<(), Error>> + Send + 'a,
{
    /// New backfill with default options
    pub fn new<I>(pool: &'a RelayPool, relays: I, filter: BackfillFilter, on_event: F) -> Self
    where
        I: IntoIterator<Item = RelayUrl>,
    {
        Self {
            pool,
            relays: relays.into_iter().collect(),
            filter,
            opts: BackfillOptions::default(),
            on_event,
            on_progress: None,
            on_complete: None,
        }
    }

    /// Set options
    #[inline]
    pub fn opts(mut self, opts: BackfillOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Called with the running totals after every non-empty page
    #[inline]
    pub fn on_progress<P>(mut self, callback: P) -> Self
    where
        P: FnMut(&BackfillStats) + Send + 'a,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Called once with the final totals
    #[inline]
    pub fn on_complete<P>(mut self, callback: P) -> Self
    where
        P: FnMut(&BackfillStats) + Send + 'a,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    async fn exec(mut self) -> Result<BackfillStats, Error> {
        self.filter.validate()?;

        if self.relays.is_empty() {
            return Err(Error::Pool(pool::Error::NoRelaysSpecified));
        }

        let anchor: Timestamp = self.filter.until.unwrap_or_else(Timestamp::now);
        let authors: Vec<PublicKey> = std::mem::take(&mut self.filter.authors);

        let mut stats: BackfillStats = BackfillStats::default();

        if authors.is_empty() {
            self.run_chunk(0, None, anchor, &mut stats).await;
        } else {
            for (index, chunk) in authors.chunks(self.opts.author_chunk_size).enumerate() {
                self.run_chunk(index, Some(chunk), anchor, &mut stats).await;
            }
        }

        stats.completed = true;

        tracing::debug!(
            events = stats.total_events,
            batches = stats.batches_fetched,
            "Backfill completed."
        );

        if let Some(callback) = self.on_complete.as_mut() {
            callback(&stats);
        }

        Ok(stats)
    }

    async fn run_chunk(
        &mut self,
        index: usize,
        authors: Option<&[PublicKey]>,
        anchor: Timestamp,
        stats: &mut BackfillStats,
    ) {
        if let Err(e) = self.backfill_chunk(index, authors, anchor, stats).await {
            tracing::error!(chunk = index, error = %e, "Backfill chunk aborted.");
        }
    }

    async fn backfill_chunk(
        &mut self,
        index: usize,
        authors: Option<&[PublicKey]>,
        anchor: Timestamp,
        stats: &mut BackfillStats,
    ) -> Result<(), Error> {
        let batch_size: usize = self.opts.batch_size;
        let since: Timestamp = self.filter.since.unwrap_or_default();
        let mut until: Timestamp = anchor;
        let mut batches: usize = 0;

        loop {
            if self.opts.max_batches.is_some_and(|max| batches >= max) {
                tracing::debug!(chunk = index, batches, "Max batches reached.");
                break;
            }

            if until <= since {
                tracing::debug!(chunk = index, until = %until, "Time window exhausted.");
                break;
            }

            let filter: Filter = self.filter.to_filter(authors, until, batch_size);
            let events: Vec<Event> =
                fetch_batch(self.pool, &self.relays, filter, self.opts.batch_timeout).await?;

            batches += 1;
            stats.batches_fetched += 1;

            tracing::debug!(
                chunk = index,
                batch = batches,
                until = %until,
                events = events.len(),
                "Backfill page fetched."
            );

            if events.is_empty() {
                break;
            }

            let count: usize = events.len();
            let mut oldest: Timestamp = until;

            for event in events.into_iter() {
                let id: EventId = event.id;
                let created_at: Timestamp = event.created_at;
                oldest = oldest.min(created_at);

                match (self.on_event)(event).await {
                    Ok(()) => stats.record(created_at),
                    Err(e) => tracing::warn!(chunk = index, id = %id, error = %e, "Can't handle event."),
                }
            }

            if let Some(callback) = self.on_progress.as_mut() {
                callback(stats);
            }

            // Exhausted
            if count < batch_size {
                break;
            }

            let Some(next) = oldest.as_u64().checked_sub(1) else {
                break;
            };
            until = Timestamp::from(next);
        }

        Ok(())
    }
}

impl<'a, F, Fut> IntoFuture for Backfill<'a, F>
where
    F: FnMut(Event) -> Fut + Send + 'a,
    Fut: Future<Output = Result<(), Error>> + Send + 'a,
{
    type Output = Result<BackfillStats, Error>;
    type IntoFuture = BoxedFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.exec())
    }
}

/// Backfill `filter` from `relays`, feeding every event to `on_event`
#[inline]
pub fn backfill_events<'a, I, F, Fut>(
    pool: &'a RelayPool,
    relays: I,
    filter: BackfillFilter,
    opts: BackfillOptions,
    on_event: F,
) -> Backfill<'a, F>
where
    I: IntoIterator<Item = RelayUrl>,
    F: FnMut(Event) -> Fut + Send + 'a,
    Fut: Future<Output = Result<(), Error>> + Send + 'a,
{
    Backfill::new(pool, relays, filter, on_event).opts(opts)
}

/// Fetch the latest replaceable event of every author
///
/// One page per author chunk, with `limit` equal to the chunk size and no time pagination.
/// Relays are expected to return only the latest version per author; older versions that
/// still come through are discarded here. Returns the events newest first.
pub async fn fetch_replaceable<I>(
    pool: &RelayPool,
    relays: I,
    filter: BackfillFilter,
    opts: &BackfillOptions,
) -> Result<Vec<Event>, Error>
where
    I: IntoIterator<Item = RelayUrl>,
{
    filter.validate()?;

    let relays: Vec<RelayUrl> = relays.into_iter().collect();
    let until: Timestamp = filter.until.unwrap_or_else(Timestamp::now);

    let mut pages: Vec<(Option<&[PublicKey]>, usize)> = filter
        .authors
        .chunks(opts.author_chunk_size)
        .map(|chunk| (Some(chunk), chunk.len()))
        .collect();
    if pages.is_empty() {
        pages.push((None, opts.batch_size));
    }

    let mut latest: HashMap<(PublicKey, Kind, String), Event> = HashMap::new();

    for (authors, limit) in pages.into_iter() {
        let page: Filter = filter.to_filter(authors, until, limit);
        let events: Vec<Event> = fetch_batch(pool, &relays, page, opts.batch_timeout).await?;

        for event in events.into_iter() {
            let key = (
                event.pubkey,
                event.kind,
                event.tags.identifier().unwrap_or_default().to_string(),
            );

            match latest.get(&key) {
                Some(current) if current.created_at >= event.created_at => {}
                _ => {
                    latest.insert(key, event);
                }
            }
        }
    }

    let mut events: Vec<Event> = latest.into_values().collect();
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(events)
}

/// Run one page: subscribe, collect until the first `EOSE` or `timeout`, then close.
pub(crate) async fn fetch_batch(
    pool: &RelayPool,
    relays: &[RelayUrl],
    filter: Filter,
    timeout: Duration,
) -> Result<Vec<Event>, Error> {
    let mut handle: SubscriptionHandle = pool.subscribe(relays.to_vec(), vec![filter])?;
    let mut events: Vec<Event> = Vec::new();

    let collect = async {
        while let Some(item) = handle.next().await {
            match item {
                SubscriptionEvent::Event { event, .. } => events.push(*event),
                SubscriptionEvent::EndOfStoredEvents { .. } => break,
            }
        }
    };

    if time::timeout(Some(timeout), collect).await.is_none() {
        tracing::warn!(events = events.len(), "Timeout while waiting for EOSE.");
    }

    handle.unsubscribe();

    Ok(events)
}
