// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use nostr::Timestamp;

/// Totals of a backfill run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillStats {
    /// Events handled without error, across every chunk and page
    pub total_events: usize,
    /// Pages requested
    pub batches_fetched: usize,
    /// Oldest `created_at` handled
    pub oldest_timestamp: Option<Timestamp>,
    /// Newest `created_at` handled
    pub latest_timestamp: Option<Timestamp>,
    /// Every chunk finished
    pub completed: bool,
}

impl BackfillStats {
    pub(crate) fn record(&mut self, created_at: Timestamp) {
        self.total_events += 1;

        self.oldest_timestamp = Some(match self.oldest_timestamp {
            Some(oldest) => oldest.min(created_at),
            None => created_at,
        });

        self.latest_timestamp = Some(match self.latest_timestamp {
            Some(latest) => latest.max(created_at),
            None => created_at,
        });
    }
}
