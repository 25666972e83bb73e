// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Backfill options

use std::time::Duration;

use super::constants::{DEFAULT_AUTHOR_CHUNK_SIZE, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT};

/// Backfill options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillOptions {
    pub(crate) batch_size: usize,
    pub(crate) batch_timeout: Duration,
    pub(crate) author_chunk_size: usize,
    pub(crate) max_batches: Option<usize>,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            author_chunk_size: DEFAULT_AUTHOR_CHUNK_SIZE,
            max_batches: None,
        }
    }
}

impl BackfillOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events requested per page (default: 500)
    ///
    /// A page returning fewer events ends the pagination.
    #[inline]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Max wait for `EOSE` on one page (default: 10 secs)
    #[inline]
    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Authors per query (default: 50)
    #[inline]
    pub fn author_chunk_size(mut self, size: usize) -> Self {
        self.author_chunk_size = size.max(1);
        self
    }

    /// Max pages per author chunk (default: unbounded)
    #[inline]
    pub fn max_batches(mut self, max: usize) -> Self {
        self.max_batches = Some(max);
        self
    }
}
