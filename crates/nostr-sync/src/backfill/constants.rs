// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Backfill constants

use std::time::Duration;

/// Events requested per page
pub const DEFAULT_BATCH_SIZE: usize = 500;
/// Max wait for `EOSE` on one page
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Authors per query
pub const DEFAULT_AUTHOR_CHUNK_SIZE: usize = 50;
