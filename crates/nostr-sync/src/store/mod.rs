// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Key-value storage
//!
//! Connection-independent state (checkpoints, cached records, relay list) survives restarts
//! through a [`KeyValueStore`].

use std::fmt;

use nostr::util::BoxedFuture;

mod error;
mod file;
mod memory;

pub use self::error::StoreError;
pub use self::file::FileStore;
pub use self::memory::MemoryStore;

/// String key-value storage
pub trait KeyValueStore: fmt::Debug + Send + Sync {
    /// Get a value
    fn get<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<Option<String>, StoreError>>;

    /// Insert or replace a value
    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxedFuture<'a, Result<(), StoreError>>;

    /// Remove a value
    ///
    /// Removing a missing key is not an error.
    fn remove<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<(), StoreError>>;
}
