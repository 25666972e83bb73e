// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Nostr Sync
//!
//! Backfill with checkpoints, multi-recipient envelopes, replaceable records,
//! encrypted posts and interactions on top of [`nostr_sync_pool`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![doc = include_str!("../README.md")]

pub use nostr;
pub use nostr_sync_pool;

pub mod backfill;
pub mod checkpoint;
pub mod envelope;
pub mod error;
pub mod interactions;
pub mod messages;
pub mod prelude;
pub mod records;
pub mod relays;
pub mod replaceable;
pub mod store;

pub use self::backfill::{
    backfill_events, fetch_replaceable, Backfill, BackfillFilter, BackfillOptions, BackfillStats,
};
pub use self::checkpoint::Checkpoints;
pub use self::envelope::{Envelope, KeyWrap};
pub use self::error::Error;
pub use self::interactions::{InteractionOptions, InteractionSync};
pub use self::messages::{MessageBox, MessageOptions};
pub use self::records::{ContactListSync, SettingsSync};
pub use self::replaceable::{ReplaceableOptions, ReplaceableSync, SyncDecision, SyncRecord};
pub use self::store::{FileStore, KeyValueStore, MemoryStore};
