// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Built-in replaceable records

use crate::replaceable::ReplaceableSync;

mod contacts;
mod settings;

pub use self::contacts::{ContactList, Friend, FriendPatch};
pub use self::settings::{AppSettings, BlossomServer};

/// Contact list sync
pub type ContactListSync = ReplaceableSync<ContactList>;

/// Settings sync
pub type SettingsSync = ReplaceableSync<AppSettings>;
