// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Prelude

#![allow(unknown_lints)]
#![allow(ambiguous_glob_reexports)]
#![doc(hidden)]

pub use nostr_sync_pool::prelude::*;

pub use crate::backfill::*;
pub use crate::checkpoint::*;
pub use crate::envelope::*;
pub use crate::error::*;
pub use crate::interactions::*;
pub use crate::messages::*;
pub use crate::records::*;
pub use crate::relays::*;
pub use crate::replaceable::*;
pub use crate::store::*;
