// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Prelude

#![allow(unknown_lints)]
#![allow(ambiguous_glob_reexports)]
#![doc(hidden)]

pub use async_wsocket::ConnectionMode;
pub use nostr::prelude::*;

pub use crate::pool::options::*;
pub use crate::pool::*;
pub use crate::relay::options::*;
pub use crate::relay::*;
pub use crate::seen::*;
pub use crate::transport::error::*;
pub use crate::transport::websocket::*;
