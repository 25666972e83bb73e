// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Nostr Sync Pool
//!
//! One persistent connection per relay, subscription fan-out over many relays
//! and per-relay publish acknowledgment tracking.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![doc = include_str!("../README.md")]

#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod pool;
pub mod prelude;
pub mod relay;
pub mod seen;
pub mod transport;
mod util;

pub use self::pool::options::RelayPoolOptions;
pub use self::pool::{
    PublishResult, RelayPool, RelayPoolBuilder, SubscriptionEvent, SubscriptionHandle,
};
pub use self::relay::options::RelayOptions;
pub use self::relay::{RelayConnection, RelayInspection, RelayStatus};
pub use self::seen::SeenTracker;
