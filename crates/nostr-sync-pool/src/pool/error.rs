// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay pool error

use core::fmt;

use crate::relay;

/// Relay pool error
#[derive(Debug)]
pub enum Error {
    /// Relay error
    Relay(relay::Error),
    /// No relays specified
    NoRelaysSpecified,
    /// The pool has been shut down
    Shutdown,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relay(e) => write!(f, "{e}"),
            Self::NoRelaysSpecified => write!(f, "no relays specified"),
            Self::Shutdown => write!(f, "relay pool is shutdown"),
        }
    }
}

impl From<relay::Error> for Error {
    fn from(e: relay::Error) -> Self {
        Self::Relay(e)
    }
}
