// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Error

use core::fmt;

use nostr::signer::SignerError;
use nostr_sync_pool::pool;

use crate::backfill::FilterError;
use crate::envelope::EnvelopeError;
use crate::store::StoreError;

/// Sync error
#[derive(Debug)]
pub enum Error {
    /// Relay pool error
    Pool(pool::Error),
    /// Key-value store error
    Store(StoreError),
    /// Signer error
    Signer(SignerError),
    /// Json error
    Json(serde_json::Error),
    /// Envelope error
    Envelope(EnvelopeError),
    /// Invalid backfill filter
    Backfill(FilterError),
    /// The envelope has no key for us
    NotARecipient,
    /// Empty recipient list
    EmptyRecipients,
    /// No relay accepted the event
    NoRelaysAccepted,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Signer(e) => write!(f, "{e}"),
            Self::Json(e) => write!(f, "{e}"),
            Self::Envelope(e) => write!(f, "{e}"),
            Self::Backfill(e) => write!(f, "{e}"),
            Self::NotARecipient => write!(f, "not a recipient of the envelope"),
            Self::EmptyRecipients => write!(f, "recipients can't be empty"),
            Self::NoRelaysAccepted => write!(f, "event not accepted by any relay"),
        }
    }
}

impl From<pool::Error> for Error {
    fn from(e: pool::Error) -> Self {
        Self::Pool(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<SignerError> for Error {
    fn from(e: SignerError) -> Self {
        Self::Signer(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<EnvelopeError> for Error {
    fn from(e: EnvelopeError) -> Self {
        Self::Envelope(e)
    }
}

impl From<FilterError> for Error {
    fn from(e: FilterError) -> Self {
        Self::Backfill(e)
    }
}
