// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Publish results

use nostr::{RelayUrl, Timestamp};

/// Outcome of publishing an event to one relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    /// Relay URL
    pub relay: RelayUrl,
    /// Accepted by the relay
    pub ok: bool,
    /// Message from the relay `OK` frame, or why the publish failed (i.e. `"timeout"`)
    pub reason: Option<String>,
    /// When the result was resolved
    pub timestamp: Timestamp,
}

impl PublishResult {
    pub(super) fn acknowledged(relay: RelayUrl, ok: bool, message: String) -> Self {
        Self {
            relay,
            ok,
            reason: if message.is_empty() {
                None
            } else {
                Some(message)
            },
            timestamp: Timestamp::now(),
        }
    }

    pub(super) fn failed<S>(relay: RelayUrl, reason: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            relay,
            ok: false,
            reason: Some(reason.into()),
            timestamp: Timestamp::now(),
        }
    }

    /// Check if no acknowledgment arrived in time
    #[inline]
    pub fn is_timeout(&self) -> bool {
        !self.ok && self.reason.as_deref() == Some(TIMEOUT)
    }
}

pub(super) const TIMEOUT: &str = "timeout";
pub(super) const CONNECTION_RESET: &str = "connection reset";

/// Count the relays that accepted the event
pub fn accepted_count(results: &[PublishResult]) -> usize {
    results.iter().filter(|r| r.ok).count()
}
