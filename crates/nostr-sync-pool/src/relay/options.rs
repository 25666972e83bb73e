// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay options

use std::time::Duration;

use async_wsocket::ConnectionMode;

use super::constants::{DEFAULT_CONNECTION_TIMEOUT, DEFAULT_MAX_QUEUE_LEN, DEFAULT_RECONNECT_DELAY};

/// [`RelayConnection`](super::RelayConnection) options
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub(super) connection_mode: ConnectionMode,
    pub(super) reconnect: bool,
    pub(super) reconnect_delay: Duration,
    pub(super) connection_timeout: Duration,
    pub(super) max_queue_len: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            connection_mode: ConnectionMode::default(),
            reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
        }
    }
}

impl RelayOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection mode
    #[inline]
    pub fn connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.connection_mode = mode;
        self
    }

    /// Automatically reconnect after the socket closes (default: true)
    #[inline]
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Fixed delay before a reconnection attempt (default: 3 secs)
    #[inline]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Socket handshake timeout (default: 10 secs)
    #[inline]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Max number of frames waiting for an open socket (default: 1024).
    ///
    /// When full, the oldest frame is dropped.
    #[inline]
    pub fn max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = len.max(1);
        self
    }
}
