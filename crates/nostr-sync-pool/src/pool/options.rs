// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay pool options

use std::time::Duration;

use super::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_PUBLISH_TIMEOUT, DEFAULT_READY_POLL_INTERVAL,
};
use crate::relay::options::RelayOptions;

/// Relay pool options
#[derive(Debug, Clone)]
pub struct RelayPoolOptions {
    pub(super) relay: RelayOptions,
    pub(super) connect_timeout: Duration,
    pub(super) ready_poll_interval: Duration,
    pub(super) publish_timeout: Duration,
}

impl Default for RelayPoolOptions {
    fn default() -> Self {
        Self {
            relay: RelayOptions::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ready_poll_interval: DEFAULT_READY_POLL_INTERVAL,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

impl RelayPoolOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options applied to every connection created by the pool
    #[inline]
    pub fn relay(mut self, opts: RelayOptions) -> Self {
        self.relay = opts;
        self
    }

    /// Max time a publish waits for the connection to open (default: 4 secs)
    #[inline]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// How often readiness is checked while waiting (default: 150 ms)
    #[inline]
    pub fn ready_poll_interval(mut self, interval: Duration) -> Self {
        self.ready_poll_interval = interval;
        self
    }

    /// Max time to wait for the relay acknowledgment (default: 5 secs)
    #[inline]
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }
}
