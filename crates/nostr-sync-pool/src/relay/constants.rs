// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay constants

use core::time::Duration;

/// Delay before recreating a closed connection
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
/// Max time to wait for the socket handshake
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
/// Max frames kept in the outbound queue while the socket is not open
pub const DEFAULT_MAX_QUEUE_LEN: usize = 1024;

pub(super) const WEBSOCKET_TX_TIMEOUT: Duration = Duration::from_secs(10);
