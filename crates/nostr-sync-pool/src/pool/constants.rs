// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Pool constants

use core::time::Duration;

/// Max time a publish waits for the connection to open before queueing the event anyway
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(4000);
/// Connection readiness polling interval
pub const DEFAULT_READY_POLL_INTERVAL: Duration = Duration::from_millis(150);
/// Max time to wait for the relay `OK` after sending an event
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(5000);
