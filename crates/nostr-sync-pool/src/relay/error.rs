// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay error

use core::fmt;

use crate::transport::error::TransportError;

/// Relay connection error
#[derive(Debug)]
pub enum Error {
    /// Transport error
    Transport(TransportError),
    /// WebSocket send timeout
    WebSocketTimeout,
    /// The connection has been terminated and will not reconnect
    Terminated,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::WebSocketTimeout => write!(f, "WebSocket timeout"),
            Self::Terminated => write!(f, "relay connection terminated"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}
