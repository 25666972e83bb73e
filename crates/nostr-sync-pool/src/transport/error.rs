// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Transport error

use core::fmt;

/// Why a relay socket couldn't be opened, written or read
///
/// Never fatal for a connection: it ends the current socket and the reconnect timer takes over.
#[derive(Debug)]
pub enum TransportError {
    /// Handshake, I/O or protocol error from the socket library
    Backend(Box<dyn std::error::Error + Send + Sync>),
    /// No relay behind this URL
    Unreachable(String),
}

impl std::error::Error for TransportError {}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "{e}"),
            Self::Unreachable(url) => write!(f, "relay unreachable: {url}"),
        }
    }
}

impl TransportError {
    /// Wrap an error of the socket library
    #[inline]
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_keeps_message() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::backend(err);
        assert_eq!(err.to_string(), "refused");
    }

    #[test]
    fn test_unreachable_display() {
        let err = TransportError::Unreachable(String::from("wss://relay.example.com"));
        assert_eq!(err.to_string(), "relay unreachable: wss://relay.example.com");
    }
}
