// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay pool builder

use std::sync::Arc;

use super::RelayPool;
use super::options::RelayPoolOptions;
use crate::transport::websocket::{
    DefaultWebsocketTransport, IntoWebSocketTransport, WebSocketTransport,
};

/// Relay pool builder
#[derive(Debug, Clone)]
pub struct RelayPoolBuilder {
    /// WebSocket transport
    pub websocket_transport: Arc<dyn WebSocketTransport>,
    /// Relay pool options
    pub opts: RelayPoolOptions,
}

impl Default for RelayPoolBuilder {
    fn default() -> Self {
        Self {
            websocket_transport: Arc::new(DefaultWebsocketTransport),
            opts: RelayPoolOptions::default(),
        }
    }
}

impl RelayPoolBuilder {
    /// New default builder
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a WebSocket transport
    #[inline]
    pub fn websocket_transport<T>(mut self, transport: T) -> Self
    where
        T: IntoWebSocketTransport,
    {
        self.websocket_transport = transport.into_transport();
        self
    }

    /// Set options
    #[inline]
    pub fn opts(mut self, opts: RelayPoolOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Build relay pool
    #[inline]
    pub fn build(self) -> RelayPool {
        RelayPool::from_builder(self)
    }
}
