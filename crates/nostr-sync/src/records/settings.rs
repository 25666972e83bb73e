// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Application settings

use nostr::RelayUrl;
use serde::{Deserialize, Serialize};

use crate::replaceable::SyncRecord;

/// Blossom media server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlossomServer {
    /// Server URL
    pub url: String,
    /// Auth token
    #[serde(default)]
    pub token: String,
}

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Relay URLs
    #[serde(default)]
    pub relays: Vec<String>,
    /// Blossom servers
    #[serde(default)]
    pub blossom_servers: Vec<BlossomServer>,
}

impl AppSettings {
    /// Parsed relay URLs. Invalid entries are skipped.
    pub fn relay_urls(&self) -> Vec<RelayUrl> {
        self.relays
            .iter()
            .filter_map(|url| match RelayUrl::parse(url) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Ignoring invalid relay URL.");
                    None
                }
            })
            .collect()
    }

    /// Replace the relay list
    pub fn set_relays<I>(&mut self, relays: I)
    where
        I: IntoIterator<Item = RelayUrl>,
    {
        self.relays = relays.into_iter().map(|u| u.to_string()).collect();
    }

    /// Add or replace a blossom server, matching on URL
    pub fn upsert_blossom_server(&mut self, server: BlossomServer) {
        match self.blossom_servers.iter_mut().find(|s| s.url == server.url) {
            Some(current) => *current = server,
            None => self.blossom_servers.push(server),
        }
    }

    /// Remove a blossom server. Returns `false` if not listed.
    pub fn remove_blossom_server(&mut self, url: &str) -> bool {
        let len: usize = self.blossom_servers.len();
        self.blossom_servers.retain(|s| s.url != url);
        self.blossom_servers.len() != len
    }
}

impl SyncRecord for AppSettings {
    const IDENTIFIER: &'static str = "close-settings";
    const STORAGE_PREFIX: &'static str = "nostr_settings";

    fn is_empty(&self) -> bool {
        self.relays.is_empty() && self.blossom_servers.is_empty()
    }
}
