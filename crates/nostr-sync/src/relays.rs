// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay list configuration

use nostr::RelayUrl;

use crate::error::Error;
use crate::store::KeyValueStore;

/// Relays used when no custom list is stored
pub const DEFAULT_RELAYS: [&str; 2] = ["wss://relay.damus.io", "wss://nostr-pub.wellorder.net"];

/// Store key of the custom relay list (one URL per line)
pub const CUSTOM_RELAYS_KEY: &str = "custom-relays";

/// Default relay URLs
pub fn default_relays() -> Vec<RelayUrl> {
    DEFAULT_RELAYS
        .iter()
        .filter_map(|url| RelayUrl::parse(url).ok())
        .collect()
}

/// Load the custom relay list, falling back to [`DEFAULT_RELAYS`]
///
/// Invalid lines are skipped.
pub async fn load_relays(store: &dyn KeyValueStore) -> Result<Vec<RelayUrl>, Error> {
    let raw: Option<String> = store.get(CUSTOM_RELAYS_KEY).await?;

    let relays: Vec<RelayUrl> = raw.as_deref().map(parse_relay_list).unwrap_or_default();

    if relays.is_empty() {
        return Ok(default_relays());
    }

    Ok(relays)
}

/// Store a custom relay list
///
/// An empty list removes the override.
pub async fn save_relays(store: &dyn KeyValueStore, relays: &[RelayUrl]) -> Result<(), Error> {
    if relays.is_empty() {
        store.remove(CUSTOM_RELAYS_KEY).await?;
        return Ok(());
    }

    let raw: String = relays
        .iter()
        .map(|url| url.as_str())
        .collect::<Vec<&str>>()
        .join("\n");
    store.set(CUSTOM_RELAYS_KEY, raw).await?;

    Ok(())
}

fn parse_relay_list(raw: &str) -> Vec<RelayUrl> {
    let mut relays: Vec<RelayUrl> = Vec::new();

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        match RelayUrl::parse(line) {
            Ok(url) => {
                if !relays.contains(&url) {
                    relays.push(url);
                }
            }
            Err(e) => tracing::warn!(url = %line, error = %e, "Skipping invalid relay URL."),
        }
    }

    relays
}
