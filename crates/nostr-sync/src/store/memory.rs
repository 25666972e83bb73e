// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use std::collections::HashMap;

use nostr::util::BoxedFuture;
use tokio::sync::RwLock;

use super::{KeyValueStore, StoreError};

/// In-memory store (RAM)
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// New empty store
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<Option<String>, StoreError>> {
        Box::pin(async move {
            let map = self.map.read().await;
            Ok(map.get(key).cloned())
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxedFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut map = self.map.write().await;
            map.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut map = self.map.write().await;
            map.remove(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();

        assert_eq!(store.get("a").await.unwrap(), None);

        store.set("a", String::from("1")).await.unwrap();
        store.set("a", String::from("2")).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(String::from("2")));

        store.remove("a").await.unwrap();
        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }
}
