// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_utility::task;
use nostr::util::BoxedFuture;
use tokio::sync::Mutex;

use super::{KeyValueStore, StoreError};

/// Store backed by a single JSON object file
///
/// The whole file is rewritten on every mutation, so keep it small. A mutation is visible to
/// readers only once written to disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store, loading the file if it exists
    pub fn open<P>(path: P) -> Result<Self, StoreError>
    where
        P: AsRef<Path>,
    {
        let path: PathBuf = path.as_ref().to_path_buf();

        let map: BTreeMap<String, String> = match fs::read_to_string(&path) {
            Ok(json) if json.trim().is_empty() => BTreeMap::new(),
            Ok(json) => serde_json::from_str(&json).map_err(StoreError::backend)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::backend(e)),
        };

        tracing::debug!(path = %path.display(), keys = map.len(), "File store opened.");

        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    /// File path
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let json: String = serde_json::to_string(map).map_err(StoreError::backend)?;
        let path: PathBuf = self.path.clone();
        task::spawn_blocking(move || write_atomic(&path, json))
            .await
            .map_err(StoreError::backend)?
    }
}

impl KeyValueStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<Option<String>, StoreError>> {
        Box::pin(async move {
            let map = self.map.lock().await;
            Ok(map.get(key).cloned())
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxedFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut map = self.map.lock().await;

            let mut next: BTreeMap<String, String> = map.clone();
            next.insert(key.to_string(), value);
            self.persist(&next).await?;

            *map = next;
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut map = self.map.lock().await;

            if !map.contains_key(key) {
                return Ok(());
            }

            let mut next: BTreeMap<String, String> = map.clone();
            next.remove(key);
            self.persist(&next).await?;

            *map = next;
            Ok(())
        })
    }
}

/// Write a sibling file, then rename it over the old one
fn write_atomic(path: &Path, json: String) -> Result<(), StoreError> {
    let tmp: PathBuf = path.with_extension("tmp");
    fs::write(&tmp, json).map_err(StoreError::backend)?;
    fs::rename(&tmp, path).map_err(StoreError::backend)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.set("backfill_breakpoint_a", String::from("100")).await.unwrap();
            store.set("custom-relays", String::from("wss://relay.example.com")).await.unwrap();
            store.remove("custom-relays").await.unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(
            store.get("backfill_breakpoint_a").await.unwrap(),
            Some(String::from("100"))
        );
        assert_eq!(store.get("custom-relays").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("missing.json")).unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_write_is_not_visible() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.set("kept", String::from("1")).await.unwrap();

        // The parent directory disappears: every write fails from now on
        drop(dir);

        assert!(store.set("k", String::from("v")).await.is_err());
        assert_eq!(store.get("k").await.unwrap(), None);

        assert!(store.remove("kept").await.is_err());
        assert_eq!(store.get("kept").await.unwrap(), Some(String::from("1")));
    }

    #[tokio::test]
    async fn test_open_under_missing_directory() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("missing-dir").join("store.json")).unwrap();

        assert!(store.set("k", String::from("v")).await.is_err());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[test]
    fn test_open_corrupted_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json").unwrap();
        assert!(FileStore::open(&path).is_err());
    }
}
