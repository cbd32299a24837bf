//! Key-value storage capability backing the rate-limit tracker.
//!
//! The tracker never touches storage directly; it is handed a
//! [`KeyValueStore`] so deployments can choose durability (a JSON file that
//! survives restarts) while tests run against the in-memory fake.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key-value store I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("key-value store holds malformed data: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str)
    -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn set(&self, key: &str, value: &str)
    -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Ephemeral store. The fake used by tests and by deployments that accept
/// losing cooldown state on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Durable store: a single JSON object on disk, reloaded on open and
/// rewritten on every write. Writes are rare (one per successful request),
/// so the full rewrite keeps the on-disk layout trivially inspectable.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(StoreError::Io(err)),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let bytes = serde_json::to_vec_pretty(entries)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.expect("get"), None);
        store.set("k", "v1").await.expect("set");
        store.set("k", "v2").await.expect("overwrite");
        assert_eq!(store.get("k").await.expect("get"), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cooldowns.json");

        let store = JsonFileStore::open(&path).expect("open fresh");
        store
            .set("faucet_last_request_0xabc", "2026-02-07T12:00:00Z")
            .await
            .expect("set");
        drop(store);

        let reopened = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(
            reopened
                .get("faucet_last_request_0xabc")
                .await
                .expect("get"),
            Some("2026-02-07T12:00:00Z".to_string())
        );
    }

    #[tokio::test]
    async fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cooldowns.json");
        std::fs::write(&path, b"not json").expect("write");
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Corrupt(_))
        ));
    }
}
