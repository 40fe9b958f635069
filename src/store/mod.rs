//! Key-value store contract
//!
//! The core keeps no shared mutable state of its own; everything ephemeral
//! (challenge markers, verification codes, counters) lives in an external
//! key-value store reached through the [`KvStore`] trait. The store is
//! assumed eventually consistent, not linearizable; see [`CounterStore`] for
//! the optimistic-concurrency pattern layered on top of it.

mod counter;

pub use counter::{CounterStore, StoredCounterRecord};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Errors from key-value store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store rejected or failed the operation.
    #[error("storage operation failed: {0}")]
    Backend(String),

    /// A concurrent writer kept winning the optimistic write race.
    #[error("version conflict persisted after {0} retries")]
    Conflict(u32),
}

/// A stored value together with its opaque metadata.
#[derive(Debug, Clone)]
pub struct KvEntry {
    pub value: Vec<u8>,
    pub metadata: Option<serde_json::Value>,
}

/// Options for a put operation.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Time-to-live in seconds. `None` means the entry does not expire.
    pub ttl_seconds: Option<u64>,
    /// Opaque metadata stored alongside the value.
    pub metadata: Option<serde_json::Value>,
}

impl PutOptions {
    /// Options with only a TTL set.
    #[must_use]
    pub fn ttl(seconds: u64) -> Self {
        Self {
            ttl_seconds: Some(seconds),
            metadata: None,
        }
    }
}

/// One page of a prefix listing.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub cursor: Option<String>,
    pub complete: bool,
}

/// An external key-value storage backend.
///
/// Implementations are expected to support TTL-based expiration and may be
/// eventually consistent: a read racing a concurrent write can observe the
/// older value. Every consumer in this crate is written for that model.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value by key. Returns `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Get a value together with its metadata.
    async fn get_with_metadata(&self, key: &str) -> Result<Option<KvEntry>, StoreError>;

    /// Set a key-value pair.
    async fn put(&self, key: &str, value: &[u8], options: PutOptions) -> Result<(), StoreError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List keys under a prefix, resuming from `cursor` when given.
    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<ListPage, StoreError>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    metadata: Option<serde_json::Value>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// An in-memory store backed by a mutex-guarded map with TTL support.
///
/// Useful for development and tests. Construct one instance per test and
/// pass it in; there is intentionally no process-wide default.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get_with_metadata(key).await?.map(|e| e.value))
    }

    async fn get_with_metadata(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))?;
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(KvEntry {
                value: entry.value.clone(),
                metadata: entry.metadata.clone(),
            })),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &[u8], options: PutOptions) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                metadata: options.metadata,
                expires_at: options
                    .ttl_seconds
                    .map(|secs| Instant::now() + Duration::from_secs(secs)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<ListPage, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && !v.expired())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        if let Some(cursor) = cursor {
            keys.retain(|k| k.as_str() > cursor);
        }
        Ok(ListPage {
            keys,
            cursor: None,
            complete: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let store = MemoryKvStore::new();
        store
            .put("k1", b"value", PutOptions::default())
            .await
            .unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some(b"value".to_vec()));

        store.delete("k1").await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn metadata_is_preserved() {
        let store = MemoryKvStore::new();
        let options = PutOptions {
            ttl_seconds: None,
            metadata: Some(serde_json::json!({"purpose": "signup"})),
        };
        store.put("k1", b"v", options).await.unwrap();

        let entry = store.get_with_metadata("k1").await.unwrap().unwrap();
        assert_eq!(entry.metadata, Some(serde_json::json!({"purpose": "signup"})));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = MemoryKvStore::new();
        store.put("k1", b"v", PutOptions::ttl(0)).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_cursor() {
        let store = MemoryKvStore::new();
        for key in ["a:1", "a:2", "a:3", "b:1"] {
            store.put(key, b"v", PutOptions::default()).await.unwrap();
        }

        let page = store.list("a:", None).await.unwrap();
        assert_eq!(page.keys, vec!["a:1", "a:2", "a:3"]);
        assert!(page.complete);

        let page = store.list("a:", Some("a:1")).await.unwrap();
        assert_eq!(page.keys, vec!["a:2", "a:3"]);
    }
}
