//! Optimistic-concurrency counter records
//!
//! The backing store is eventually consistent and offers no compare-and-swap,
//! so counters are maintained with a read-modify-write cycle that re-reads
//! after writing to detect a concurrent writer via the version field. A
//! detected conflict is retried a bounded number of times with linear
//! backoff. This narrows the race window; it does not eliminate it. That is
//! an accepted property of the storage choice, and consumers (challenge
//! uniqueness marking, sibling rate limiting) are designed to tolerate it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{KvStore, PutOptions, StoreError};

/// A counter with an expiry and a monotonically incrementing version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCounterRecord {
    /// Number of increments observed within the current window
    pub count: u64,
    /// When the record's window ends and the count resets
    pub reset_at: DateTime<Utc>,
    /// Incremented on every write; used to detect concurrent writers
    pub version: u64,
}

/// Counter operations over an eventually consistent key-value store.
#[derive(Clone)]
pub struct CounterStore {
    kv: Arc<dyn KvStore>,
    max_retries: u32,
    backoff: Duration,
}

impl CounterStore {
    /// Create a counter store with the given conflict-retry bounds.
    pub fn new(kv: Arc<dyn KvStore>, max_retries: u32, backoff: Duration) -> Self {
        Self {
            kv,
            max_retries,
            backoff,
        }
    }

    /// Increment the counter under `key`, creating it with a fresh window of
    /// `ttl_seconds` when absent or expired. Returns the record as written.
    ///
    /// # Errors
    /// Returns `StoreError::Conflict` when concurrent writers win the write
    /// race on every retry, or `StoreError::Backend` on store failure.
    pub async fn increment(
        &self,
        key: &str,
        ttl_seconds: u64,
    ) -> Result<StoredCounterRecord, StoreError> {
        let mut attempt = 0;
        loop {
            let next = self.next_record(key, ttl_seconds).await?;
            self.kv
                .put(key, &encode(&next)?, PutOptions::ttl(ttl_seconds))
                .await?;

            // Re-read to detect a concurrent writer that landed between our
            // read and our write. Eventual consistency means this check is
            // best effort: a not-yet-visible write still slips through.
            let written = self.read(key).await?;
            match written {
                Some(record) if record.version == next.version => return Ok(next),
                _ => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(StoreError::Conflict(self.max_retries));
                    }
                    debug!("counter write conflict on {key}, retry {attempt}");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
            }
        }
    }

    /// Read the counter under `key`, treating an expired window as absent.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` on store failure.
    pub async fn read(&self, key: &str) -> Result<Option<StoredCounterRecord>, StoreError> {
        let Some(bytes) = self.kv.get(key).await? else {
            return Ok(None);
        };
        let record: StoredCounterRecord = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Backend(format!("undecodable counter record: {e}")))?;
        if record.reset_at <= Utc::now() {
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn next_record(
        &self,
        key: &str,
        ttl_seconds: u64,
    ) -> Result<StoredCounterRecord, StoreError> {
        let ttl = chrono::Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX));
        Ok(match self.read(key).await? {
            Some(current) => StoredCounterRecord {
                count: current.count + 1,
                reset_at: current.reset_at,
                version: current.version + 1,
            },
            None => StoredCounterRecord {
                count: 1,
                reset_at: Utc::now() + ttl,
                version: 1,
            },
        })
    }
}

fn encode(record: &StoredCounterRecord) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(record)
        .map_err(|e| StoreError::Backend(format!("unencodable counter record: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KvEntry, ListPage, MemoryKvStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A store whose every read observes a concurrent writer's record, so
    /// the post-write version check can never succeed.
    #[derive(Default)]
    struct ContendedKvStore {
        puts: AtomicU32,
    }

    #[async_trait]
    impl KvStore for ContendedKvStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            let rival = StoredCounterRecord {
                count: 7,
                reset_at: Utc::now() + chrono::Duration::seconds(60),
                version: 999,
            };
            Ok(Some(encode(&rival)?))
        }

        async fn get_with_metadata(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
            Ok(self.get(key).await?.map(|value| KvEntry {
                value,
                metadata: None,
            }))
        }

        async fn put(
            &self,
            _key: &str,
            _value: &[u8],
            _options: PutOptions,
        ) -> Result<(), StoreError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn list(&self, _prefix: &str, _cursor: Option<&str>) -> Result<ListPage, StoreError> {
            Ok(ListPage {
                keys: vec![],
                cursor: None,
                complete: true,
            })
        }
    }

    fn counter_store() -> CounterStore {
        CounterStore::new(Arc::new(MemoryKvStore::new()), 3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn increment_creates_then_advances() {
        let counters = counter_store();

        let first = counters.increment("c:k", 60).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.version, 1);

        let second = counters.increment("c:k", 60).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.version, 2);
        assert_eq!(second.reset_at, first.reset_at);
    }

    #[tokio::test]
    async fn expired_window_starts_fresh() {
        let kv = Arc::new(MemoryKvStore::new());
        let counters = CounterStore::new(kv.clone(), 3, Duration::from_millis(1));

        // Plant a record whose window already ended.
        let stale = StoredCounterRecord {
            count: 9,
            reset_at: Utc::now() - chrono::Duration::seconds(1),
            version: 9,
        };
        kv.put("c:k", &encode(&stale).unwrap(), PutOptions::default())
            .await
            .unwrap();

        let record = counters.increment("c:k", 60).await.unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn persistent_version_conflict_surfaces_after_bounded_retries() {
        let kv = Arc::new(ContendedKvStore::default());
        let counters = CounterStore::new(kv.clone(), 2, Duration::from_millis(1));

        let err = counters.increment("c:k", 60).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(2)));
        // One initial write plus one per retry.
        assert_eq!(kv.puts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn read_returns_none_for_absent_key() {
        let counters = counter_store();
        assert!(counters.read("c:missing").await.unwrap().is_none());
    }
}
