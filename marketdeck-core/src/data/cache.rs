//! Persistent window cache with TTL freshness and self-eviction.
//!
//! Layout: one store entry per window under `{namespace}{key}`, holding the
//! items, `fetched_at`, and a BLAKE3 hash of the serialized items.
//!
//! Features:
//! - Freshness against a TTL (`now - fetched_at < ttl`)
//! - Integrity check on read (undecodable or hash-mismatched entries read as absent)
//! - Quota handling: purge this namespace only, retry the write once, then drop
//! - Entries survive restarts and are replaced on every successful refetch

use super::provider::RankedItem;
use super::store::{KvStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key prefix owned by this engine in a shared store.
pub const DEFAULT_NAMESPACE: &str = "marketdeck:cache:";

/// A cached window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data: Vec<RankedItem>,
    pub fetched_at: DateTime<Utc>,
    pub data_hash: String,
}

impl CacheEntry {
    /// True while `now - fetched_at < ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        is_fresh(self.fetched_at, ttl, now)
    }
}

/// Freshness predicate.
pub fn is_fresh(fetched_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now - fetched_at < ttl,
        Err(_) => true,
    }
}

/// Cache key for a window. Window size is part of the key so a size change
/// never serves windows cut at other boundaries.
pub fn window_key(window_size: u32, window_index: u32) -> String {
    format!("window:{window_size}:{window_index}")
}

/// What happened to a cache write. Writes never fail for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    /// Quota was hit; the namespace was purged and the retry succeeded.
    StoredAfterEviction,
    /// The write (and its single retry, if any) failed; the data was not persisted.
    Dropped,
}

/// Cache status for a single entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub key: String,
    pub item_count: usize,
    pub fetched_at: DateTime<Utc>,
}

/// The persistent cache, scoped to one namespace of a [`KvStore`].
#[derive(Clone)]
pub struct PersistentCache {
    store: Arc<dyn KvStore>,
    namespace: String,
}

impl PersistentCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_namespace(store, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(store: Arc<dyn KvStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }

    /// Read an entry regardless of age. Corrupt entries read as absent.
    pub fn read(&self, key: &str) -> Option<CacheEntry> {
        let raw = match self.store.get(&self.storage_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "ignoring undecodable cache entry");
                return None;
            }
        };

        match hash_items(&entry.data) {
            Ok(hash) if hash == entry.data_hash => Some(entry),
            _ => {
                warn!(key, "ignoring cache entry with mismatched hash");
                None
            }
        }
    }

    /// Store `data` under `key`, replacing any previous entry.
    ///
    /// On quota failure every key in this namespace (and only this namespace)
    /// is deleted and the write is retried exactly once. If that also fails the
    /// write is dropped; the caller keeps using its in-memory data.
    pub fn write(&self, key: &str, data: &[RankedItem], fetched_at: DateTime<Utc>) -> WriteOutcome {
        let serialized = match serialize_entry(key, data, fetched_at) {
            Ok(s) => s,
            Err(e) => {
                warn!(key, error = %e, "cache entry serialization failed; dropping write");
                return WriteOutcome::Dropped;
            }
        };
        let storage_key = self.storage_key(key);

        match self.store.set(&storage_key, &serialized) {
            Ok(()) => {
                debug!(key, items = data.len(), "cache entry stored");
                WriteOutcome::Stored
            }
            Err(StoreError::QuotaExceeded { needed, quota }) => {
                warn!(key, needed, quota, "storage quota exceeded; purging cache namespace");
                if let Err(e) = self.clear() {
                    warn!(error = %e, "namespace purge incomplete");
                }
                match self.store.set(&storage_key, &serialized) {
                    Ok(()) => WriteOutcome::StoredAfterEviction,
                    Err(e) => {
                        warn!(key, error = %e, "cache write dropped after eviction retry");
                        WriteOutcome::Dropped
                    }
                }
            }
            Err(e) => {
                warn!(key, error = %e, "cache write dropped");
                WriteOutcome::Dropped
            }
        }
    }

    /// Delete every entry in this namespace. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let keys = self.store.keys_with_prefix(&self.namespace)?;
        for k in &keys {
            self.store.remove(k)?;
        }
        Ok(keys.len())
    }

    /// Status of every readable entry in this namespace.
    pub fn status(&self) -> Vec<CacheStatus> {
        let keys = match self.store.keys_with_prefix(&self.namespace) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "cache listing failed");
                return Vec::new();
            }
        };
        keys.iter()
            .filter_map(|k| k.strip_prefix(&self.namespace))
            .filter_map(|k| self.read(k))
            .map(|entry| CacheStatus {
                key: entry.key,
                item_count: entry.data.len(),
                fetched_at: entry.fetched_at,
            })
            .collect()
    }
}

fn hash_items(data: &[RankedItem]) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(data)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn serialize_entry(
    key: &str,
    data: &[RankedItem],
    fetched_at: DateTime<Utc>,
) -> Result<String, serde_json::Error> {
    let entry = CacheEntry {
        key: key.to_string(),
        data: data.to_vec(),
        fetched_at,
        data_hash: hash_items(data)?,
    };
    serde_json::to_string(&entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::MemoryStore;
    use crate::testing::items;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn write_then_read() {
        let store = Arc::new(MemoryStore::new());
        let cache = PersistentCache::new(store);

        assert!(cache.read("window:500:1").is_none());
        assert_eq!(cache.write("window:500:1", &items(1..=3), at(1_000)), WriteOutcome::Stored);

        let entry = cache.read("window:500:1").unwrap();
        assert_eq!(entry.data, items(1..=3));
        assert_eq!(entry.fetched_at, at(1_000));
    }

    #[test]
    fn write_replaces_previous_entry() {
        let cache = PersistentCache::new(Arc::new(MemoryStore::new()));
        cache.write("k", &items(1..=3), at(0));
        cache.write("k", &items(4..=5), at(10));

        let entry = cache.read("k").unwrap();
        assert_eq!(entry.data.len(), 2);
        assert_eq!(entry.fetched_at, at(10));
    }

    #[test]
    fn freshness_is_strict() {
        let ttl = Duration::from_secs(60);
        assert!(is_fresh(at(0), ttl, at(59_999)));
        assert!(!is_fresh(at(0), ttl, at(60_000)));
        assert!(!is_fresh(at(0), ttl, at(120_000)));
    }

    #[test]
    fn quota_failure_purges_namespace_and_retries_once() {
        let store = Arc::new(MemoryStore::with_quota(2_000));
        store.set("someone-else:data", "keep me").unwrap();
        let cache = PersistentCache::new(store.clone());

        assert_eq!(cache.write("a", &items(1..=10), at(0)), WriteOutcome::Stored);
        let calls_before = store.set_calls();

        let outcome = cache.write("b", &items(11..=25), at(0));

        assert_eq!(outcome, WriteOutcome::StoredAfterEviction);
        assert_eq!(store.set_calls() - calls_before, 2);
        assert!(cache.read("a").is_none());
        assert!(cache.read("b").is_some());
        assert_eq!(
            store.get("someone-else:data").unwrap().as_deref(),
            Some("keep me")
        );
    }

    #[test]
    fn write_dropped_when_retry_also_fails() {
        let store = Arc::new(MemoryStore::with_quota(64));
        store.set("other", "x").unwrap();
        let cache = PersistentCache::new(store.clone());
        let calls_before = store.set_calls();

        let outcome = cache.write("big", &items(1..=50), at(0));

        assert_eq!(outcome, WriteOutcome::Dropped);
        assert_eq!(store.set_calls() - calls_before, 2);
        assert!(cache.read("big").is_none());
        assert_eq!(store.get("other").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn tampered_entry_reads_as_absent() {
        let store = Arc::new(MemoryStore::new());
        let cache = PersistentCache::new(store.clone());
        cache.write("k", &items(1..=2), at(0));

        let key = format!("{DEFAULT_NAMESPACE}k");
        let raw = store.get(&key).unwrap().unwrap();
        store.set(&key, &raw.replace("coin-2", "coin-9")).unwrap();
        assert!(cache.read("k").is_none());

        store.set(&key, "not json").unwrap();
        assert!(cache.read("k").is_none());
    }

    #[test]
    fn clear_and_status_are_namespace_scoped() {
        let store = Arc::new(MemoryStore::new());
        store.set("foreign", "1").unwrap();
        let cache = PersistentCache::new(store.clone());
        cache.write(&window_key(500, 1), &items(1..=2), at(0));
        cache.write(&window_key(500, 2), &items(3..=3), at(5));

        let status = cache.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].key, "window:500:1");
        assert_eq!(status[0].item_count, 2);

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.status().is_empty());
        assert!(store.get("foreign").unwrap().is_some());
    }
}
