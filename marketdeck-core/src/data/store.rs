//! String-keyed local persistence with a finite quota.
//!
//! Two implementations:
//! - [`FileStore`]: one JSON file per key under a directory, atomic writes
//!   (write to `.tmp`, rename into place), optional byte quota. A full disk
//!   (`ENOSPC`) is reported as [`StoreError::QuotaExceeded`] too.
//! - [`MemoryStore`]: in-process map with an optional byte quota.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

const ENOSPC: i32 = 28;

/// Local store errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("storage quota exceeded ({needed} bytes needed, quota {quota})")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("storage I/O error: {0}")]
    Io(String),
}

/// Key/value store. No transactions; each call is independent.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Keys starting with `prefix`.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

// ── In-memory store ──────────────────────────────────────────────────

/// In-memory store. Usage is the sum of key and value lengths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    quota: Option<u64>,
    set_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Number of `set` calls made, successful or not.
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_calls.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock();
        if let Some(quota) = self.quota {
            let others: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| (k.len() + v.len()) as u64)
                .sum();
            let needed = others + (key.len() + value.len()) as u64;
            if needed > quota {
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }
}

// ── File-backed store ────────────────────────────────────────────────

/// Directory-backed store: `{dir}/{encoded key}.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    quota: Option<u64>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir, quota: None })
    }

    /// Cap the total size of stored values, in bytes.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota = Some(quota_bytes);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }

    fn usage_excluding(&self, path: &Path) -> Result<u64, StoreError> {
        let mut total = 0;
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let p = entry.path();
            if p == path || p.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            total += entry.metadata().map_err(io_err)?.len();
        }
        Ok(total)
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if let Some(quota) = self.quota {
            let needed = self.usage_excluding(&path)? + value.len() as u64;
            if needed > quota {
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }

        let tmp_path = path.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp_path, value) {
            let _ = fs::remove_file(&tmp_path);
            return Err(write_err(e, value.len() as u64, self.quota));
        }
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(format!("atomic rename failed: {e}"))
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Some(key) = decode_key(stem) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

fn write_err(e: std::io::Error, needed: u64, quota: Option<u64>) -> StoreError {
    if e.raw_os_error() == Some(ENOSPC) {
        StoreError::QuotaExceeded {
            needed,
            quota: quota.unwrap_or(0),
        }
    } else {
        io_err(e)
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_-]` so keys are safe file names.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_quota_counts_keys_and_values() {
        let store = MemoryStore::with_quota(10);
        store.set("a", "1234").unwrap();
        store.set("b", "1234").unwrap();
        let err = store.set("c", "1").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { needed: 12, quota: 10 }));
        // Overwriting an existing key only counts the new value.
        store.set("a", "12").unwrap();
        assert_eq!(store.set_calls(), 4);
    }

    #[test]
    fn key_encoding_roundtrip() {
        for key in ["marketdeck:window:500:1", "plain", "a b/c%d"] {
            let encoded = encode_key(key);
            assert!(!encoded.contains(':') && !encoded.contains('/'));
            assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        }
    }

    #[test]
    fn file_store_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.get("missing").unwrap(), None);
        store.set("ns:one", "{\"v\":1}").unwrap();
        store.set("ns:two", "{\"v\":2}").unwrap();
        store.set("other", "[]").unwrap();

        assert_eq!(store.get("ns:one").unwrap().as_deref(), Some("{\"v\":1}"));
        assert_eq!(store.keys_with_prefix("ns:").unwrap(), vec!["ns:one", "ns:two"]);

        store.remove("ns:one").unwrap();
        store.remove("ns:one").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["ns:two", "other"]);
    }

    #[test]
    fn file_store_quota() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap().with_quota(8);

        store.set("a", "12345").unwrap();
        assert!(matches!(
            store.set("b", "12345"),
            Err(StoreError::QuotaExceeded { .. })
        ));
        // Replacing "a" doesn't count its old size.
        store.set("a", "12345678").unwrap();
        assert!(store.get("b").unwrap().is_none());
    }
}
