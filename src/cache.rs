// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Expiring key/value cache persisted to a JSON file.
//!
//! The on-disk layout is one JSON object mapping each key to
//! `{"data": ..., "timestamp": <unix seconds>, "ttl": <seconds>}`. The whole
//! table is rewritten after every mutation. Expiry is a pure function of wall
//! clock time; there is no LRU and no size bound.
//!
//! A cache file that cannot be parsed is logged as corruption and the cache
//! starts empty. Write failures are logged and never affect the in-memory
//! value.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::WorkshopError;
use crate::locks::{resilient_lock, resilient_read, resilient_write};
use crate::storage;

/// A cached payload with its creation time and lifetime, both in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub data: V,
    pub timestamp: f64,
    pub ttl: f64,
}

impl<V> CacheEntry<V> {
    pub fn new(data: V, ttl: Duration) -> Self {
        Self {
            data,
            timestamp: now_secs(),
            ttl: ttl.as_secs_f64(),
        }
    }

    /// `now - timestamp > ttl`
    pub fn is_expired_at(&self, now: f64) -> bool {
        now - self.timestamp > self.ttl
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_secs())
    }
}

fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Generic TTL cache keyed by string.
pub struct TtlCache<V> {
    entries: RwLock<IndexMap<String, CacheEntry<V>>>,
    path: Option<PathBuf>,
    default_ttl: Duration,
    /// Serializes snapshot-and-write so an older table never lands last.
    persist_guard: Mutex<()>,
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// In-memory cache with no backing file.
    pub fn in_memory(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            path: None,
            default_ttl,
            persist_guard: Mutex::new(()),
        }
    }

    /// Open a cache backed by `path`, loading any entries that have not
    /// expired yet.
    pub fn open(path: impl Into<PathBuf>, default_ttl: Duration) -> Self {
        let path = path.into();
        let entries = match Self::load_entries(&path) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    "{}; starting with an empty cache",
                    err
                );
                IndexMap::new()
            }
        };

        Self {
            entries: RwLock::new(entries),
            path: Some(path),
            default_ttl,
            persist_guard: Mutex::new(()),
        }
    }

    fn load_entries(path: &Path) -> Result<IndexMap<String, CacheEntry<V>>, WorkshopError> {
        let loaded: Option<IndexMap<String, CacheEntry<V>>> =
            storage::read_json(path).map_err(|e| WorkshopError::CacheCorruption {
                path: path.to_path_buf(),
                reason: format!("{:#}", e),
            })?;

        let now = now_secs();
        let mut entries = loaded.unwrap_or_default();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        if before != entries.len() {
            tracing::debug!(
                path = %path.display(),
                dropped = before - entries.len(),
                "Dropped expired cache entries on load"
            );
        }
        Ok(entries)
    }

    /// The TTL applied by [`TtlCache::set_default`].
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up `key`. An expired entry is evicted by the read that finds it.
    pub fn get(&self, key: &str) -> Option<V> {
        {
            let entries = resilient_read(&self.entries);
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(entry.data.clone()),
                Some(_) => {}
            }
        }

        let evicted = {
            let mut entries = resilient_write(&self.entries);
            // Re-check under the write lock; a concurrent set may have refreshed it
            match entries.get(key) {
                Some(entry) if entry.is_expired() => entries.shift_remove(key).is_some(),
                Some(entry) => return Some(entry.data.clone()),
                None => false,
            }
        };

        if evicted {
            tracing::debug!(key, "Evicted expired cache entry");
            self.persist();
        }
        None
    }

    /// Insert or overwrite `key` with an explicit lifetime.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        resilient_write(&self.entries).insert(key, CacheEntry::new(value, ttl));
        self.persist();
    }

    /// Insert or overwrite `key` using the cache's default lifetime.
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Drop one key. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = resilient_write(&self.entries).shift_remove(key).is_some();
        if removed {
            self.persist();
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        resilient_write(&self.entries).clear();
        self.persist();
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        resilient_read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the full table as it would be written to disk.
    pub fn dump(&self) -> IndexMap<String, CacheEntry<V>> {
        resilient_read(&self.entries).clone()
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };

        let _guard = resilient_lock(&self.persist_guard);
        let snapshot = self.dump();
        if let Err(e) = storage::write_json_atomic(path, &snapshot) {
            tracing::warn!(path = %path.display(), "Failed to persist cache: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_set_then_get_before_expiry() {
        let cache: TtlCache<String> = TtlCache::in_memory(Duration::from_secs(60));
        cache.set("details:1", "one".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get("details:1"), Some("one".to_string()));
        assert_eq!(cache.get("details:2"), None);
    }

    #[test]
    fn test_expired_entry_is_evicted_and_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.json");
        let cache: TtlCache<String> = TtlCache::open(&path, Duration::from_secs(60));

        cache.set("short", "gone soon".to_string(), Duration::from_millis(50));
        cache.set("long", "stays".to_string(), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(120));

        assert_eq!(cache.get("short"), None);
        assert!(!cache.dump().contains_key("short"));

        let on_disk: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(on_disk.get("short").is_none());
        assert_eq!(on_disk["long"]["data"], "stays");
        assert!(on_disk["long"]["timestamp"].as_f64().is_some());
        assert_eq!(on_disk["long"]["ttl"].as_f64(), Some(60.0));
    }

    #[test]
    fn test_set_overwrites() {
        let cache: TtlCache<u32> = TtlCache::in_memory(Duration::from_secs(60));
        cache.set_default("k", 1);
        cache.set_default("k", 2);
        assert_eq!(cache.get("k"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache: TtlCache<u32> = TtlCache::in_memory(Duration::from_secs(60));
        cache.set_default("a", 1);
        cache.set_default("b", 2);

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.get("a"), None);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reopen_restores_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("collections.json");
        {
            let cache: TtlCache<Vec<String>> = TtlCache::open(&path, Duration::from_secs(60));
            cache.set_default("collection:9", vec!["1".to_string(), "2".to_string()]);
        }
        let cache: TtlCache<Vec<String>> = TtlCache::open(&path, Duration::from_secs(60));
        assert_eq!(
            cache.get("collection:9"),
            Some(vec!["1".to_string(), "2".to_string()])
        );
    }

    #[test]
    fn test_malformed_file_resets_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.json");
        fs::write(&path, "{\"details:1\": {\"data\": ").unwrap();

        let cache: TtlCache<String> = TtlCache::open(&path, Duration::from_secs(60));
        assert!(cache.is_empty());

        // Still usable, and the next write repairs the file
        cache.set_default("details:1", "fresh".to_string());
        let reopened: TtlCache<String> = TtlCache::open(&path, Duration::from_secs(60));
        assert_eq!(reopened.get("details:1"), Some("fresh".to_string()));
    }

    #[test]
    fn test_persist_failure_keeps_memory_value() {
        let dir = TempDir::new().unwrap();
        // A directory where the cache file should be makes the rename fail
        let path = dir.path().join("blocked.json");
        fs::create_dir_all(path.join("occupied")).unwrap();

        let cache: TtlCache<String> = TtlCache::open(&path, Duration::from_secs(60));
        cache.set_default("k", "v".to_string());
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }
}
