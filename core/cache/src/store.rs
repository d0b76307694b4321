//! Time-bounded local cache of server responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

use usher_common::{Error, Result};

use crate::policy::TtlPolicy;

/// A cached value with its expiry metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached response body.
    pub value: Value,
    /// When the value was stored.
    pub stored_at: DateTime<Utc>,
    /// How long past `stored_at` the value stays usable.
    pub ttl: Duration,
}

impl CacheEntry {
    /// Whether the entry is past its TTL at the given instant.
    ///
    /// An entry is usable while `now - stored_at <= ttl`; exactly at the
    /// boundary it is still fresh.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match (now - self.stored_at).to_std() {
            Ok(age) => age > self.ttl,
            // Stored in the future (clock moved backwards): treat as fresh.
            Err(_) => false,
        }
    }
}

/// Read-through cache persisted as a single JSON registry.
///
/// Expired entries are reclaimed lazily: a `get` past the TTL deletes the
/// entry and reports a miss. Writes are best-effort; a failing persist never
/// surfaces to the caller beyond a log line.
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    registry_path: PathBuf,
    policy: TtlPolicy,
}

impl CacheStore {
    /// Open the cache registry under `base_dir`, loading any persisted state.
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_policy(base_dir, TtlPolicy::default()).await
    }

    /// Open with a custom TTL policy.
    pub async fn open_with_policy(base_dir: impl AsRef<Path>, policy: TtlPolicy) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        let registry_path = base_dir.join("cache.json");

        fs::create_dir_all(base_dir).await.map_err(Error::Io)?;

        let entries = if registry_path.exists() {
            let content = fs::read_to_string(&registry_path)
                .await
                .map_err(Error::Io)?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            HashMap::new()
        };

        Ok(Self {
            entries,
            registry_path,
            policy,
        })
    }

    /// Get a cached value, treating expired entries as absent.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.get_at(key, Utc::now())
    }

    /// Get with an explicit clock, for TTL boundary checks.
    pub fn get_at(&mut self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired_at(now),
            None => return None,
        };

        if expired {
            debug!(key, "cache entry expired");
            self.entries.remove(key);
            // The registry file catches up on the next persisted mutation.
            None
        } else {
            self.entries.get(key).map(|entry| entry.value.clone())
        }
    }

    /// Store a value under `key` with the TTL its resource class dictates.
    ///
    /// Never fails: if persisting the registry errors, expired entries are
    /// swept and the write retried once; a second failure drops the new
    /// entry silently.
    pub async fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.insert_at(key, value, Utc::now()).await
    }

    /// Store with an explicit clock.
    pub async fn insert_at(&mut self, key: impl Into<String>, value: Value, now: DateTime<Utc>) {
        let key = key.into();
        let ttl = self.policy.ttl_for(&key);
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                stored_at: now,
                ttl,
            },
        );

        if let Err(first) = self.persist().await {
            warn!(key, "cache write failed, sweeping and retrying: {}", first);
            self.sweep_expired(now);
            if let Err(second) = self.persist().await {
                self.entries.remove(&key);
                warn!(key, "cache write dropped: {}", second);
            }
        }
    }

    /// Remove a single entry. Returns whether it existed.
    pub async fn remove(&mut self, key: &str) -> Result<bool> {
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.persist().await?;
        }
        Ok(existed)
    }

    /// Delete every expired entry. Returns how many were removed.
    pub async fn clear_expired(&mut self) -> Result<usize> {
        self.clear_expired_at(Utc::now()).await
    }

    /// Sweep with an explicit clock.
    pub async fn clear_expired_at(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.sweep_expired(now);
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Delete everything.
    pub async fn clear_all(&mut self) -> Result<usize> {
        let removed = self.entries.len();
        self.entries.clear();
        self.persist().await?;
        Ok(removed)
    }

    /// Number of entries, including any not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All cached keys, unordered.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Drop expired entries from memory without persisting.
    fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before - self.entries.len()
    }

    /// Rewrite the registry atomically: write a temp file, then rename it
    /// over the registry so a crash never leaves a half-written file.
    async fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let tmp_path = self.registry_path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await.map_err(Error::Io)?;
        fs::rename(&tmp_path, &self.registry_path)
            .await
            .map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_insert_and_get() {
        let temp = TempDir::new().unwrap();
        let mut cache = CacheStore::open(temp.path()).await.unwrap();

        cache.insert("events", json!([{"id": 1}])).await;

        assert_eq!(cache.get("events"), Some(json!([{"id": 1}])));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let temp = TempDir::new().unwrap();
        let mut cache = CacheStore::open(temp.path()).await.unwrap();

        let stored_at = Utc::now();
        cache.insert_at("events", json!("fresh"), stored_at).await;

        // events class: one hour
        let just_before = stored_at + chrono::Duration::milliseconds(3_600_000 - 1);
        let exactly = stored_at + chrono::Duration::milliseconds(3_600_000);
        let just_after = stored_at + chrono::Duration::milliseconds(3_600_000 + 1);

        assert_eq!(cache.get_at("events", just_before), Some(json!("fresh")));
        assert_eq!(cache.get_at("events", exactly), Some(json!("fresh")));
        assert_eq!(cache.get_at("events", just_after), None);
        // the expired read deleted the entry
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_expired_get_deletes_entry() {
        let temp = TempDir::new().unwrap();
        let mut cache = CacheStore::open(temp.path()).await.unwrap();

        let stored_at = Utc::now() - chrono::Duration::hours(2);
        cache.insert_at("logs_mine", json!("old"), stored_at).await;

        assert_eq!(cache.get("logs_mine"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let temp = TempDir::new().unwrap();
        let mut cache = CacheStore::open(temp.path()).await.unwrap();

        cache.insert("events", json!(1)).await;
        cache.insert("users", json!(2)).await;

        assert!(cache.remove("events").await.unwrap());
        assert!(!cache.remove("events").await.unwrap());
        assert_eq!(cache.clear_all().await.unwrap(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_clear_expired_keeps_fresh_entries() {
        let temp = TempDir::new().unwrap();
        let mut cache = CacheStore::open(temp.path()).await.unwrap();

        let now = Utc::now();
        cache
            .insert_at("events", json!("stale"), now - chrono::Duration::hours(3))
            .await;
        cache.insert_at("users", json!("fresh"), now).await;

        let removed = cache.clear_expired_at(now).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.get_at("users", now), Some(json!("fresh")));
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let temp = TempDir::new().unwrap();

        {
            let mut cache = CacheStore::open(temp.path()).await.unwrap();
            cache.insert("events", json!([1, 2, 3])).await;
        }

        {
            let mut cache = CacheStore::open(temp.path()).await.unwrap();
            assert_eq!(cache.get("events"), Some(json!([1, 2, 3])));
        }
    }

    #[tokio::test]
    async fn test_failed_write_is_dropped_silently() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("cache");
        let mut cache = CacheStore::open(&dir).await.unwrap();

        // Pull the directory out from under the store so persisting fails.
        tokio::fs::remove_dir_all(&dir).await.unwrap();

        cache.insert("events", json!("doomed")).await;
        assert_eq!(cache.get("events"), None);
    }

    #[tokio::test]
    async fn test_corrupt_registry_starts_empty() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(temp.path().join("cache.json"), "not json")
            .await
            .unwrap();

        let cache = CacheStore::open(temp.path()).await.unwrap();
        assert!(cache.is_empty());
    }
}
