//! Weather response cache.
//!
//! Entries are keyed by a SHA-256 digest of the query, expire after a TTL,
//! and remain available as a stale fallback until the stale horizon. The
//! cache persists to a JSON file through the [`Persistence`] contract.

mod janitor;

pub use janitor::CacheJanitor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::info;

use crate::config::CacheConfig;
use crate::error::{CoreError, Result};

/// Load/save contract for state that outlives the process.
pub trait Persistence: Send + Sync {
    /// Restores state. A missing backing store is not an error.
    fn load(&self) -> Result<()>;

    /// Writes state out.
    fn save(&self) -> Result<()>;
}

/// A cached upstream payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cached payload.
    pub data: Value,
    /// End of the freshness window.
    pub expires_at: DateTime<Utc>,
    /// When the payload was stored.
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Entry counts by freshness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// All entries.
    pub total: usize,
    /// Within TTL.
    pub fresh: usize,
    /// Past TTL, within the stale horizon.
    pub stale: usize,
    /// Past the stale horizon.
    pub expired: usize,
}

/// In-memory weather cache backed by a JSON file.
pub struct WeatherCache {
    store: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    stale_max_age: Duration,
    file_path: PathBuf,
}

impl WeatherCache {
    /// Creates an empty cache.
    pub fn new(ttl: Duration, stale_max_age: Duration, file_path: impl AsRef<Path>) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            ttl,
            stale_max_age,
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    /// Creates an empty cache from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl(), config.stale_max_age(), &config.file_path)
    }

    /// Cache key for a query: lowercase hex SHA-256 of `city:start:end`.
    pub fn key(city: &str, start_date: &str, end_date: &str) -> String {
        let digest = Sha256::digest(format!("{}:{}:{}", city, start_date, end_date).as_bytes());
        format!("{:x}", digest)
    }

    /// Stale horizon.
    pub fn stale_max_age(&self) -> Duration {
        self.stale_max_age
    }

    /// Returns the payload if present and within its TTL.
    pub fn get(&self, key: &str) -> Option<Value> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store
            .get(key)
            .filter(|entry| Utc::now() <= entry.expires_at)
            .map(|entry| entry.data.clone())
    }

    /// Returns the payload and its age if stored no longer than `max_age` ago,
    /// regardless of TTL.
    pub fn get_stale(&self, key: &str, max_age: Duration) -> Option<(Value, Duration)> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let entry = store.get(key)?;
        let age = entry.age(Utc::now());
        (age <= max_age).then(|| (entry.data.clone(), age))
    }

    /// Stores a payload with the default TTL.
    pub fn set(&self, key: impl Into<String>, data: Value) {
        self.set_with_ttl(key, data, self.ttl);
    }

    /// Stores a payload with a custom TTL.
    pub fn set_with_ttl(&self, key: impl Into<String>, data: Value, ttl: Duration) {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let entry = CacheEntry {
            data,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            stored_at: now,
        };
        self.write_store().insert(key.into(), entry);
    }

    /// Removes entries older than the stale horizon. Returns the remaining size.
    pub fn clean_expired(&self) -> usize {
        let now = Utc::now();
        let mut store = self.write_store();
        store.retain(|_, entry| entry.age(now) <= self.stale_max_age);
        store.len()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.store.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counts entries by freshness.
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);

        store.values().fold(CacheStats::default(), |mut stats, entry| {
            stats.total += 1;
            if now < entry.expires_at {
                stats.fresh += 1;
            } else if entry.age(now) <= self.stale_max_age {
                stats.stale += 1;
            } else {
                stats.expired += 1;
            }
            stats
        })
    }

    fn write_store(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Persistence for WeatherCache {
    fn load(&self) -> Result<()> {
        if !self.file_path.exists() {
            info!(
                path = %self.file_path.display(),
                "No existing cache file found. Starting with empty cache."
            );
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.file_path).map_err(|e| {
            CoreError::cache_with_source(
                format!("failed to read cache file '{}'", self.file_path.display()),
                e,
            )
        })?;
        let loaded: HashMap<String, CacheEntry> = serde_json::from_str(&content)
            .map_err(|e| CoreError::cache_with_source("failed to unmarshal cache", e))?;

        let now = Utc::now();
        let total = loaded.len();
        let mut store = self.write_store();
        for (key, entry) in loaded {
            if entry.age(now) <= self.stale_max_age {
                store.insert(key, entry);
            }
        }
        let kept = store.len();

        info!(
            path = %self.file_path.display(),
            loaded = kept,
            discarded = total.saturating_sub(kept),
            "Loaded cache entries"
        );
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let content = serde_json::to_string_pretty(&*store)
            .map_err(|e| CoreError::cache_with_source("failed to marshal cache", e))?;

        std::fs::write(&self.file_path, content).map_err(|e| {
            CoreError::cache_with_source(
                format!("failed to write cache file '{}'", self.file_path.display()),
                e,
            )
        })?;

        info!(
            path = %self.file_path.display(),
            entries = store.len(),
            "Saved cache entries"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_cache(path: &Path) -> WeatherCache {
        WeatherCache::new(
            Duration::from_secs(1800),
            Duration::from_secs(86400),
            path,
        )
    }

    fn aged_entry(data: Value, age_secs: i64, ttl_secs: i64) -> CacheEntry {
        let stored_at = Utc::now() - chrono::Duration::seconds(age_secs);
        CacheEntry {
            data,
            expires_at: stored_at + chrono::Duration::seconds(ttl_secs),
            stored_at,
        }
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let key = WeatherCache::key("Paris", "2024-01-01", "2024-01-02");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(key, WeatherCache::key("Paris", "2024-01-01", "2024-01-02"));
        assert_ne!(key, WeatherCache::key("paris", "2024-01-01", "2024-01-02"));
    }

    #[test]
    fn test_key_known_digest() {
        // sha256("a:b:c")
        assert_eq!(
            WeatherCache::key("a", "b", "c"),
            "b0ee04f880c4ff4261479e2e7822b7410aee4c7159f4185ad5b0d88a312b495e"
        );
    }

    #[test]
    fn test_set_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir.path().join("cache.json"));

        assert!(cache.get("k").is_none());
        cache.set("k", json!({"temperature": 3.5}));
        assert_eq!(cache.get("k"), Some(json!({"temperature": 3.5})));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_only_served_stale() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir.path().join("cache.json"));
        cache
            .write_store()
            .insert("k".to_string(), aged_entry(json!("old"), 3600, 1800));

        assert!(cache.get("k").is_none());
        let (data, age) = cache.get_stale("k", Duration::from_secs(86400)).unwrap();
        assert_eq!(data, json!("old"));
        assert!(age >= Duration::from_secs(3600));
        assert!(cache.get_stale("k", Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_set_with_ttl_zero_expires_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir.path().join("cache.json"));
        cache.set_with_ttl("k", json!(1), Duration::ZERO);

        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
        assert!(cache.get_stale("k", Duration::from_secs(60)).is_some());
    }

    #[test]
    fn test_clean_expired_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir.path().join("cache.json"));
        cache.set("fresh", json!(1));
        {
            let mut store = cache.write_store();
            store.insert("stale".to_string(), aged_entry(json!(2), 7200, 1800));
            store.insert("expired".to_string(), aged_entry(json!(3), 90000, 1800));
        }

        assert_eq!(
            cache.stats(),
            CacheStats {
                total: 3,
                fresh: 1,
                stale: 1,
                expired: 1
            }
        );

        assert_eq!(cache.clean_expired(), 2);
        assert!(cache.get_stale("expired", Duration::MAX).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = test_cache(&path);
        cache.set("kept", json!({"city": "Paris"}));
        cache
            .write_store()
            .insert("ancient".to_string(), aged_entry(json!(0), 90000, 1800));
        cache.save().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"expires_at\""));
        assert!(content.contains("\"stored_at\""));

        let restored = test_cache(&path);
        restored.load().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.get("kept"), Some(json!({"city": "Paris"})));
    }

    #[test]
    fn test_load_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir.path().join("absent.json"));
        assert!(cache.load().is_ok());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = test_cache(&path).load().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::CacheError);
    }
}
