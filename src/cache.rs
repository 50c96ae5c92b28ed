//! TTL-bounded banner cache keyed by slot id.
//!
//! Entries are JSON `{"banner": Creative, "timestamp": millis}` stored under
//! `adserver_banner_{slot}_data`. Expiry is lazy: a stale entry is removed by
//! the read that finds it. Storage failures never escape this module, they
//! are logged and turned into misses or no-ops.

use crate::fetch::Creative;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Namespace shared by every cache key.
pub const CACHE_KEY_PREFIX: &str = "adserver_banner_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub banner: Creative,
    /// Unix time in milliseconds when the entry was stored
    pub timestamp: u64,
}

pub fn cache_key(slot_id: &str) -> String {
    format!("{}{}_data", CACHE_KEY_PREFIX, slot_id)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Banner cache over a [`Storage`] backend.
#[derive(Clone)]
pub struct BannerCache {
    storage: Arc<dyn Storage>,
    enabled: bool,
    ttl: Duration,
}

impl BannerCache {
    pub fn new(storage: Arc<dyn Storage>, enabled: bool, ttl: Duration) -> Self {
        Self {
            storage,
            enabled,
            ttl,
        }
    }

    /// Cached creative for `slot_id`, if present and fresh.
    pub fn get(&self, slot_id: &str) -> Option<Creative> {
        if !self.enabled {
            return None;
        }

        let key = cache_key(slot_id);
        let raw = match self.storage.get_item(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(slot = slot_id, error = %e, "Cache read failed");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(slot = slot_id, error = %e, "Discarding corrupted cache entry");
                self.remove(slot_id);
                return None;
            }
        };

        let age = now_millis().saturating_sub(entry.timestamp);
        if u128::from(age) > self.ttl.as_millis() {
            debug!(slot = slot_id, age_ms = age, "Cache entry expired");
            self.remove(slot_id);
            return None;
        }

        debug!(slot = slot_id, age_ms = age, "Cache hit");
        Some(entry.banner)
    }

    /// Store `creative` for `slot_id`.
    pub fn put(&self, slot_id: &str, creative: &Creative) {
        if !self.enabled {
            return;
        }

        let entry = CacheEntry {
            banner: creative.clone(),
            timestamp: now_millis(),
        };

        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(slot = slot_id, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = self.storage.set_item(&cache_key(slot_id), &json) {
            warn!(slot = slot_id, error = %e, "Cache write failed");
        }
    }

    pub fn remove(&self, slot_id: &str) {
        if let Err(e) = self.storage.remove_item(&cache_key(slot_id)) {
            warn!(slot = slot_id, error = %e, "Cache remove failed");
        }
    }

    /// Remove every entry under the cache namespace, leaving other keys alone.
    pub fn clear(&self) {
        let keys = match self.storage.keys_with_prefix(CACHE_KEY_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Cache clear failed");
                return;
            }
        };

        for key in keys {
            if let Err(e) = self.storage.remove_item(&key) {
                warn!(key = %key, error = %e, "Cache remove failed");
            }
        }
    }

    /// Number of entries under the cache namespace (fresh or not).
    pub fn size(&self) -> usize {
        self.storage
            .keys_with_prefix(CACHE_KEY_PREFIX)
            .map(|keys| keys.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use tempfile::TempDir;

    fn creative(html: &str) -> Creative {
        Creative {
            html: html.to_string(),
            width: 300,
            height: 250,
            click_url: "https://api/click".to_string(),
            impression_url: "https://api/imp".to_string(),
            campaign_id: "camp-1".to_string(),
        }
    }

    fn cache_with(storage: Arc<dyn Storage>) -> BannerCache {
        BannerCache::new(storage, true, Duration::from_millis(300_000))
    }

    #[test]
    fn test_roundtrip() {
        let cache = cache_with(Arc::new(MemoryStorage::new()));
        assert_eq!(cache.get("slot"), None);

        cache.put("slot", &creative("<p>a</p>"));
        assert_eq!(cache.get("slot"), Some(creative("<p>a</p>")));
        assert_eq!(cache.size(), 1);

        cache.remove("slot");
        assert_eq!(cache.get("slot"), None);
    }

    #[test]
    fn test_entry_format() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = cache_with(storage.clone());
        cache.put("top", &creative("x"));

        let raw = storage.get_item("adserver_banner_top_data").unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["banner"]["clickURL"], "https://api/click");
        assert_eq!(json["banner"]["impressionURL"], "https://api/imp");
        assert_eq!(json["banner"]["campaignID"], "camp-1");
        assert!(json["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_entry_with_short_impression_key() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = cache_with(storage.clone());
        let raw = serde_json::json!({
            "banner": {
                "html": "x", "width": 300, "height": 250,
                "clickURL": "https://api/click", "impression": "https://api/imp",
            },
            "timestamp": now_millis(),
        });
        storage.set_item(&cache_key("slot"), &raw.to_string()).unwrap();

        let creative = cache.get("slot").unwrap();
        assert_eq!(creative.impression_url, "https://api/imp");
        assert_eq!(creative.campaign_id, "");
    }

    #[test]
    fn test_expired_entry_evicted() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = BannerCache::new(storage.clone(), true, Duration::from_millis(1_000));

        let stale = CacheEntry {
            banner: creative("old"),
            timestamp: now_millis() - 5_000,
        };
        storage
            .set_item(&cache_key("slot"), &serde_json::to_string(&stale).unwrap())
            .unwrap();

        assert_eq!(cache.get("slot"), None);
        // Lazy expiry removed the entry
        assert_eq!(storage.get_item(&cache_key("slot")).unwrap(), None);
    }

    #[test]
    fn test_future_timestamp_not_expired() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = BannerCache::new(storage.clone(), true, Duration::ZERO);

        let fresh = CacheEntry {
            banner: creative("new"),
            timestamp: now_millis() + 60_000,
        };
        storage
            .set_item(&cache_key("slot"), &serde_json::to_string(&fresh).unwrap())
            .unwrap();
        assert_eq!(cache.get("slot"), Some(creative("new")));
    }

    #[test]
    fn test_disabled_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = BannerCache::new(storage.clone(), false, Duration::from_secs(60));

        cache.put("slot", &creative("x"));
        assert_eq!(storage.keys_with_prefix("").unwrap().len(), 0);
        assert_eq!(cache.get("slot"), None);
    }

    #[test]
    fn test_corrupted_entry_is_miss() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = cache_with(storage.clone());
        storage.set_item(&cache_key("slot"), "{broken").unwrap();

        assert_eq!(cache.get("slot"), None);
        assert_eq!(storage.get_item(&cache_key("slot")).unwrap(), None);
    }

    #[test]
    fn test_storage_failures_absorbed() {
        let cache = cache_with(Arc::new(MemoryStorage::disabled()));
        cache.put("slot", &creative("x"));
        assert_eq!(cache.get("slot"), None);
        cache.clear();
        assert_eq!(cache.size(), 0);

        let cache = cache_with(Arc::new(MemoryStorage::with_quota(16)));
        cache.put("slot", &creative("x"));
        assert_eq!(cache.get("slot"), None);
    }

    #[test]
    fn test_clear_only_touches_namespace() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = cache_with(storage.clone());
        storage.set_item("user_pref", "dark").unwrap();
        cache.put("a", &creative("a"));
        cache.put("b", &creative("b"));
        assert_eq!(cache.size(), 2);

        cache.clear();
        assert_eq!(cache.size(), 0);
        assert_eq!(storage.get_item("user_pref").unwrap().as_deref(), Some("dark"));
    }

    #[test]
    fn test_file_backed_cache() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("banners.json");

        cache_with(Arc::new(FileStorage::new(&path))).put("slot", &creative("x"));
        let reopened = cache_with(Arc::new(FileStorage::new(&path)));
        assert_eq!(reopened.get("slot"), Some(creative("x")));
    }
}
