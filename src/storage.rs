//! Key/value storage behind the banner cache.
//!
//! The cache only needs string keys, string values and a way to enumerate its
//! own namespace, so that is all [`Storage`] exposes. Two backends:
//!
//! - [`MemoryStorage`]: session-scoped, lives as long as the process
//! - [`FileStorage`]: a JSON document on disk, for long-lived agents

use crate::error::StorageError;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// String key/value store with prefix enumeration.
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    /// All keys starting with `prefix`, in ascending order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

fn prefixed_keys(map: &BTreeMap<String, String>, prefix: &str) -> Vec<String> {
    map.range(prefix.to_string()..)
        .map(|(key, _)| key)
        .take_while(|key| key.starts_with(prefix))
        .cloned()
        .collect()
}

fn used_bytes(map: &BTreeMap<String, String>) -> usize {
    map.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// In-memory storage scoped to the current session.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
    disabled: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that rejects writes once keys plus values exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota: Some(bytes),
            ..Self::default()
        }
    }

    /// Storage that fails every operation, like a browser with storage off.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.disabled {
            return Err(StorageError::Unavailable);
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_enabled()?;
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        let mut items = self.items.write();

        if let Some(quota) = self.quota {
            let current = items.get(key).map_or(0, |old| key.len() + old.len());
            let used = used_bytes(&items) - current + key.len() + value.len();
            if used > quota {
                return Err(StorageError::QuotaExceeded { used, quota });
            }
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        self.items.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.check_enabled()?;
        Ok(prefixed_keys(&self.items.read(), prefix))
    }
}

/// Storage persisted as a single JSON object on disk.
///
/// Every operation re-reads the file under a lock, so several handles in the
/// same process stay consistent. A missing file is an empty store.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|e| StorageError::Corrupted(e.to_string()))
    }

    fn save(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }

        let json =
            serde_json::to_string(items).map_err(|e| StorageError::Corrupted(e.to_string()))?;

        // Write then rename so a crash never leaves a half-written store
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| StorageError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StorageError::Io(e.to_string()))
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut items = self.load()?;
        items.insert(key.to_string(), value.to_string());
        self.save(&items)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut items = self.load()?;
        if items.remove(key).is_some() {
            self.save(&items)?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let _guard = self.lock.lock();
        Ok(prefixed_keys(&self.load()?, prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_roundtrip() {
        let storage = MemoryStorage::new();
        storage.set_item("a", "1").unwrap();
        assert_eq!(storage.get_item("a").unwrap().as_deref(), Some("1"));

        storage.remove_item("a").unwrap();
        assert_eq!(storage.get_item("a").unwrap(), None);
        // Removing a missing key is fine
        storage.remove_item("a").unwrap();
    }

    #[test]
    fn test_prefix_scan() {
        let storage = MemoryStorage::new();
        for key in ["ad_b", "ad_a", "other", "ad", "ae_x"] {
            storage.set_item(key, "v").unwrap();
        }
        assert_eq!(storage.keys_with_prefix("ad_").unwrap(), vec!["ad_a", "ad_b"]);
        assert_eq!(storage.keys_with_prefix("").unwrap().len(), 5);
    }

    #[test]
    fn test_quota() {
        let storage = MemoryStorage::with_quota(10);
        storage.set_item("k", "12345").unwrap();
        assert!(matches!(
            storage.set_item("j", "1234567"),
            Err(StorageError::QuotaExceeded { quota: 10, .. })
        ));
        // Overwriting an existing key accounts for the freed bytes
        storage.set_item("k", "123456789").unwrap();
    }

    #[test]
    fn test_disabled() {
        let storage = MemoryStorage::disabled();
        assert_eq!(storage.set_item("a", "1"), Err(StorageError::Unavailable));
        assert_eq!(storage.get_item("a"), Err(StorageError::Unavailable));
        assert_eq!(storage.keys_with_prefix(""), Err(StorageError::Unavailable));
    }

    #[test]
    fn test_file_storage_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/cache.json");

        let storage = FileStorage::new(&path);
        assert_eq!(storage.get_item("a").unwrap(), None);
        storage.set_item("ad_1", "x").unwrap();
        storage.set_item("ad_2", "y").unwrap();
        storage.set_item("keep", "z").unwrap();
        storage.remove_item("ad_2").unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get_item("ad_1").unwrap().as_deref(), Some("x"));
        assert_eq!(reopened.keys_with_prefix("ad_").unwrap(), vec!["ad_1"]);
    }

    #[test]
    fn test_file_storage_corrupted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.json");
        fs::write(&path, "{not json").unwrap();

        let storage = FileStorage::new(&path);
        assert!(matches!(storage.get_item("a"), Err(StorageError::Corrupted(_))));
    }
}
