//! Syndicate Storage - Persistent party state in a JSON file.
//!
//! Values are stored under string keys in a single `state.json` document.
//! Every write replaces the file atomically (write to a sibling temp file,
//! then rename), so a crash mid-write leaves the previous state intact.
//! Several keys that must change together go through one [`WriteBatch`].

pub mod error;

pub use error::StorageError;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const STATE_FILE: &str = "state.json";

/// Puts and deletes applied to a [`StateStore`] with a single write.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<(String, Option<serde_json::Value>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StorageError> {
        let encoded =
            serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.ops.push((key.to_string(), Some(encoded)));
        Ok(())
    }

    pub fn delete(&mut self, key: &str) {
        self.ops.push((key.to_string(), None));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Key/value store of serde values, persisted as one JSON document.
pub struct StateStore {
    path: PathBuf,
    data: Arc<RwLock<serde_json::Map<String, serde_json::Value>>>,
}

impl StateStore {
    /// Open (or create) a store rooted at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if path.to_string_lossy().contains("..") {
            return Err(StorageError::InvalidPath(path.display().to_string()));
        }
        fs::create_dir_all(path)?;

        let data_file = path.join(STATE_FILE);
        let data = if data_file.exists() {
            let content = fs::read_to_string(&data_file)?;
            match serde_json::from_str::<serde_json::Value>(&content)
                .map_err(|e| StorageError::Serialization(e.to_string()))?
            {
                serde_json::Value::Object(map) => map,
                _ => {
                    return Err(StorageError::Serialization(
                        "state file root is not an object".to_string(),
                    ))
                }
            }
        } else {
            serde_json::Map::new()
        };

        tracing::debug!(path = %path.display(), keys = data.len(), "opened state store");

        Ok(Self {
            path: path.to_path_buf(),
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Directory holding the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the value stored under `key`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let data = self.data.read();
        match data.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| StorageError::Deserialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Store `value` under `key` and persist.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let encoded =
            serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let snapshot = {
            let mut data = self.data.write();
            data.insert(key.to_string(), encoded);
            data.clone()
        };

        self.persist(&snapshot)
    }

    /// Remove `key` and persist. Returns whether the key existed.
    pub fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let (existed, snapshot) = {
            let mut data = self.data.write();
            let existed = data.remove(key).is_some();
            (existed, data.clone())
        };

        if existed {
            self.persist(&snapshot)?;
        }
        Ok(existed)
    }

    /// Apply every operation in `batch` and persist once.
    ///
    /// The in-memory state only changes if the file write succeeds.
    pub fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write();
        let mut next = data.clone();
        let ops = batch.len();
        for (key, value) in batch.ops {
            match value {
                Some(value) => {
                    next.insert(key, value);
                }
                None => {
                    next.remove(&key);
                }
            }
        }
        self.persist(&next)?;
        *data = next;
        tracing::trace!(ops, "applied write batch");
        Ok(())
    }

    /// Whether a value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    fn persist(&self, data: &serde_json::Map<String, serde_json::Value>) -> Result<(), StorageError> {
        let data_file = self.path.join(STATE_FILE);
        let tmp_file = self.path.join(format!("{}.tmp", STATE_FILE));
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        fs::write(&tmp_file, content)?;
        fs::rename(&tmp_file, &data_file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        votes: u64,
    }

    #[test]
    fn test_store_creation() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();
        assert!(!store.contains("party"));
        // state.json is only created on first write
        assert!(!temp_dir.path().join(STATE_FILE).exists());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();

        let value = Sample { name: "alpha".to_string(), votes: 3 };
        store.save("sample", &value).unwrap();

        let loaded: Option<Sample> = store.load("sample").unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn test_load_missing_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();
        let loaded: Option<Sample> = store.load("nope").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = StateStore::open(temp_dir.path()).unwrap();
            store.save("sample", &Sample { name: "beta".to_string(), votes: 9 }).unwrap();
        }
        {
            let store = StateStore::open(temp_dir.path()).unwrap();
            let loaded: Sample = store.load("sample").unwrap().unwrap();
            assert_eq!(loaded.votes, 9);
        }
        assert!(!temp_dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();
        store.save("k", &1u32).unwrap();
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_write_batch_applies_together() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = StateStore::open(temp_dir.path()).unwrap();
            store.save("old", &1u32).unwrap();

            let mut batch = WriteBatch::new();
            batch.put("a", &Sample { name: "a".to_string(), votes: 1 }).unwrap();
            batch.put("b", &2u32).unwrap();
            batch.delete("old");
            store.write_batch(batch).unwrap();
        }

        let store = StateStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.load::<u32>("b").unwrap(), Some(2));
        assert_eq!(store.load::<Sample>("a").unwrap().unwrap().votes, 1);
        assert!(!store.contains("old"));
    }

    #[test]
    fn test_failed_batch_leaves_store_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("party");
        let store = StateStore::open(&dir).unwrap();
        store.save("kept", &1u32).unwrap();

        // no directory to write into
        fs::remove_dir_all(&dir).unwrap();
        let mut batch = WriteBatch::new();
        batch.put("new", &2u32).unwrap();
        batch.delete("kept");
        assert!(store.write_batch(batch).is_err());

        assert!(store.contains("kept"));
        assert!(!store.contains("new"));
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();
        store.save("k", &"text").unwrap();
        let err = store.load::<Sample>("k").unwrap_err();
        assert!(err.to_string().contains("'k'"));
    }

    #[test]
    fn test_rejects_traversal_path() {
        assert!(matches!(
            StateStore::open(Path::new("../escape")),
            Err(StorageError::InvalidPath(_))
        ));
    }
}
