//! # File Key-Value Store
//!
//! Persists each key as one pretty-printed JSON file in the data directory.
//!
//! ## File Structure
//!
//! ```text
//! Household Ledger/
//! ├── household-ledger_3Ahousehold_3Aexpenses.json
//! ├── household-ledger_3Ahousehold_3Asettings.json
//! └── household-ledger_3Ahousehold_3Abudgets.json
//! ```
//!
//! ASCII letters, digits and `-` are kept in file names; every other byte of
//! the key is written as `_` plus two hex digits, so distinct keys never share
//! a file.
//!
//! Writes go to a temp file that is then renamed over the target, so a crash
//! never leaves a half-written value behind. Compare-and-set is serialized
//! within this process only.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{debug, info};
use serde_json::Value;
use tokio::sync::broadcast;

use super::{KeyValueStore, CHANGE_CHANNEL_CAPACITY};
use crate::error::StoreError;

fn escape_key(key: &str) -> String {
    let mut file_name = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            file_name.push(char::from(byte));
        } else {
            file_name.push_str(&format!("_{:02X}", byte));
        }
    }
    file_name
}

pub struct FileKeyValueStore {
    base_directory: PathBuf,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<String>,
}

impl FileKeyValueStore {
    /// Open (and create if needed) a store rooted at `base_directory`
    pub fn open<P: AsRef<Path>>(base_directory: P) -> Result<Self, StoreError> {
        let base_directory = base_directory.as_ref().to_path_buf();
        if !base_directory.exists() {
            fs::create_dir_all(&base_directory)?;
            info!("Created ledger data directory: {:?}", base_directory);
        }
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            base_directory,
            write_lock: Mutex::new(()),
            changes,
        })
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_directory.join(format!("{}.json", escape_key(key)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("file store lock poisoned".to_string()))
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let content = serde_json::to_string_pretty(value)?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &path)?;

        debug!("Saved {} to {:?}", key, path);
        let _ = self.changes.send(key.to_string());
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.read(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        self.write(key, &value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path)?;
            let _ = self.changes.send(key.to_string());
        }
        Ok(())
    }

    fn compare_and_set(&self, key: &str, expected: Option<&Value>, value: Value) -> Result<bool, StoreError> {
        let _guard = self.lock()?;
        if self.read(key)?.as_ref() != expected {
            return Ok(false);
        }
        self.write(key, &value)?;
        Ok(true)
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_values_survive_reopening() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("ledger");

        let store = FileKeyValueStore::open(&data_dir).unwrap();
        store.set("household-ledger:home:settings", json!({"a": 1})).unwrap();
        assert!(data_dir.join("household-ledger_3Ahome_3Asettings.json").exists());
        assert!(!data_dir.join("household-ledger_3Ahome_3Asettings.json.tmp").exists());

        let reopened = FileKeyValueStore::open(&data_dir).unwrap();
        assert_eq!(reopened.get("household-ledger:home:settings").unwrap(), Some(json!({"a": 1})));
        assert_eq!(reopened.get("household-ledger:home:budgets").unwrap(), None);
    }

    #[test]
    fn test_keys_that_differ_only_in_punctuation_keep_separate_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::open(temp_dir.path()).unwrap();

        store.set("a:b", json!("colon")).unwrap();
        store.set("a_b", json!("underscore")).unwrap();
        store.set("a_3Ab", json!("escaped lookalike")).unwrap();

        assert_eq!(store.get("a:b").unwrap(), Some(json!("colon")));
        assert_eq!(store.get("a_b").unwrap(), Some(json!("underscore")));
        assert_eq!(store.get("a_3Ab").unwrap(), Some(json!("escaped lookalike")));
        assert_eq!(escape_key("家計:a"), "_E5_AE_B6_E8_A8_88_3Aa");
    }

    #[test]
    fn test_compare_and_set_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::open(temp_dir.path()).unwrap();

        assert!(store.compare_and_set("k", None, json!([1])).unwrap());
        assert!(!store.compare_and_set("k", Some(&json!([2])), json!([3])).unwrap());
        assert_eq!(store.get("k").unwrap(), Some(json!([1])));

        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::open(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("k.json"), "{not json").unwrap();
        assert!(matches!(store.get("k"), Err(StoreError::Serialization(_))));
    }
}
