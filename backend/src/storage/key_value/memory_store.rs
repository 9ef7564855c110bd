use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::broadcast;

use super::{KeyValueStore, CHANGE_CHANNEL_CAPACITY};
use crate::error::StoreError;

struct Inner {
    values: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<String>,
}

/// In-process key-value store. Clones share data and notifications, like two
/// tabs over the same local storage.
#[derive(Clone)]
pub struct InMemoryKeyValueStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                values: Mutex::new(HashMap::new()),
                changes,
            }),
        }
    }
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> Result<MutexGuard<'_, HashMap<String, Value>>, StoreError> {
        self.inner
            .values
            .lock()
            .map_err(|_| StoreError::Unavailable("key-value store lock poisoned".to_string()))
    }

    fn notify(&self, key: &str) {
        // No receivers is fine.
        let _ = self.inner.changes.send(key.to_string());
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values()?.insert(key.to_string(), value);
        self.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        if self.values()?.remove(key).is_some() {
            self.notify(key);
        }
        Ok(())
    }

    fn compare_and_set(&self, key: &str, expected: Option<&Value>, value: Value) -> Result<bool, StoreError> {
        {
            let mut values = self.values()?;
            if values.get(key) != expected {
                return Ok(false);
            }
            values.insert(key.to_string(), value);
        }
        self.notify(key);
        Ok(true)
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<String> {
        self.inner.changes.subscribe()
    }
}
