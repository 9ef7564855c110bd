//! # Key-Value Store Backend
//!
//! Local persistent backend. Each account keeps three JSON values:
//!
//! ```text
//! household-ledger:{account_id}:expenses   { "<id>": { ...expense... }, ... }
//! household-ledger:{account_id}:settings   the settings aggregate
//! household-ledger:{account_id}:budgets    month -> category -> ceiling
//! ```
//!
//! Stores announce every changed key on a broadcast channel so that other
//! handles on the same data ("tabs") can refresh.

pub mod file_store;
pub mod memory_store;
pub mod repository;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::StoreError;

pub use file_store::FileKeyValueStore;
pub use memory_store::InMemoryKeyValueStore;
pub use repository::KeyValueLedgerRepository;

/// Capacity of the change-notification channel
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Synchronous key-value persistence with change notifications
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Store `value` only if the current value equals `expected`
    /// (`None` meaning absent). Returns whether the write happened.
    fn compare_and_set(&self, key: &str, expected: Option<&Value>, value: Value) -> Result<bool, StoreError>;

    /// Receiver of changed keys, including changes made through other handles
    fn subscribe_changes(&self) -> broadcast::Receiver<String>;
}

/// The three keys of one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub expenses: String,
    pub settings: String,
    pub budgets: String,
}

impl StorageKeys {
    pub fn for_account(account_id: &str) -> Self {
        let prefix = format!("household-ledger:{}", account_id);
        Self {
            expenses: format!("{}:expenses", prefix),
            settings: format!("{}:settings", prefix),
            budgets: format!("{}:budgets", prefix),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        key == self.expenses || key == self.settings || key == self.budgets
    }
}
