//! # Storage Layer
//!
//! Two interchangeable persistence backends behind [`LedgerRepository`]:
//!
//! - [`document`]: a live document/collection store. Expenses are one
//!   document each; settings and budgets are single documents. The store
//!   pushes changes and writes go through atomic batches of at most 500
//!   operations.
//! - [`key_value`]: a local key-value store holding one JSON value per
//!   aggregate. Changes made through other handles on the same data are
//!   broadcast so open subscriptions refresh.
//!
//! Both backends share the pure normalization, validation and import logic
//! in [`crate::domain`]; they differ only in how raw values are read, written
//! and watched. The backend is chosen exactly once, when the repository is
//! created:
//!
//! ```no_run
//! # use household_ledger_backend::config::LedgerConfig;
//! # use household_ledger_backend::storage::from_config;
//! # fn main() -> anyhow::Result<()> {
//! let config = LedgerConfig::load_or_default("ledger.yaml")?;
//! let repository = from_config(&config)?;
//! println!("using the {} backend", repository.backend_name());
//! # Ok(())
//! # }
//! ```
//!
//! Settings writes carry `meta.dataRevision`; a write that finds another
//! revision than the one it read is retried once and then reported as
//! [`crate::error::LedgerError::RevisionConflict`].

pub mod document;
pub mod key_value;
pub mod traits;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use log::{info, warn};
use serde_json::Value;

use crate::config::{BackendKind, LedgerConfig};
use document::{DocumentLedgerRepository, DocumentStore, InMemoryDocumentStore};
use key_value::{FileKeyValueStore, KeyValueLedgerRepository, KeyValueStore};

pub use traits::{ErrorCallback, LedgerRepository, SnapshotCallback, Subscription};

/// A storage collaborator to build a repository over
#[derive(Clone)]
pub enum BackendSelection {
    Document(Arc<dyn DocumentStore>),
    KeyValue(Arc<dyn KeyValueStore>),
}

/// Build the repository for `account_id` over the selected store
pub fn create_repository(
    selection: BackendSelection,
    account_id: &str,
    config: &LedgerConfig,
) -> Arc<dyn LedgerRepository> {
    let repository: Arc<dyn LedgerRepository> = match selection {
        BackendSelection::Document(store) => Arc::new(DocumentLedgerRepository::new(store, account_id, config)),
        BackendSelection::KeyValue(store) => Arc::new(KeyValueLedgerRepository::new(store, account_id, config)),
    };
    info!(
        "🗄️ STORAGE: {} backend ready for account {}",
        repository.backend_name(),
        account_id
    );
    repository
}

/// Build the repository a configuration asks for.
///
/// The key-value backend persists under the configured data directory. No
/// remote document store is wired in here, so the document backend runs over
/// an in-process store; hosts with a real one call [`create_repository`].
pub fn from_config(config: &LedgerConfig) -> Result<Arc<dyn LedgerRepository>> {
    config.validate()?;
    let selection = match config.backend {
        BackendKind::KeyValue => {
            let directory = config.resolved_data_directory()?;
            let store = FileKeyValueStore::open(&directory)
                .with_context(|| format!("Failed to open ledger data directory {}", directory.display()))?;
            BackendSelection::KeyValue(Arc::new(store))
        }
        BackendKind::Document => {
            warn!("⚠️ STORAGE: no remote document store configured, data will not outlive this process");
            BackendSelection::Document(Arc::new(InMemoryDocumentStore::new()))
        }
    };
    Ok(create_repository(selection, &config.account_id, config))
}

/// Today's date in the local time zone, used as the validation reference
pub(crate) fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// `meta.dataRevision` of a raw settings value, 0 when missing
pub fn stored_revision(settings: Option<&Value>) -> u64 {
    settings
        .and_then(|s| s.pointer("/meta/dataRevision"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}
