//! # Document Store Backend
//!
//! Repository over a live document/collection store. Per household account the
//! store holds:
//!
//! ```text
//! accounts/{account_id}/expenses/{expense_id}   one document per expense
//! accounts/{account_id}/settings                the settings aggregate
//! accounts/{account_id}/budgets                 month -> category -> ceiling
//! ```
//!
//! The store pushes updates for all three independently; the repository
//! recombines the latest value of each into one snapshot per push.

pub mod memory_store;
pub mod repository;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::StoreError;

pub use memory_store::InMemoryDocumentStore;
pub use repository::DocumentLedgerRepository;

/// The single-document aggregates of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Settings,
    Budgets,
}

/// An expense document with its store-assigned id
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Value,
}

/// One write inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    SetExpense { id: String, data: Value },
    DeleteExpense { id: String },
    SetDocument { kind: DocumentKind, data: Value },
}

/// Live expense collection; every message is the full current collection
pub type ExpenseStream = mpsc::UnboundedReceiver<Result<Vec<StoredDocument>, StoreError>>;

/// Live single document; `None` while it does not exist
pub type DocumentStream = mpsc::UnboundedReceiver<Result<Option<Value>, StoreError>>;

/// Document/collection store collaborator.
///
/// Watches deliver the current value immediately, then one message per change.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_expenses(&self, account_id: &str) -> Result<Vec<StoredDocument>, StoreError>;

    async fn get_expense(&self, account_id: &str, id: &str) -> Result<Option<Value>, StoreError>;

    async fn get_document(&self, account_id: &str, kind: DocumentKind) -> Result<Option<Value>, StoreError>;

    /// Apply all operations atomically; at most 500 per call
    async fn commit_batch(&self, account_id: &str, operations: Vec<BatchOperation>) -> Result<(), StoreError>;

    /// Write the settings document only if its stored `meta.dataRevision`
    /// still equals `expected_revision` (0 when absent)
    async fn set_settings_checked(
        &self,
        account_id: &str,
        data: Value,
        expected_revision: u64,
    ) -> Result<(), StoreError>;

    fn watch_expenses(&self, account_id: &str) -> ExpenseStream;

    fn watch_document(&self, account_id: &str, kind: DocumentKind) -> DocumentStream;
}
