//! Error types shared across the ledger core.
//!
//! Validation problems are never raised through these types; validators return
//! `FieldValidation` values instead. These errors cover the repository contract
//! and the storage collaborators behind it.

use crate::domain::month_closure::ClosureError;
use thiserror::Error;

/// Failures reported by a storage collaborator (document store or key-value store)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Batch of {size} writes exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error("Settings revision conflict (expected {expected}, found {actual})")]
    RevisionConflict { expected: u64, actual: u64 },
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stored data could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by repository operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("Payer could not be resolved: {0}")]
    InvalidPayer(String),
    #[error("Expense not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Closure(#[from] ClosureError),
    #[error("Export failed for {} record(s): {}", .0.len(), .0.join("; "))]
    Export(Vec<String>),
    #[error("Import stopped after committing {committed} of {total} expenses: {message}")]
    PartialImport {
        committed: usize,
        total: usize,
        message: String,
    },
    #[error("Import payload is not usable: {0}")]
    InvalidPayload(String),
    #[error("Settings were changed concurrently (expected revision {expected}, found {actual})")]
    RevisionConflict { expected: u64, actual: u64 },
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::RevisionConflict { expected, actual } => {
                LedgerError::RevisionConflict { expected, actual }
            }
            other => LedgerError::Store(other),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(error: serde_json::Error) -> Self {
        LedgerError::Store(StoreError::Serialization(error))
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
