//! # Storage Traits
//!
//! The repository contract every backend implements. Callers only ever see
//! `Arc<dyn LedgerRepository>`; which backend sits behind it is decided once,
//! by the factory in [`crate::storage`].
//!
//! Every mutating operation returns the complete refreshed [`Snapshot`], never
//! a delta.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use shared::{
    BackupEnvelope, Expense, ImportOptions, ListOptions, MonthKey, Preferences, Snapshot,
};
use tokio::task::JoinHandle;

use crate::domain::commands::expenses::{SaveExpenseCommand, SaveExpenseResult};
use crate::domain::commands::import::ImportOutcome;
use crate::domain::commands::settings::{
    CloseMonthCommand, ReopenMonthCommand, SaveDisplayNamesCommand, SaveSettlementCommand,
};
use crate::domain::{export_service, listing};
use crate::error::{LedgerError, LedgerResult};

/// Receives every combined snapshot a subscription produces
pub type SnapshotCallback = Arc<dyn Fn(Snapshot) + Send + Sync>;

/// Receives backend failures (permission loss, unavailable store, ...)
pub type ErrorCallback = Arc<dyn Fn(LedgerError) + Send + Sync>;

/// Handle for a live subscription; delivery stops on `unsubscribe` or drop
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ledger, settings and budgets of one household account
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Short backend label for logs
    fn backend_name(&self) -> &'static str;

    /// Stream combined snapshots until the returned handle is dropped.
    /// Must be called from within a tokio runtime.
    fn subscribe(&self, on_data: SnapshotCallback, on_error: ErrorCallback) -> Subscription;

    /// One-shot read of the current snapshot
    async fn load_snapshot(&self) -> LedgerResult<Snapshot>;

    /// Create or update an expense; nothing is written unless the payer resolves
    async fn save_expense(&self, command: SaveExpenseCommand) -> LedgerResult<SaveExpenseResult>;

    async fn delete_expense(&self, id: &str) -> LedgerResult<Snapshot>;

    async fn save_display_names(&self, command: SaveDisplayNamesCommand) -> LedgerResult<Snapshot>;

    async fn save_settlement_completion(&self, command: SaveSettlementCommand) -> LedgerResult<Snapshot>;

    async fn clear_settlement_completion(&self, month: MonthKey) -> LedgerResult<Snapshot>;

    /// Replace the ceilings of one month
    async fn save_budgets(&self, month: MonthKey, ceilings: BTreeMap<String, i64>) -> LedgerResult<Snapshot>;

    async fn save_month_closure(&self, command: CloseMonthCommand) -> LedgerResult<Snapshot>;

    async fn reopen_month(&self, command: ReopenMonthCommand) -> LedgerResult<Snapshot>;

    async fn save_preferences(&self, preferences: Preferences) -> LedgerResult<Snapshot>;

    /// Validate, deduplicate and (unless `dry_run`) commit a backup payload
    async fn import_data(&self, payload: &Value, options: &ImportOptions) -> LedgerResult<ImportOutcome>;

    /// Build a backup from `snapshot`; pure, touches no storage
    fn export_data(&self, snapshot: &Snapshot) -> LedgerResult<BackupEnvelope> {
        export_service::export_data(snapshot, Utc::now())
    }

    /// Pure filter and sort over `expenses`; not a backend call
    fn list_by_month(&self, expenses: &[Expense], month: MonthKey, options: &ListOptions) -> Vec<Expense> {
        listing::list_by_month(expenses, month, options)
    }
}
