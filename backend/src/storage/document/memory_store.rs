//! In-process [`DocumentStore`] with live watches.
//!
//! Used as the document backend when no remote store is configured and by
//! tests, which can make batches or reads fail on demand.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{BatchOperation, DocumentKind, DocumentStore, DocumentStream, ExpenseStream, StoredDocument};
use crate::config::MAX_BATCH_SIZE;
use crate::error::StoreError;
use crate::storage::stored_revision;

type ExpenseSender = mpsc::UnboundedSender<Result<Vec<StoredDocument>, StoreError>>;
type DocumentSender = mpsc::UnboundedSender<Result<Option<Value>, StoreError>>;

#[derive(Debug, Default)]
struct AccountData {
    expenses: BTreeMap<String, Value>,
    settings: Option<Value>,
    budgets: Option<Value>,
}

impl AccountData {
    fn expense_list(&self) -> Vec<StoredDocument> {
        self.expenses
            .iter()
            .map(|(id, data)| StoredDocument {
                id: id.clone(),
                data: data.clone(),
            })
            .collect()
    }

    fn document(&self, kind: DocumentKind) -> Option<Value> {
        match kind {
            DocumentKind::Settings => self.settings.clone(),
            DocumentKind::Budgets => self.budgets.clone(),
        }
    }
}

#[derive(Default)]
struct StoreState {
    accounts: HashMap<String, AccountData>,
    expense_watchers: HashMap<String, Vec<ExpenseSender>>,
    document_watchers: HashMap<(String, DocumentKind), Vec<DocumentSender>>,
    committed_batches: Vec<usize>,
    successful_batches_left: Option<usize>,
    unavailable: bool,
}

impl StoreState {
    fn account(&self, account_id: &str) -> Option<&AccountData> {
        self.accounts.get(account_id)
    }

    fn notify_expenses(&mut self, account_id: &str) {
        let list = self
            .accounts
            .get(account_id)
            .map(AccountData::expense_list)
            .unwrap_or_default();
        if let Some(watchers) = self.expense_watchers.get_mut(account_id) {
            watchers.retain(|tx| tx.send(Ok(list.clone())).is_ok());
        }
    }

    fn notify_document(&mut self, account_id: &str, kind: DocumentKind) {
        let value = self.accounts.get(account_id).and_then(|a| a.document(kind));
        if let Some(watchers) = self.document_watchers.get_mut(&(account_id.to_string(), kind)) {
            watchers.retain(|tx| tx.send(Ok(value.clone())).is_ok());
        }
    }
}

/// Shared-state store; clones see the same data
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("document store lock poisoned".to_string()))
    }

    /// Let `count` more batches succeed, then fail every later one
    pub fn fail_batches_after(&self, count: usize) {
        if let Ok(mut state) = self.lock() {
            state.successful_batches_left = Some(count);
        }
    }

    /// Clear any injected batch failure
    pub fn restore_batches(&self) {
        if let Ok(mut state) = self.lock() {
            state.successful_batches_left = None;
        }
    }

    /// Make reads and writes fail with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.lock() {
            state.unavailable = unavailable;
        }
    }

    /// Operation counts of every committed batch, in commit order
    pub fn committed_batch_sizes(&self) -> Vec<usize> {
        self.lock().map(|s| s.committed_batches.clone()).unwrap_or_default()
    }

    /// Push a permission failure to every watcher of `account_id`
    pub fn revoke_access(&self, account_id: &str, message: &str) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        if let Some(watchers) = state.expense_watchers.get_mut(account_id) {
            watchers.retain(|tx| tx.send(Err(StoreError::PermissionDenied(message.to_string()))).is_ok());
        }
        for ((account, _), watchers) in state.document_watchers.iter_mut() {
            if account == account_id {
                watchers.retain(|tx| tx.send(Err(StoreError::PermissionDenied(message.to_string()))).is_ok());
            }
        }
    }

    fn ensure_available(state: &StoreState) -> Result<(), StoreError> {
        if state.unavailable {
            Err(StoreError::Unavailable("document store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn list_expenses(&self, account_id: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let state = self.lock()?;
        Self::ensure_available(&state)?;
        Ok(state.account(account_id).map(AccountData::expense_list).unwrap_or_default())
    }

    async fn get_expense(&self, account_id: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let state = self.lock()?;
        Self::ensure_available(&state)?;
        Ok(state.account(account_id).and_then(|a| a.expenses.get(id).cloned()))
    }

    async fn get_document(&self, account_id: &str, kind: DocumentKind) -> Result<Option<Value>, StoreError> {
        let state = self.lock()?;
        Self::ensure_available(&state)?;
        Ok(state.account(account_id).and_then(|a| a.document(kind)))
    }

    async fn commit_batch(&self, account_id: &str, operations: Vec<BatchOperation>) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        Self::ensure_available(&state)?;
        if operations.len() > MAX_BATCH_SIZE {
            return Err(StoreError::BatchTooLarge {
                size: operations.len(),
                limit: MAX_BATCH_SIZE,
            });
        }
        match state.successful_batches_left {
            Some(0) => {
                warn!("Document store rejecting batch of {} (injected failure)", operations.len());
                return Err(StoreError::Unavailable("batch commit failed".to_string()));
            }
            Some(left) => state.successful_batches_left = Some(left - 1),
            None => {}
        }

        let size = operations.len();
        let (mut expenses_changed, mut settings_changed, mut budgets_changed) = (false, false, false);
        let account = state.accounts.entry(account_id.to_string()).or_default();
        for operation in operations {
            match operation {
                BatchOperation::SetExpense { id, data } => {
                    account.expenses.insert(id, data);
                    expenses_changed = true;
                }
                BatchOperation::DeleteExpense { id } => {
                    expenses_changed |= account.expenses.remove(&id).is_some();
                }
                BatchOperation::SetDocument { kind: DocumentKind::Settings, data } => {
                    account.settings = Some(data);
                    settings_changed = true;
                }
                BatchOperation::SetDocument { kind: DocumentKind::Budgets, data } => {
                    account.budgets = Some(data);
                    budgets_changed = true;
                }
            }
        }
        state.committed_batches.push(size);
        debug!("Document store committed batch of {} for {}", size, account_id);

        if expenses_changed {
            state.notify_expenses(account_id);
        }
        if settings_changed {
            state.notify_document(account_id, DocumentKind::Settings);
        }
        if budgets_changed {
            state.notify_document(account_id, DocumentKind::Budgets);
        }
        Ok(())
    }

    async fn set_settings_checked(
        &self,
        account_id: &str,
        data: Value,
        expected_revision: u64,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        Self::ensure_available(&state)?;
        let account = state.accounts.entry(account_id.to_string()).or_default();
        let actual = stored_revision(account.settings.as_ref());
        if actual != expected_revision {
            return Err(StoreError::RevisionConflict {
                expected: expected_revision,
                actual,
            });
        }
        account.settings = Some(data);
        state.notify_document(account_id, DocumentKind::Settings);
        Ok(())
    }

    fn watch_expenses(&self, account_id: &str) -> ExpenseStream {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.lock() {
            Ok(mut state) => {
                let initial = state.account(account_id).map(AccountData::expense_list).unwrap_or_default();
                if tx.send(Ok(initial)).is_ok() {
                    state.expense_watchers.entry(account_id.to_string()).or_default().push(tx);
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
            }
        }
        rx
    }

    fn watch_document(&self, account_id: &str, kind: DocumentKind) -> DocumentStream {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.lock() {
            Ok(mut state) => {
                let initial = state.account(account_id).and_then(|a| a.document(kind));
                if tx.send(Ok(initial)).is_ok() {
                    state
                        .document_watchers
                        .entry((account_id.to_string(), kind))
                        .or_default()
                        .push(tx);
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
            }
        }
        rx
    }
}
