use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;
use shared::{ImportOptions, MonthKey, MonthlyBudgets, Preferences, Settings, Snapshot};

use super::{BatchOperation, DocumentKind, DocumentStore, StoredDocument};
use crate::config::LedgerConfig;
use crate::domain::commands::expenses::{SaveExpenseCommand, SaveExpenseResult};
use crate::domain::commands::import::ImportOutcome;
use crate::domain::commands::settings::{
    CloseMonthCommand, ReopenMonthCommand, SaveDisplayNamesCommand, SaveSettlementCommand,
};
use crate::domain::expense_service::prepare_expense;
use crate::domain::import_service::{commit_in_chunks, prepare_import};
use crate::domain::month_closure::{close_month, guard_month_mutation, reopen_month};
use crate::domain::normalizers::{
    normalize_budgets, normalize_settings, normalize_snapshot, stored_expense_date,
};
use crate::domain::settings_service::{
    apply_display_names, apply_settlement_completion, clear_settlement_completion,
    stamp_settings_write, validate_budget_ceilings, SettingsUpdate,
};
use crate::error::{LedgerError, LedgerResult, StoreError};
use crate::storage::local_today;
use crate::storage::traits::{ErrorCallback, LedgerRepository, SnapshotCallback, Subscription};

/// Settings writes retried once on a revision conflict
const SETTINGS_WRITE_ATTEMPTS: usize = 2;

pub struct DocumentLedgerRepository {
    store: Arc<dyn DocumentStore>,
    account_id: String,
    max_chunk_size: usize,
}

impl DocumentLedgerRepository {
    pub fn new(store: Arc<dyn DocumentStore>, account_id: impl Into<String>, config: &LedgerConfig) -> Self {
        Self {
            store,
            account_id: account_id.into(),
            max_chunk_size: config.effective_chunk_size(),
        }
    }

    async fn read_settings(&self) -> LedgerResult<Settings> {
        let raw = self.store.get_document(&self.account_id, DocumentKind::Settings).await?;
        Ok(raw.as_ref().map(normalize_settings).unwrap_or_else(|| normalize_settings(&Value::Null)))
    }

    async fn read_budgets(&self) -> LedgerResult<MonthlyBudgets> {
        let raw = self.store.get_document(&self.account_id, DocumentKind::Budgets).await?;
        Ok(raw.as_ref().map(normalize_budgets).unwrap_or_default())
    }

    async fn write_budgets(&self, budgets: &MonthlyBudgets) -> LedgerResult<()> {
        let operation = BatchOperation::SetDocument {
            kind: DocumentKind::Budgets,
            data: serde_json::to_value(budgets)?,
        };
        self.store.commit_batch(&self.account_id, vec![operation]).await?;
        Ok(())
    }

    /// Read, modify and write the settings aggregate with a revision check
    async fn update_settings(&self, action: &str, update: &SettingsUpdate<'_>) -> LedgerResult<Snapshot> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.load_snapshot().await?;
            let mut settings = current.settings;
            let expected_revision = settings.meta.data_revision;

            update(&mut settings, &current.expenses)?;
            stamp_settings_write(&mut settings, Utc::now());
            let data = serde_json::to_value(&settings)?;

            match self
                .store
                .set_settings_checked(&self.account_id, data, expected_revision)
                .await
            {
                Ok(()) => {
                    info!(
                        "⚙️ SETTINGS: {} saved (revision {})",
                        action, settings.meta.data_revision
                    );
                    return self.load_snapshot().await;
                }
                Err(StoreError::RevisionConflict { expected, actual }) if attempt < SETTINGS_WRITE_ATTEMPTS => {
                    warn!(
                        "⚠️ SETTINGS: {} hit a concurrent write (expected revision {}, found {}), retrying",
                        action, expected, actual
                    );
                }
                Err(e) => {
                    warn!("❌ SETTINGS: {} failed: {}", action, e);
                    return Err(e.into());
                }
            }
        }
    }
}

/// Store one pushed value; errors go to `on_error` and leave the slot as is
fn absorb<T>(message: Result<T, StoreError>, slot: &mut Option<T>, on_error: &ErrorCallback) -> bool {
    match message {
        Ok(value) => {
            *slot = Some(value);
            true
        }
        Err(e) => {
            warn!("❌ SUBSCRIBE: document store error: {}", e);
            on_error(e.into());
            false
        }
    }
}

#[async_trait]
impl LedgerRepository for DocumentLedgerRepository {
    fn backend_name(&self) -> &'static str {
        "document"
    }

    fn subscribe(&self, on_data: SnapshotCallback, on_error: ErrorCallback) -> Subscription {
        let mut expenses_rx = self.store.watch_expenses(&self.account_id);
        let mut settings_rx = self.store.watch_document(&self.account_id, DocumentKind::Settings);
        let mut budgets_rx = self.store.watch_document(&self.account_id, DocumentKind::Budgets);
        let account_id = self.account_id.clone();

        let task = tokio::spawn(async move {
            let mut expenses: Option<Vec<StoredDocument>> = None;
            let mut settings: Option<Option<Value>> = None;
            let mut budgets: Option<Option<Value>> = None;

            loop {
                let changed = tokio::select! {
                    Some(message) = expenses_rx.recv() => absorb(message, &mut expenses, &on_error),
                    Some(message) = settings_rx.recv() => absorb(message, &mut settings, &on_error),
                    Some(message) = budgets_rx.recv() => absorb(message, &mut budgets, &on_error),
                    else => break,
                };
                if !changed {
                    continue;
                }
                // Nothing is emitted until every stream has delivered once.
                if let (Some(expenses), Some(settings), Some(budgets)) = (&expenses, &settings, &budgets) {
                    let snapshot = normalize_snapshot(
                        expenses.iter().map(|doc| (doc.id.as_str(), &doc.data)),
                        settings.as_ref(),
                        budgets.as_ref(),
                    );
                    on_data(snapshot);
                }
            }
            debug!("SUBSCRIBE: document streams for {} closed", account_id);
        });
        Subscription::new(task)
    }

    async fn load_snapshot(&self) -> LedgerResult<Snapshot> {
        let expenses = self.store.list_expenses(&self.account_id).await?;
        let settings = self.store.get_document(&self.account_id, DocumentKind::Settings).await?;
        let budgets = self.store.get_document(&self.account_id, DocumentKind::Budgets).await?;
        Ok(normalize_snapshot(
            expenses.iter().map(|doc| (doc.id.as_str(), &doc.data)),
            settings.as_ref(),
            budgets.as_ref(),
        ))
    }

    async fn save_expense(&self, command: SaveExpenseCommand) -> LedgerResult<SaveExpenseResult> {
        let expense = prepare_expense(&command, local_today(), Utc::now())?;
        if let Some(existing) = &command.existing {
            if self.store.get_expense(&self.account_id, &existing.id).await?.is_none() {
                warn!("❌ EXPENSE: cannot update missing expense {}", existing.id);
                return Err(LedgerError::NotFound(existing.id.clone()));
            }
        }

        let operation = BatchOperation::SetExpense {
            id: expense.id.clone(),
            data: serde_json::to_value(&expense)?,
        };
        self.store.commit_batch(&self.account_id, vec![operation]).await?;
        info!(
            "💾 EXPENSE: saved {} ({} on {})",
            expense.id, expense.amount, expense.date
        );

        let snapshot = self.load_snapshot().await?;
        Ok(SaveExpenseResult { expense, snapshot })
    }

    async fn delete_expense(&self, id: &str) -> LedgerResult<Snapshot> {
        let Some(raw) = self.store.get_expense(&self.account_id, id).await? else {
            return Err(LedgerError::NotFound(id.to_string()));
        };
        let settings = self.read_settings().await?;
        guard_month_mutation(&settings, stored_expense_date(&raw))?;

        let operation = BatchOperation::DeleteExpense { id: id.to_string() };
        self.store.commit_batch(&self.account_id, vec![operation]).await?;
        info!("🗑️ EXPENSE: deleted {}", id);
        self.load_snapshot().await
    }

    async fn save_display_names(&self, command: SaveDisplayNamesCommand) -> LedgerResult<Snapshot> {
        self.update_settings("display names", &|settings, _| apply_display_names(settings, &command))
            .await
    }

    async fn save_settlement_completion(&self, command: SaveSettlementCommand) -> LedgerResult<Snapshot> {
        let now = Utc::now();
        self.update_settings("settlement", &|settings, _| {
            apply_settlement_completion(settings, &command, now)
        })
        .await
    }

    async fn clear_settlement_completion(&self, month: MonthKey) -> LedgerResult<Snapshot> {
        self.update_settings("settlement clear", &|settings, _| {
            clear_settlement_completion(settings, month);
            Ok(())
        })
        .await
    }

    async fn save_budgets(&self, month: MonthKey, ceilings: BTreeMap<String, i64>) -> LedgerResult<Snapshot> {
        let ceilings = validate_budget_ceilings(&ceilings)?;
        let mut budgets = self.read_budgets().await?;
        budgets.insert(month, ceilings);
        self.write_budgets(&budgets).await?;
        info!("💰 BUDGET: saved ceilings for {}", month);
        self.load_snapshot().await
    }

    async fn save_month_closure(&self, command: CloseMonthCommand) -> LedgerResult<Snapshot> {
        let now = Utc::now();
        self.update_settings("month close", &|settings, expenses| {
            close_month(settings, expenses, command.month, command.closed_by.as_deref(), now)?;
            Ok(())
        })
        .await
    }

    async fn reopen_month(&self, command: ReopenMonthCommand) -> LedgerResult<Snapshot> {
        let now = Utc::now();
        self.update_settings("month reopen", &|settings, _| {
            reopen_month(settings, command.month, &command.reason, now)?;
            Ok(())
        })
        .await
    }

    async fn save_preferences(&self, preferences: Preferences) -> LedgerResult<Snapshot> {
        self.update_settings("preferences", &|settings, _| {
            settings.preferences = preferences.clone();
            Ok(())
        })
        .await
    }

    async fn import_data(&self, payload: &Value, options: &ImportOptions) -> LedgerResult<ImportOutcome> {
        let current = self.load_snapshot().await?;
        let options = ImportOptions {
            chunk_size: options.chunk_size.min(self.max_chunk_size),
            ..options.clone()
        };
        let plan = prepare_import(payload, &current, &options, local_today(), Utc::now())?;
        if options.dry_run {
            info!(
                "📥 IMPORT: dry run found {} to import, {} duplicate(s), {} error(s)",
                plan.summary.imported_count,
                plan.summary.duplicate_count,
                plan.summary.errors.len()
            );
            return Ok(ImportOutcome {
                summary: plan.summary,
                snapshot: current,
            });
        }

        let store = Arc::clone(&self.store);
        let account_id = self.account_id.clone();
        commit_in_chunks(&plan.expenses, plan.chunk_size, move |chunk| {
            let store = Arc::clone(&store);
            let account_id = account_id.clone();
            async move {
                let operations = chunk
                    .iter()
                    .map(|expense| -> Result<BatchOperation, StoreError> {
                        Ok(BatchOperation::SetExpense {
                            id: expense.id.clone(),
                            data: serde_json::to_value(expense)?,
                        })
                    })
                    .collect::<Result<Vec<_>, StoreError>>()?;
                store.commit_batch(&account_id, operations).await
            }
        })
        .await?;

        if plan.settings_changed {
            let learned = &plan.settings.payer_aliases;
            self.update_settings("import aliases", &|settings, _| {
                for (name, payer) in learned {
                    settings.payer_aliases.entry(name.clone()).or_insert(*payer);
                }
                Ok(())
            })
            .await?;
        }
        if plan.budgets_changed {
            let mut budgets = self.read_budgets().await?;
            for (month, ceilings) in &plan.budgets {
                budgets.entry(*month).or_insert_with(|| ceilings.clone());
            }
            self.write_budgets(&budgets).await?;
        }

        Ok(ImportOutcome {
            summary: plan.summary,
            snapshot: self.load_snapshot().await?,
        })
    }
}
