use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use shared::{Expense, ImportOptions, MonthKey, MonthlyBudgets, Preferences, Snapshot};
use tokio::sync::broadcast::error::RecvError;

use super::{KeyValueStore, StorageKeys};
use crate::config::LedgerConfig;
use crate::domain::commands::expenses::{SaveExpenseCommand, SaveExpenseResult};
use crate::domain::commands::import::ImportOutcome;
use crate::domain::commands::settings::{
    CloseMonthCommand, ReopenMonthCommand, SaveDisplayNamesCommand, SaveSettlementCommand,
};
use crate::domain::expense_service::prepare_expense;
use crate::domain::import_service::{commit_in_chunks, prepare_import};
use crate::domain::month_closure::{close_month, guard_month_mutation, reopen_month};
use crate::domain::normalizers::{normalize_budgets, normalize_snapshot, stored_expense_date};
use crate::domain::settings_service::{
    apply_display_names, apply_settlement_completion, clear_settlement_completion,
    stamp_settings_write, validate_budget_ceilings, SettingsUpdate,
};
use crate::error::{LedgerError, LedgerResult, StoreError};
use crate::storage::traits::{ErrorCallback, LedgerRepository, SnapshotCallback, Subscription};
use crate::storage::{local_today, stored_revision};

/// Compare-and-set writes are retried once before giving up
const WRITE_ATTEMPTS: usize = 2;

pub struct KeyValueLedgerRepository {
    store: Arc<dyn KeyValueStore>,
    keys: StorageKeys,
    max_chunk_size: usize,
}

/// The expenses value as an id-keyed map. Older data stored a plain array of
/// expenses carrying their own `id`.
fn expense_map(raw: Option<Value>) -> Map<String, Value> {
    match raw {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| {
                let id = item.get("id").and_then(Value::as_str)?.to_string();
                Some((id, item))
            })
            .collect(),
        Some(_) => {
            warn!("⚠️ KV: expenses value has an unexpected shape, treating it as empty");
            Map::new()
        }
    }
}

fn read_snapshot(store: &dyn KeyValueStore, keys: &StorageKeys, settings: Option<&Value>) -> Result<Snapshot, StoreError> {
    let expenses = expense_map(store.get(&keys.expenses)?);
    let budgets = store.get(&keys.budgets)?;
    Ok(normalize_snapshot(
        expenses.iter().map(|(id, raw)| (id.as_str(), raw)),
        settings,
        budgets.as_ref(),
    ))
}

/// Apply `update` to the expenses map and write it back with compare-and-set
fn update_expenses<E>(
    store: &dyn KeyValueStore,
    key: &str,
    update: impl Fn(&mut Map<String, Value>) -> Result<(), E>,
) -> Result<(), E>
where
    E: From<StoreError>,
{
    for attempt in 1..=WRITE_ATTEMPTS {
        let current = store.get(key)?;
        let mut map = expense_map(current.clone());
        update(&mut map)?;
        if store.compare_and_set(key, current.as_ref(), Value::Object(map))? {
            return Ok(());
        }
        warn!("⚠️ KV: {} changed during write (attempt {})", key, attempt);
    }
    Err(StoreError::Unavailable(format!("{} kept changing during the write", key)).into())
}

fn insert_expenses(store: &dyn KeyValueStore, key: &str, chunk: &[Expense]) -> Result<(), StoreError> {
    update_expenses::<StoreError>(store, key, |map| {
        for expense in chunk {
            map.insert(expense.id.clone(), serde_json::to_value(expense)?);
        }
        Ok(())
    })
}

fn emit_snapshot(store: &dyn KeyValueStore, keys: &StorageKeys, on_data: &SnapshotCallback, on_error: &ErrorCallback) {
    let snapshot = store
        .get(&keys.settings)
        .and_then(|settings| read_snapshot(store, keys, settings.as_ref()));
    match snapshot {
        Ok(snapshot) => on_data(snapshot),
        Err(e) => {
            warn!("❌ SUBSCRIBE: key-value read failed: {}", e);
            on_error(e.into());
        }
    }
}

impl KeyValueLedgerRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, account_id: &str, config: &LedgerConfig) -> Self {
        Self {
            store,
            keys: StorageKeys::for_account(account_id),
            max_chunk_size: config.effective_chunk_size(),
        }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    fn snapshot(&self) -> LedgerResult<Snapshot> {
        let settings = self.store.get(&self.keys.settings)?;
        Ok(read_snapshot(&*self.store, &self.keys, settings.as_ref())?)
    }

    fn read_budgets(&self) -> LedgerResult<MonthlyBudgets> {
        Ok(self
            .store
            .get(&self.keys.budgets)?
            .as_ref()
            .map(normalize_budgets)
            .unwrap_or_default())
    }

    fn write_budgets(&self, budgets: &MonthlyBudgets) -> LedgerResult<()> {
        self.store.set(&self.keys.budgets, serde_json::to_value(budgets)?)?;
        Ok(())
    }

    /// Read, modify and write the settings value; the raw value read is the
    /// compare-and-set expectation
    fn update_settings(&self, action: &str, update: &SettingsUpdate<'_>) -> LedgerResult<Snapshot> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let raw = self.store.get(&self.keys.settings)?;
            let current = read_snapshot(&*self.store, &self.keys, raw.as_ref())?;
            let mut settings = current.settings;
            let expected = settings.meta.data_revision;

            update(&mut settings, &current.expenses)?;
            stamp_settings_write(&mut settings, Utc::now());
            let next = serde_json::to_value(&settings)?;

            if self.store.compare_and_set(&self.keys.settings, raw.as_ref(), next)? {
                info!(
                    "⚙️ SETTINGS: {} saved (revision {})",
                    action, settings.meta.data_revision
                );
                return self.snapshot();
            }

            let actual = stored_revision(self.store.get(&self.keys.settings)?.as_ref());
            if attempt >= WRITE_ATTEMPTS {
                warn!("❌ SETTINGS: {} lost to a concurrent write twice", action);
                return Err(LedgerError::RevisionConflict { expected, actual });
            }
            warn!(
                "⚠️ SETTINGS: {} hit a concurrent write (expected revision {}, found {}), retrying",
                action, expected, actual
            );
        }
    }
}

#[async_trait]
impl LedgerRepository for KeyValueLedgerRepository {
    fn backend_name(&self) -> &'static str {
        "key_value"
    }

    fn subscribe(&self, on_data: SnapshotCallback, on_error: ErrorCallback) -> Subscription {
        let mut changes = self.store.subscribe_changes();
        let store = Arc::clone(&self.store);
        let keys = self.keys.clone();

        let task = tokio::spawn(async move {
            emit_snapshot(&*store, &keys, &on_data, &on_error);
            loop {
                match changes.recv().await {
                    Ok(key) if keys.contains(&key) => emit_snapshot(&*store, &keys, &on_data, &on_error),
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        debug!("SUBSCRIBE: missed {} change notification(s), re-reading", missed);
                        emit_snapshot(&*store, &keys, &on_data, &on_error);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("SUBSCRIBE: change channel for {} closed", keys.expenses);
        });
        Subscription::new(task)
    }

    async fn load_snapshot(&self) -> LedgerResult<Snapshot> {
        self.snapshot()
    }

    async fn save_expense(&self, command: SaveExpenseCommand) -> LedgerResult<SaveExpenseResult> {
        let expense = prepare_expense(&command, local_today(), Utc::now())?;
        let data = serde_json::to_value(&expense)?;
        let existing_id = command.existing.as_ref().map(|e| e.id.as_str());

        update_expenses::<LedgerError>(&*self.store, &self.keys.expenses, |map| {
            if let Some(id) = existing_id {
                if !map.contains_key(id) {
                    return Err(LedgerError::NotFound(id.to_string()));
                }
            }
            map.insert(expense.id.clone(), data.clone());
            Ok(())
        })
        .inspect_err(|e| warn!("❌ EXPENSE: save failed: {}", e))?;
        info!(
            "💾 EXPENSE: saved {} ({} on {})",
            expense.id, expense.amount, expense.date
        );

        let snapshot = self.snapshot()?;
        Ok(SaveExpenseResult { expense, snapshot })
    }

    async fn delete_expense(&self, id: &str) -> LedgerResult<Snapshot> {
        let settings = self.snapshot()?.settings;
        update_expenses::<LedgerError>(&*self.store, &self.keys.expenses, |map| {
            let raw = map.get(id).ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
            guard_month_mutation(&settings, stored_expense_date(raw))?;
            map.remove(id);
            Ok(())
        })?;
        info!("🗑️ EXPENSE: deleted {}", id);
        self.snapshot()
    }

    async fn save_display_names(&self, command: SaveDisplayNamesCommand) -> LedgerResult<Snapshot> {
        self.update_settings("display names", &|settings, _| apply_display_names(settings, &command))
    }

    async fn save_settlement_completion(&self, command: SaveSettlementCommand) -> LedgerResult<Snapshot> {
        let now = Utc::now();
        self.update_settings("settlement", &|settings, _| {
            apply_settlement_completion(settings, &command, now)
        })
    }

    async fn clear_settlement_completion(&self, month: MonthKey) -> LedgerResult<Snapshot> {
        self.update_settings("settlement clear", &|settings, _| {
            clear_settlement_completion(settings, month);
            Ok(())
        })
    }

    async fn save_budgets(&self, month: MonthKey, ceilings: BTreeMap<String, i64>) -> LedgerResult<Snapshot> {
        let ceilings = validate_budget_ceilings(&ceilings)?;
        let mut budgets = self.read_budgets()?;
        budgets.insert(month, ceilings);
        self.write_budgets(&budgets)?;
        info!("💰 BUDGET: saved ceilings for {}", month);
        self.snapshot()
    }

    async fn save_month_closure(&self, command: CloseMonthCommand) -> LedgerResult<Snapshot> {
        let now = Utc::now();
        self.update_settings("month close", &|settings, expenses| {
            close_month(settings, expenses, command.month, command.closed_by.as_deref(), now)?;
            Ok(())
        })
    }

    async fn reopen_month(&self, command: ReopenMonthCommand) -> LedgerResult<Snapshot> {
        let now = Utc::now();
        self.update_settings("month reopen", &|settings, _| {
            reopen_month(settings, command.month, &command.reason, now)?;
            Ok(())
        })
    }

    async fn save_preferences(&self, preferences: Preferences) -> LedgerResult<Snapshot> {
        self.update_settings("preferences", &|settings, _| {
            settings.preferences = preferences.clone();
            Ok(())
        })
    }

    async fn import_data(&self, payload: &Value, options: &ImportOptions) -> LedgerResult<ImportOutcome> {
        let current = self.snapshot()?;
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
        let key = self.keys.expenses.clone();
        commit_in_chunks(&plan.expenses, plan.chunk_size, move |chunk| {
            let result = insert_expenses(&*store, &key, &chunk);
            async move { result }
        })
        .await?;

        if plan.settings_changed {
            let learned = &plan.settings.payer_aliases;
            self.update_settings("import aliases", &|settings, _| {
                for (name, payer) in learned {
                    settings.payer_aliases.entry(name.clone()).or_insert(*payer);
                }
                Ok(())
            })?;
        }
        if plan.budgets_changed {
            let mut budgets = self.read_budgets()?;
            for (month, ceilings) in &plan.budgets {
                budgets.entry(*month).or_insert_with(|| ceilings.clone());
            }
            self.write_budgets(&budgets)?;
        }

        Ok(ImportOutcome {
            summary: plan.summary,
            snapshot: self.snapshot()?,
        })
    }
}
