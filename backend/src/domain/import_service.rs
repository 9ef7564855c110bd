//! Backup import: planning and chunked commit.
//!
//! [`prepare_import`] does all of the work that needs no backend: envelope
//! decoding (current and legacy shapes), per-record validation, payer
//! resolution and fingerprint duplicate analysis. Its [`ImportPlan`] is the
//! dry-run result as-is. [`commit_in_chunks`] then writes the plan's expenses
//! in strictly ordered batches. A failing batch stops the run; batches already
//! written stay written and the committed count is reported.

use std::collections::HashSet;
use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use shared::{
    AmountInput, Expense, ImportOptions, ImportRecordError, ImportSummary, MonthlyBudgets,
    PayerAliases, PayerId, Settings, Snapshot, EXPORT_VERSION,
};
use uuid::Uuid;

use super::normalizers::{
    assemble_expense, build_expense_fingerprint, normalize_budgets, normalize_display_names,
    normalize_payer_aliases, parse_timestamp, resolve_payer_id,
};
use super::validation::{validate_amount_value, validate_expense_fields};
use crate::config::MAX_BATCH_SIZE;
use crate::error::{LedgerError, LedgerResult, StoreError};

/// Everything a real import will write, computed without touching storage
#[derive(Debug, Clone, PartialEq)]
pub struct ImportPlan {
    pub summary: ImportSummary,
    /// Expenses to commit, with fresh ids, in payload order
    pub expenses: Vec<Expense>,
    /// Destination settings with aliases learned from the payload added
    pub settings: Settings,
    pub settings_changed: bool,
    pub budgets: MonthlyBudgets,
    pub budgets_changed: bool,
    pub chunk_size: usize,
}

/// Parse a backup file's text
pub fn parse_import_payload(json: &str) -> LedgerResult<Value> {
    serde_json::from_str(json)
        .map_err(|e| LedgerError::InvalidPayload(format!("not valid JSON: {}", e)))
}

/// Names the payload knew its members by, as an alias table.
///
/// Covers `settings.payerAliases`, `settings.displayNames` and the legacy
/// top-level `userNames`.
fn payload_aliases(payload: &Value) -> PayerAliases {
    let settings = payload.get("settings");
    let mut aliases = normalize_payer_aliases(settings.and_then(|s| s.get("payerAliases")));

    let name_sources = [
        settings.and_then(|s| s.get("displayNames")),
        payload.get("userNames"),
    ];
    for source in name_sources.into_iter().flatten() {
        let names = normalize_display_names(Some(source));
        for id in PayerId::ALL {
            aliases.entry(names.name_for(id).to_string()).or_insert(id);
        }
    }
    aliases
}

fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size)
}

/// Validate and deduplicate `payload` against `current`.
///
/// Record-level problems become entries in `summary.errors`; only an unusable
/// envelope is an error.
pub fn prepare_import(
    payload: &Value,
    current: &Snapshot,
    options: &ImportOptions,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> LedgerResult<ImportPlan> {
    let Some(envelope) = payload.as_object() else {
        return Err(LedgerError::InvalidPayload("expected a JSON object".to_string()));
    };
    let Some(records) = envelope.get("expenses").and_then(Value::as_array) else {
        return Err(LedgerError::InvalidPayload("missing \"expenses\" array".to_string()));
    };

    let version = envelope.get("version").and_then(Value::as_str).unwrap_or("legacy");
    if version != EXPORT_VERSION {
        info!("📥 IMPORT: Reading a version {} backup", version);
    }

    // Destination aliases stay authoritative; the payload only fills gaps.
    let mut settings = current.settings.clone();
    let learned = payload_aliases(payload);
    let alias_count = settings.payer_aliases.len();
    for (name, id) in learned {
        settings.payer_aliases.entry(name).or_insert(id);
    }
    let settings_changed = settings.payer_aliases.len() != alias_count;

    let chunk_size = options.chunk_size.clamp(1, MAX_BATCH_SIZE);
    let mut summary = ImportSummary {
        dry_run: options.dry_run,
        ..ImportSummary::default()
    };
    let existing: HashSet<&str> = current.expenses.iter().map(|e| e.fingerprint.as_str()).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut expenses = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let Some(map) = record.as_object() else {
            summary.errors.push(ImportRecordError {
                index,
                message: format!("Record {}: not an object", index + 1),
            });
            continue;
        };
        let text = |key: &str| map.get(key).and_then(Value::as_str);

        let fields = match validate_expense_fields(
            text("description").unwrap_or_default(),
            validate_amount_value(map.get("amount").unwrap_or(&Value::Null)),
            text("category").unwrap_or_default(),
            text("date").unwrap_or_default().trim(),
            today,
        ) {
            Ok(fields) => fields,
            Err(problems) => {
                let messages: Vec<String> = problems.iter().map(|p| p.to_string()).collect();
                summary.errors.push(ImportRecordError {
                    index,
                    message: format!("Record {}: {}", index + 1, messages.join("; ")),
                });
                continue;
            }
        };

        let payer = resolve_payer_id(
            text("payerId"),
            text("payer").or_else(|| text("payerLegacy")),
            &settings.display_names,
            &settings.payer_aliases,
        );
        if !payer.is_resolved() && payer.legacy_payer.is_none() {
            summary.errors.push(ImportRecordError {
                index,
                message: format!("Record {}: payer could not be resolved", index + 1),
            });
            continue;
        }

        let fingerprint = build_expense_fingerprint(
            &fields.date.format("%Y-%m-%d").to_string(),
            &AmountInput::Number(fields.amount as f64),
            &fields.category,
            &fields.description,
            payer.payer_id,
        );
        let is_duplicate = existing.contains(fingerprint.as_str()) || seen.contains(&fingerprint);
        if is_duplicate {
            summary.duplicate_count += 1;
            if options.skip_duplicates && !options.allow_duplicate_indices.contains(&index) {
                summary.skipped_duplicate_count += 1;
                debug!("IMPORT: Skipping duplicate record {} ({})", index + 1, fingerprint);
                continue;
            }
        }
        seen.insert(fingerprint);

        if !payer.is_resolved() {
            summary.legacy_payer_count += 1;
        }
        let created_at = map.get("createdAt").and_then(parse_timestamp);
        expenses.push(assemble_expense(
            Uuid::new_v4().to_string(),
            fields,
            payer,
            created_at,
            now,
        ));
    }

    let mut budgets = current.monthly_budgets.clone();
    let mut budgets_changed = false;
    if options.merge_budgets {
        if let Some(raw) = envelope.get("monthlyBudgets") {
            for (month, ceilings) in normalize_budgets(raw) {
                if !budgets.contains_key(&month) {
                    budgets.insert(month, ceilings);
                    budgets_changed = true;
                }
            }
        }
    }

    summary.imported_count = expenses.len();
    summary.failed_count = summary.errors.len();
    summary.batch_count = chunk_count(expenses.len(), chunk_size);

    info!(
        "📥 IMPORT: {} to import, {} failed, {} duplicate(s), {} skipped{}",
        summary.imported_count,
        summary.failed_count,
        summary.duplicate_count,
        summary.skipped_duplicate_count,
        if options.dry_run { " (dry run)" } else { "" }
    );

    Ok(ImportPlan {
        summary,
        expenses,
        settings,
        settings_changed,
        budgets,
        budgets_changed,
        chunk_size,
    })
}

/// Commit `expenses` in order, `chunk_size` at a time, stopping at the first
/// failure. Returns the number of expenses written.
pub async fn commit_in_chunks<F, Fut>(
    expenses: &[Expense],
    chunk_size: usize,
    mut commit: F,
) -> LedgerResult<usize>
where
    F: FnMut(Vec<Expense>) -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let chunk_size = chunk_size.clamp(1, MAX_BATCH_SIZE);
    let total = expenses.len();
    let batches = chunk_count(total, chunk_size);
    let mut committed = 0;

    for (batch, chunk) in expenses.chunks(chunk_size).enumerate() {
        if let Err(e) = commit(chunk.to_vec()).await {
            warn!(
                "⚠️ IMPORT: Batch {}/{} failed after {} of {} committed: {}",
                batch + 1,
                batches,
                committed,
                total,
                e
            );
            return Err(LedgerError::PartialImport {
                committed,
                total,
                message: e.to_string(),
            });
        }
        committed += chunk.len();
        debug!("IMPORT: Batch {}/{} committed ({} so far)", batch + 1, batches, committed);
    }

    info!("✅ IMPORT: Committed {} expenses in {} batch(es)", committed, batches);
    Ok(committed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::export_service::export_json;
    use crate::test_utils::{expense, settings_with_names};
    use chrono::TimeZone;
    use serde_json::json;
    use shared::MonthKey;
    use std::sync::Mutex;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn empty_ledger() -> Snapshot {
        Snapshot::default()
    }

    fn record(description: &str, amount: Value, payer: Value) -> Value {
        json!({
            "description": description,
            "amount": amount,
            "category": "食費",
            "payerId": payer,
            "date": "2026-02-10"
        })
    }

    #[test]
    fn test_round_trip_into_empty_ledger() {
        let source = Snapshot {
            expenses: vec![
                expense("2026-02-01", 1000, "食費", PayerId::Member1),
                expense("2026-02-02", 2000, "日用品", PayerId::Member2),
                expense("2026-01-15", 300, "交通費", PayerId::Member1),
            ],
            ..Snapshot::default()
        };
        let payload = parse_import_payload(&export_json(&source, now()).unwrap()).unwrap();

        let plan = prepare_import(&payload, &empty_ledger(), &ImportOptions::default(), today(), now()).unwrap();
        assert_eq!(plan.summary.imported_count, 3);
        assert_eq!(plan.summary.duplicate_count, 0);
        assert_eq!(plan.summary.failed_count, 0);
        assert!(plan.expenses.iter().all(|e| !source.expenses.iter().any(|s| s.id == e.id)));
    }

    #[test]
    fn test_second_import_finds_only_duplicates() {
        let source = Snapshot {
            expenses: vec![
                expense("2026-02-01", 1000, "食費", PayerId::Member1),
                expense("2026-02-02", 2000, "日用品", PayerId::Member2),
            ],
            ..Snapshot::default()
        };
        let payload = parse_import_payload(&export_json(&source, now()).unwrap()).unwrap();
        let first = prepare_import(&payload, &empty_ledger(), &ImportOptions::default(), today(), now()).unwrap();

        let after_first = Snapshot {
            expenses: first.expenses,
            ..Snapshot::default()
        };
        let second = prepare_import(&payload, &after_first, &ImportOptions::default(), today(), now()).unwrap();
        assert_eq!(second.summary.imported_count, 0);
        assert_eq!(second.summary.duplicate_count, 2);
        assert_eq!(second.summary.skipped_duplicate_count, 2);
    }

    #[test]
    fn test_duplicates_within_one_payload() {
        let payload = json!({"expenses": [
            record("Super", json!(2300), json!("member1")),
            record("  super ", json!("2,300"), json!("member1")),
            record("Super", json!(2300), json!("member2")),
        ]});

        let plan = prepare_import(&payload, &empty_ledger(), &ImportOptions::default(), today(), now()).unwrap();
        assert_eq!(plan.summary.imported_count, 2);
        assert_eq!(plan.summary.duplicate_count, 1);
        assert_eq!(plan.summary.skipped_duplicate_count, 1);

        let keep_all = ImportOptions {
            skip_duplicates: false,
            ..ImportOptions::default()
        };
        let plan = prepare_import(&payload, &empty_ledger(), &keep_all, today(), now()).unwrap();
        assert_eq!(plan.summary.imported_count, 3);
        assert_eq!(plan.summary.duplicate_count, 1);
        assert_eq!(plan.summary.skipped_duplicate_count, 0);
    }

    #[test]
    fn test_allow_duplicate_indices_admits_single_records() {
        let payload = json!({"expenses": [
            record("Coffee", json!(400), json!("member1")),
            record("Coffee", json!(400), json!("member1")),
            record("Coffee", json!(400), json!("member1")),
        ]});
        let options = ImportOptions {
            allow_duplicate_indices: [1].into_iter().collect(),
            ..ImportOptions::default()
        };
        let plan = prepare_import(&payload, &empty_ledger(), &options, today(), now()).unwrap();
        assert_eq!(plan.summary.imported_count, 2);
        assert_eq!(plan.summary.duplicate_count, 2);
        assert_eq!(plan.summary.skipped_duplicate_count, 1);
    }

    #[test]
    fn test_record_errors_do_not_abort_the_import() {
        let payload = json!({"expenses": [
            record("Good", json!(100), json!("member1")),
            record("", json!("abc"), json!("member1")),
            json!({"description": "No payer", "amount": 5, "category": "食費", "date": "2026-02-10"}),
            json!("garbage"),
            json!({"description": "Bad date", "amount": 5, "category": "食費", "payerId": "member2", "date": "2026-02-30"}),
        ]});

        let plan = prepare_import(&payload, &empty_ledger(), &ImportOptions::default(), today(), now()).unwrap();
        assert_eq!(plan.summary.imported_count, 1);
        assert_eq!(plan.summary.failed_count, 4);
        let indices: Vec<usize> = plan.summary.errors.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert!(plan.summary.errors[0].message.contains("Description is required"));
        assert!(plan.summary.errors[1].message.contains("payer could not be resolved"));
    }

    #[test]
    fn test_legacy_envelope_resolves_names() {
        let payload = json!({
            "userNames": {"user1Name": "Taro", "user2Name": "Hanako"},
            "expenses": [
                {"description": "Rice", "amount": 3000, "category": "食費", "payer": "Hanako", "date": "2026-02-10"},
                {"description": "Gift", "amount": 1500, "category": "交際費", "payer": "Jiro", "date": "2026-02-11"}
            ]
        });
        let current = Snapshot {
            settings: settings_with_names("たろう", "はなこ"),
            ..Snapshot::default()
        };

        let plan = prepare_import(&payload, &current, &ImportOptions::default(), today(), now()).unwrap();
        assert_eq!(plan.summary.imported_count, 2);
        assert_eq!(plan.summary.legacy_payer_count, 1);
        assert_eq!(plan.expenses[0].payer_id, Some(PayerId::Member2));
        assert_eq!(plan.expenses[1].payer_id, None);
        assert_eq!(plan.expenses[1].payer_legacy.as_deref(), Some("Jiro"));

        assert!(plan.settings_changed);
        assert_eq!(plan.settings.payer_aliases.get("Hanako"), Some(&PayerId::Member2));
        assert_eq!(plan.settings.payer_aliases.get("はなこ"), Some(&PayerId::Member2));
    }

    #[test]
    fn test_budget_months_merge_without_overwriting() {
        let february = MonthKey::new(2026, 2).unwrap();
        let march = MonthKey::new(2026, 3).unwrap();
        let mut current = Snapshot::default();
        current
            .monthly_budgets
            .insert(february, [("食費".to_string(), 30000)].into_iter().collect());

        let payload = json!({
            "expenses": [],
            "monthlyBudgets": {"2026-02": {"食費": 99999}, "2026-03": {"食費": 40000}}
        });
        let plan = prepare_import(&payload, &current, &ImportOptions::default(), today(), now()).unwrap();
        assert!(plan.budgets_changed);
        assert_eq!(plan.budgets[&february]["食費"], 30000);
        assert_eq!(plan.budgets[&march]["食費"], 40000);

        let no_merge = ImportOptions {
            merge_budgets: false,
            ..ImportOptions::default()
        };
        let plan = prepare_import(&payload, &current, &no_merge, today(), now()).unwrap();
        assert!(!plan.budgets_changed);
    }

    #[test]
    fn test_unusable_envelopes() {
        let options = ImportOptions::default();
        for payload in [json!([1, 2]), json!({"version": "2.1"}), json!({"expenses": {}})] {
            let result = prepare_import(&payload, &empty_ledger(), &options, today(), now());
            assert!(matches!(result, Err(LedgerError::InvalidPayload(_))));
        }
        assert!(matches!(parse_import_payload("{not json"), Err(LedgerError::InvalidPayload(_))));
    }

    fn many_expenses(count: usize) -> Vec<Expense> {
        (0..count)
            .map(|i| expense("2026-02-01", (i + 1) as i64, "食費", PayerId::Member1))
            .collect()
    }

    #[tokio::test]
    async fn test_chunking_1200_into_500_500_200() {
        let expenses = many_expenses(1200);
        let sizes = Mutex::new(Vec::new());

        let committed = commit_in_chunks(&expenses, 500, |chunk| {
            sizes.lock().unwrap().push(chunk.len());
            async { Ok::<(), StoreError>(()) }
        })
        .await
        .unwrap();

        assert_eq!(committed, 1200);
        assert_eq!(*sizes.lock().unwrap(), vec![500, 500, 200]);
        assert_eq!(chunk_count(1200, 500), 3);
    }

    #[tokio::test]
    async fn test_failed_chunk_reports_partial_commit() {
        let expenses = many_expenses(1200);
        let calls = Mutex::new(0);

        let result = commit_in_chunks(&expenses, 500, |_chunk| {
            let mut calls = calls.lock().unwrap();
            *calls += 1;
            let outcome = if *calls == 2 {
                Err(StoreError::Unavailable("network lost".to_string()))
            } else {
                Ok(())
            };
            async move { outcome }
        })
        .await;

        match result {
            Err(LedgerError::PartialImport { committed, total, message }) => {
                assert_eq!(committed, 500);
                assert_eq!(total, 1200);
                assert!(message.contains("network lost"));
            }
            other => panic!("expected partial import, got {:?}", other),
        }
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
