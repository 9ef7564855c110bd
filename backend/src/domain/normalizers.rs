//! Decode layer for persisted and imported data.
//!
//! Everything read from a backend or a backup file passes through here and
//! comes out as a fully populated typed value. Settings normalization never
//! fails: malformed entries are dropped and missing fields take defaults.
//! Payer resolution and fingerprinting live here too, so every write path
//! applies the same rules.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use log::{debug, warn};
use serde_json::{Map, Value};
use shared::{
    AmountInput, ClosureStatus, DisplayNames, Expense, MonthClosure, MonthKey, MonthlyBudgets,
    PayerAliases, PayerId, Preferences, ReopenEntry, Settings, SettingsMeta, SettlementRecord,
    SettlementSnapshot, Snapshot, TotalsSnapshot, SCHEMA_VERSION,
};
use std::collections::BTreeMap;

use super::validation::{
    parse_amount_text, sanitize_text, validate_amount_value, validate_username,
    ValidatedExpenseFields,
};

/// Result of mapping a record's payer fields to a stable id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayerResolution {
    pub payer_id: Option<PayerId>,
    /// Sanitized free text kept when no id could be found
    pub legacy_payer: Option<String>,
}

impl PayerResolution {
    pub fn is_resolved(&self) -> bool {
        self.payer_id.is_some()
    }
}

/// Resolve a payer id for a record.
///
/// A valid `payer_id` wins outright. Otherwise the free-text `payer` is
/// sanitized and looked up first in the alias table, then against the current
/// display names. Alias entries take precedence over a coincidental match on a
/// current name.
pub fn resolve_payer_id(
    payer_id: Option<&str>,
    payer: Option<&str>,
    display_names: &DisplayNames,
    aliases: &PayerAliases,
) -> PayerResolution {
    if let Some(id) = payer_id.and_then(PayerId::parse) {
        return PayerResolution {
            payer_id: Some(id),
            legacy_payer: None,
        };
    }

    let name = match payer.map(sanitize_text).filter(|n| !n.is_empty()) {
        Some(name) => name,
        None => {
            return PayerResolution {
                payer_id: None,
                legacy_payer: None,
            }
        }
    };

    let resolved = aliases.get(&name).copied().or_else(|| {
        PayerId::ALL
            .into_iter()
            .find(|id| display_names.name_for(*id) == name)
    });

    match resolved {
        Some(id) => PayerResolution {
            payer_id: Some(id),
            legacy_payer: None,
        },
        None => PayerResolution {
            payer_id: None,
            legacy_payer: Some(name),
        },
    }
}

fn fingerprint_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn fingerprint_amount(amount: &AmountInput) -> i64 {
    let value = match amount {
        AmountInput::Number(value) => *value,
        AmountInput::Text(text) => parse_amount_text(text).unwrap_or(0.0),
    };
    if value.is_finite() {
        value.floor() as i64
    } else {
        0
    }
}

/// Content key used for duplicate detection:
/// `date|floor(amount)|category|description|payerId`.
///
/// Category and description are whitespace-collapsed and lowercased. Changing
/// the field order or casing rules invalidates every stored fingerprint.
pub fn build_expense_fingerprint(
    date: &str,
    amount: &AmountInput,
    category: &str,
    description: &str,
    payer_id: Option<PayerId>,
) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        date.trim(),
        fingerprint_amount(amount),
        fingerprint_text(category),
        fingerprint_text(description),
        payer_id.map(|p| p.as_str()).unwrap_or("")
    )
}

pub fn expense_fingerprint(expense: &Expense) -> String {
    build_expense_fingerprint(
        &expense.date.format("%Y-%m-%d").to_string(),
        &AmountInput::Number(expense.amount as f64),
        &expense.category,
        &expense.description,
        expense.payer_id,
    )
}

/// Re-insert both the previous and the next name of each member; nothing is removed.
///
/// Current names are inserted last so they win if a name moved between members.
pub fn merge_aliases_with_display_name_change(
    existing: &PayerAliases,
    previous: &DisplayNames,
    next: &DisplayNames,
) -> PayerAliases {
    let mut merged = existing.clone();
    for names in [previous, next] {
        for id in PayerId::ALL {
            let name = sanitize_text(names.name_for(id));
            if !name.is_empty() {
                merged.insert(name, id);
            }
        }
    }
    merged
}

/// Make sure the current display names map to their members
pub fn ensure_current_aliases(settings: &mut Settings) {
    let current = settings.display_names.clone();
    settings.payer_aliases =
        merge_aliases_with_display_name_change(&settings.payer_aliases, &current, &current);
}

/// Accepts RFC 3339 strings, epoch milliseconds, or `{seconds, nanoseconds}` objects
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        Value::Object(map) => {
            let seconds = map.get("seconds").or_else(|| map.get("_seconds"))?.as_i64()?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, nanos as u32).single()
        }
        _ => None,
    }
}

fn finite_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount_text(s).ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn as_object(value: Option<&Value>) -> Option<&Map<String, Value>> {
    value.and_then(Value::as_object)
}

fn payer_field(map: &Map<String, Value>, key: &str) -> Option<PayerId> {
    map.get(key).and_then(Value::as_str).and_then(PayerId::parse)
}

/// Display names from `{member1, member2}` or the legacy `{user1Name, user2Name}`.
/// Each member falls back to its default independently.
pub fn normalize_display_names(raw: Option<&Value>) -> DisplayNames {
    let defaults = DisplayNames::default();
    let Some(map) = as_object(raw) else {
        return defaults;
    };

    let pick = |keys: [&str; 2], fallback: &str| -> String {
        keys.iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .find_map(|name| validate_username(name).into_result().ok())
            .unwrap_or_else(|| fallback.to_string())
    };

    DisplayNames {
        member1: pick(["member1", "user1Name"], &defaults.member1),
        member2: pick(["member2", "user2Name"], &defaults.member2),
    }
}

pub fn normalize_payer_aliases(raw: Option<&Value>) -> PayerAliases {
    let mut aliases = PayerAliases::new();
    if let Some(map) = as_object(raw) {
        for (name, target) in map {
            let name = sanitize_text(name);
            match target.as_str().and_then(PayerId::parse) {
                Some(id) if !name.is_empty() => {
                    aliases.insert(name, id);
                }
                _ => debug!("Dropping malformed payer alias '{}'", name),
            }
        }
    }
    aliases
}

pub fn normalize_settlement_records(raw: Option<&Value>) -> BTreeMap<MonthKey, SettlementRecord> {
    let mut records = BTreeMap::new();
    let Some(map) = as_object(raw) else {
        return records;
    };

    for (key, value) in map {
        let Some(month) = MonthKey::parse(key) else {
            debug!("Dropping settlement with invalid month key '{}'", key);
            continue;
        };
        let Some(entry) = value.as_object() else {
            continue;
        };
        let amount = entry.get("amount").and_then(finite_number).filter(|a| *a >= 0.0);
        let from = payer_field(entry, "fromPayerId");
        let to = payer_field(entry, "toPayerId");

        match (amount, from, to) {
            (Some(amount), Some(from), Some(to)) if from != to => {
                let completed_at = entry
                    .get("completedAt")
                    .and_then(parse_timestamp)
                    .unwrap_or(DateTime::UNIX_EPOCH);
                let memo = entry
                    .get("memo")
                    .and_then(Value::as_str)
                    .map(sanitize_text)
                    .unwrap_or_default();
                records.insert(
                    month,
                    SettlementRecord {
                        amount,
                        from_payer_id: from,
                        to_payer_id: to,
                        completed_at,
                        memo,
                    },
                );
            }
            _ => debug!("Dropping malformed settlement record for {}", month),
        }
    }
    records
}

fn normalize_settlement_snapshot(raw: Option<&Value>) -> Option<SettlementSnapshot> {
    let map = as_object(raw)?;
    let amount = map.get("amount").and_then(finite_number)?;
    let from = payer_field(map, "fromPayerId")?;
    let to = payer_field(map, "toPayerId")?;
    (from != to && amount >= 0.0).then_some(SettlementSnapshot {
        amount,
        from_payer_id: from,
        to_payer_id: to,
    })
}

fn normalize_totals_snapshot(raw: Option<&Value>) -> Option<TotalsSnapshot> {
    let map = as_object(raw)?;
    let field = |key: &str| {
        map.get(key)
            .and_then(finite_number)
            .map(|v| v.trunc() as i64)
            .unwrap_or(0)
    };
    Some(TotalsSnapshot {
        member1_total: field("member1Total"),
        member2_total: field("member2Total"),
        invalid_payer_total: field("invalidPayerTotal"),
        total_expense: field("totalExpense"),
    })
}

fn normalize_reopen_history(raw: Option<&Value>) -> Vec<ReopenEntry> {
    raw.and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let map = entry.as_object()?;
                    let reopened_at = map.get("reopenedAt").and_then(parse_timestamp)?;
                    let reason = sanitize_text(map.get("reason")?.as_str()?);
                    (!reason.is_empty()).then_some(ReopenEntry { reopened_at, reason })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn normalize_month_closures(raw: Option<&Value>) -> BTreeMap<MonthKey, MonthClosure> {
    let mut closures = BTreeMap::new();
    let Some(map) = as_object(raw) else {
        return closures;
    };

    for (key, value) in map {
        let (Some(month), Some(entry)) = (MonthKey::parse(key), value.as_object()) else {
            debug!("Dropping malformed month closure '{}'", key);
            continue;
        };
        let status = match entry.get("status").and_then(Value::as_str) {
            Some("closed") => ClosureStatus::Closed,
            _ => ClosureStatus::Open,
        };
        closures.insert(
            month,
            MonthClosure {
                status,
                closed_at: entry.get("closedAt").and_then(parse_timestamp),
                closed_by: entry
                    .get("closedBy")
                    .and_then(Value::as_str)
                    .map(sanitize_text)
                    .filter(|s| !s.is_empty()),
                settlement_snapshot: normalize_settlement_snapshot(entry.get("settlementSnapshot")),
                totals_snapshot: normalize_totals_snapshot(entry.get("totalsSnapshot")),
                reopen_history: normalize_reopen_history(entry.get("reopenHistory")),
            },
        );
    }
    closures
}

pub fn normalize_preferences(raw: Option<&Value>) -> Preferences {
    let defaults = Preferences::default();
    Preferences {
        suggestions_enabled: as_object(raw)
            .and_then(|map| map.get("suggestionsEnabled"))
            .and_then(Value::as_bool)
            .unwrap_or(defaults.suggestions_enabled),
    }
}

pub fn normalize_meta(raw: Option<&Value>) -> SettingsMeta {
    let Some(map) = as_object(raw) else {
        return SettingsMeta::default();
    };
    SettingsMeta {
        schema_version: map
            .get("schemaVersion")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(SCHEMA_VERSION)
            .to_string(),
        updated_at: map.get("updatedAt").and_then(parse_timestamp),
        data_revision: map.get("dataRevision").and_then(Value::as_u64).unwrap_or(0),
    }
}

/// Build a complete settings value from arbitrary, partial or legacy-shaped input
pub fn normalize_settings(raw: &Value) -> Settings {
    let map = raw.as_object();
    let get = |key: &str| map.and_then(|m| m.get(key));

    let mut settings = Settings {
        display_names: normalize_display_names(get("displayNames").or_else(|| get("userNames"))),
        payer_aliases: normalize_payer_aliases(get("payerAliases")),
        settlements: normalize_settlement_records(get("settlements")),
        month_closures: normalize_month_closures(get("monthClosures")),
        preferences: normalize_preferences(get("preferences")),
        meta: normalize_meta(get("meta")),
    };
    ensure_current_aliases(&mut settings);
    settings
}

/// Budgets keyed by valid month keys with non-negative integer ceilings
pub fn normalize_budgets(raw: &Value) -> MonthlyBudgets {
    let mut budgets = MonthlyBudgets::new();
    let Some(map) = raw.as_object() else {
        return budgets;
    };

    for (key, value) in map {
        let (Some(month), Some(categories)) = (MonthKey::parse(key), value.as_object()) else {
            continue;
        };
        let ceilings: BTreeMap<String, i64> = categories
            .iter()
            .filter_map(|(category, amount)| {
                let amount = finite_number(amount).filter(|a| *a >= 0.0)?;
                Some((category.trim().to_string(), amount.trunc() as i64))
            })
            .collect();
        budgets.insert(month, ceilings);
    }
    budgets
}

fn parse_stored_date(raw: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    (date.format("%Y-%m-%d").to_string() == raw).then_some(date)
}

/// Date of a stored expense document, if it has a usable one
pub fn stored_expense_date(raw: &Value) -> Option<NaiveDate> {
    raw.get("date")
        .and_then(Value::as_str)
        .and_then(|d| parse_stored_date(d.trim()))
}

/// Decode a stored expense document.
///
/// Returns `None` only when the amount or date is unusable. The payer is
/// re-resolved against the current alias table, so legacy records start
/// resolving as soon as a matching alias exists. The fingerprint is always
/// recomputed.
pub fn decode_expense(id: &str, raw: &Value, settings: &Settings) -> Option<Expense> {
    let map = raw.as_object()?;
    let text = |key: &str| map.get(key).and_then(Value::as_str);

    let Some(amount) = map
        .get("amount")
        .and_then(|value| validate_amount_value(value).into_result().ok())
    else {
        warn!("Skipping stored expense {} with an unusable amount", id);
        return None;
    };
    let Some(date) = text("date").and_then(|d| parse_stored_date(d.trim())) else {
        warn!("Skipping stored expense {} with an unusable date", id);
        return None;
    };

    let payer = resolve_payer_id(
        text("payerId"),
        text("payerLegacy").or_else(|| text("payer")),
        &settings.display_names,
        &settings.payer_aliases,
    );

    let mut expense = Expense {
        id: id.to_string(),
        description: text("description").map(sanitize_text).unwrap_or_default(),
        amount,
        category: text("category").map(str::trim).unwrap_or_default().to_string(),
        payer_id: payer.payer_id,
        payer_legacy: payer.legacy_payer,
        date,
        created_at: map.get("createdAt").and_then(parse_timestamp),
        updated_at: map.get("updatedAt").and_then(parse_timestamp),
        schema_version: text("schemaVersion").unwrap_or(SCHEMA_VERSION).to_string(),
        fingerprint: String::new(),
    };
    expense.fingerprint = expense_fingerprint(&expense);
    Some(expense)
}

/// Build a write-ready expense from validated fields and a resolved payer
pub fn assemble_expense(
    id: String,
    fields: ValidatedExpenseFields,
    payer: PayerResolution,
    created_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
) -> Expense {
    let mut expense = Expense {
        id,
        description: fields.description,
        amount: fields.amount,
        category: fields.category,
        payer_legacy: if payer.payer_id.is_some() { None } else { payer.legacy_payer },
        payer_id: payer.payer_id,
        date: fields.date,
        created_at: created_at.or(Some(updated_at)),
        updated_at: Some(updated_at),
        schema_version: SCHEMA_VERSION.to_string(),
        fingerprint: String::new(),
    };
    expense.fingerprint = expense_fingerprint(&expense);
    expense
}

/// Newest first; ties broken by creation time, then id
pub fn sort_expenses(expenses: &mut [Expense]) {
    expenses.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Recombine the latest raw value of all three persisted aggregates
pub fn normalize_snapshot<'a>(
    expenses: impl IntoIterator<Item = (&'a str, &'a Value)>,
    settings: Option<&Value>,
    budgets: Option<&Value>,
) -> Snapshot {
    let settings = settings.map(normalize_settings).unwrap_or_else(|| {
        let mut defaults = Settings::default();
        ensure_current_aliases(&mut defaults);
        defaults
    });
    let mut expenses: Vec<Expense> = expenses
        .into_iter()
        .filter_map(|(id, raw)| decode_expense(id, raw, &settings))
        .collect();
    sort_expenses(&mut expenses);

    Snapshot {
        expenses,
        settings,
        monthly_budgets: budgets.map(normalize_budgets).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names() -> DisplayNames {
        DisplayNames::new("Taro", "Hanako")
    }

    #[test]
    fn test_fingerprint_ignores_casing_whitespace_and_amount_representation() {
        let a = build_expense_fingerprint(
            "2026-02-10",
            &AmountInput::Number(2300.0),
            "食費",
            "  Super ",
            Some(PayerId::Member1),
        );
        let b = build_expense_fingerprint(
            "2026-02-10",
            &AmountInput::Text("2300".to_string()),
            "食費",
            "super",
            Some(PayerId::Member1),
        );
        assert_eq!(a, b);
        assert_eq!(a, "2026-02-10|2300|食費|super|member1");
    }

    #[test]
    fn test_fingerprint_floors_amount_and_distinguishes_payer() {
        let floored = build_expense_fingerprint("2026-02-10", &AmountInput::Number(2300.9), "食費", "x", None);
        assert_eq!(floored, "2026-02-10|2300|食費|x|");

        let member2 = build_expense_fingerprint(
            "2026-02-10",
            &AmountInput::Number(2300.0),
            "食費",
            "x",
            Some(PayerId::Member2),
        );
        assert_ne!(floored, member2);
    }

    #[test]
    fn test_resolve_prefers_valid_payer_id() {
        let resolution = resolve_payer_id(Some("member2"), Some("Taro"), &names(), &PayerAliases::new());
        assert_eq!(resolution.payer_id, Some(PayerId::Member2));
        assert_eq!(resolution.legacy_payer, None);
    }

    #[test]
    fn test_resolve_alias_wins_over_current_name() {
        let mut aliases = PayerAliases::new();
        aliases.insert("Hanako".to_string(), PayerId::Member1);
        let resolution = resolve_payer_id(None, Some(" Hanako "), &names(), &aliases);
        assert_eq!(resolution.payer_id, Some(PayerId::Member1));
    }

    #[test]
    fn test_resolve_falls_back_to_display_name_then_legacy() {
        let aliases = PayerAliases::new();
        assert_eq!(
            resolve_payer_id(Some("nobody"), Some("Hanako"), &names(), &aliases).payer_id,
            Some(PayerId::Member2)
        );

        let unknown = resolve_payer_id(None, Some("<Jiro>"), &names(), &aliases);
        assert_eq!(unknown.payer_id, None);
        assert_eq!(unknown.legacy_payer.as_deref(), Some("Jiro"));

        let empty = resolve_payer_id(None, None, &names(), &aliases);
        assert!(!empty.is_resolved());
        assert_eq!(empty.legacy_payer, None);
    }

    #[test]
    fn test_merge_aliases_keeps_history() {
        let previous = names();
        let next = DisplayNames::new("Taro-kun", "Hanako");
        let mut existing = PayerAliases::new();
        existing.insert("T".to_string(), PayerId::Member1);

        let merged = merge_aliases_with_display_name_change(&existing, &previous, &next);
        assert_eq!(merged.get("T"), Some(&PayerId::Member1));
        assert_eq!(merged.get("Taro"), Some(&PayerId::Member1));
        assert_eq!(merged.get("Taro-kun"), Some(&PayerId::Member1));
        assert_eq!(merged.get("Hanako"), Some(&PayerId::Member2));
    }

    #[test]
    fn test_merge_aliases_current_names_win_after_swap() {
        let previous = names();
        let swapped = DisplayNames::new("Hanako", "Taro");
        let merged = merge_aliases_with_display_name_change(&PayerAliases::new(), &previous, &swapped);
        assert_eq!(merged.get("Hanako"), Some(&PayerId::Member1));
        assert_eq!(merged.get("Taro"), Some(&PayerId::Member2));
    }

    #[test]
    fn test_normalize_settings_never_fails() {
        for raw in [json!(null), json!(42), json!("settings"), json!([1, 2]), json!({})] {
            let settings = normalize_settings(&raw);
            assert_eq!(settings.display_names, DisplayNames::default());
            assert_eq!(settings.payer_aliases.len(), 2);
            assert!(settings.preferences.suggestions_enabled);
        }
    }

    #[test]
    fn test_normalize_settings_drops_malformed_entries() {
        let raw = json!({
            "displayNames": {"member1": "Taro", "member2": ""},
            "payerAliases": {"T": "member1", "Ghost": "member3"},
            "settlements": {
                "2026-01": {"amount": 1200, "fromPayerId": "member2", "toPayerId": "member1",
                            "completedAt": "2026-02-01T09:00:00Z", "memo": "paid"},
                "2026-1": {"amount": 10, "fromPayerId": "member2", "toPayerId": "member1"},
                "2025-12": {"amount": "NaN", "fromPayerId": "member2", "toPayerId": "member1"},
                "2025-11": {"amount": 5, "fromPayerId": "member1", "toPayerId": "member1"}
            },
            "monthClosures": {
                "2026-01": {"status": "closed", "closedAt": "2026-02-01T09:00:00Z",
                            "totalsSnapshot": {"member1Total": 3200, "member2Total": 800},
                            "reopenHistory": [{"reopenedAt": "2026-02-02T09:00:00Z", "reason": "typo"},
                                              {"reason": "missing timestamp"}]},
                "bad": {"status": "closed"}
            },
            "preferences": {"suggestionsEnabled": false},
            "meta": {"dataRevision": 7}
        });

        let settings = normalize_settings(&raw);
        assert_eq!(settings.display_names, DisplayNames::new("Taro", "ユーザー2"));
        assert_eq!(settings.payer_aliases.get("T"), Some(&PayerId::Member1));
        assert!(!settings.payer_aliases.contains_key("Ghost"));
        assert_eq!(settings.payer_aliases.get("ユーザー2"), Some(&PayerId::Member2));

        assert_eq!(settings.settlements.len(), 1);
        let january = MonthKey::parse("2026-01").unwrap();
        assert_eq!(settings.settlements[&january].amount, 1200.0);
        assert_eq!(settings.settlements[&january].memo, "paid");

        assert_eq!(settings.month_closures.len(), 1);
        let closure = &settings.month_closures[&january];
        assert_eq!(closure.status, ClosureStatus::Closed);
        assert_eq!(closure.reopen_history.len(), 1);
        let totals = closure.totals_snapshot.as_ref().unwrap();
        assert_eq!(totals.member1_total, 3200);
        assert_eq!(totals.total_expense, 0);

        assert!(!settings.preferences.suggestions_enabled);
        assert_eq!(settings.meta.data_revision, 7);
        assert_eq!(settings.meta.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_normalize_settings_accepts_legacy_user_names() {
        let settings = normalize_settings(&json!({"userNames": {"user1Name": "Taro", "user2Name": "Hanako"}}));
        assert_eq!(settings.display_names, names());
        assert_eq!(settings.payer_aliases.get("Hanako"), Some(&PayerId::Member2));
    }

    #[test]
    fn test_parse_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2026-02-01T09:00:00Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp_millis())), Some(expected));
        assert_eq!(
            parse_timestamp(&json!({"seconds": expected.timestamp(), "nanoseconds": 0})),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!(true)), None);
    }

    #[test]
    fn test_normalize_budgets() {
        let budgets = normalize_budgets(&json!({
            "2026-02": {"食費": 40000, "日用品": "5,000", "交通費": -1, "娯楽費": "lots"},
            "2026-13": {"食費": 1}
        }));
        assert_eq!(budgets.len(), 1);
        let february = &budgets[&MonthKey::parse("2026-02").unwrap()];
        assert_eq!(february.get("食費"), Some(&40000));
        assert_eq!(february.get("日用品"), Some(&5000));
        assert!(!february.contains_key("交通費"));
        assert!(!february.contains_key("娯楽費"));
    }

    #[test]
    fn test_decode_expense_resolves_legacy_payer_through_aliases() {
        let mut settings = Settings::default();
        settings.payer_aliases.insert("Taro".to_string(), PayerId::Member1);

        let raw = json!({
            "description": " Super  market ",
            "amount": "2,300",
            "category": "食費",
            "payer": "Taro",
            "date": "2026-02-10"
        });
        let expense = decode_expense("e1", &raw, &settings).unwrap();
        assert_eq!(expense.description, "Super market");
        assert_eq!(expense.amount, 2300);
        assert_eq!(expense.payer_id, Some(PayerId::Member1));
        assert_eq!(expense.payer_legacy, None);
        assert_eq!(expense.fingerprint, "2026-02-10|2300|食費|super market|member1");

        let unresolved = json!({"description": "x", "amount": 1, "category": "食費",
                                "payerLegacy": "Jiro", "date": "2026-02-10"});
        let expense = decode_expense("e2", &unresolved, &settings).unwrap();
        assert_eq!(expense.payer_id, None);
        assert_eq!(expense.payer_legacy.as_deref(), Some("Jiro"));
    }

    #[test]
    fn test_decode_expense_skips_unusable_records() {
        let settings = Settings::default();
        assert!(decode_expense("e", &json!({"amount": 0, "date": "2026-02-10"}), &settings).is_none());
        assert!(decode_expense("e", &json!({"amount": 5, "date": "2026-02-30"}), &settings).is_none());
        assert!(decode_expense("e", &json!("not an object"), &settings).is_none());
    }

    #[test]
    fn test_normalize_snapshot_sorts_newest_first() {
        let older = json!({"description": "a", "amount": 1, "category": "食費", "payerId": "member1", "date": "2026-01-05"});
        let newer = json!({"description": "b", "amount": 2, "category": "食費", "payerId": "member2", "date": "2026-02-05"});
        let docs = vec![("old".to_string(), older), ("new".to_string(), newer)];

        let snapshot = normalize_snapshot(docs.iter().map(|(id, v)| (id.as_str(), v)), None, None);
        let ids: Vec<&str> = snapshot.expenses.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(snapshot.settings.display_names, DisplayNames::default());
        assert!(snapshot.monthly_budgets.is_empty());
    }
}
