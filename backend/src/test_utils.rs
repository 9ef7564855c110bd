//! Ledger fixtures for unit tests.

use chrono::{NaiveDate, TimeZone, Utc};
use shared::{AmountInput, Expense, ExpenseDraft, PayerId, Settings, SCHEMA_VERSION};
use uuid::Uuid;

use crate::domain::normalizers::{ensure_current_aliases, expense_fingerprint};

fn parse_date(date: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap_or_else(|e| panic!("bad fixture date {}: {}", date, e))
}

fn build(date: &str, amount: i64, category: &str, payer_id: Option<PayerId>, legacy: Option<&str>, description: &str) -> Expense {
    let created_at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single();
    let mut expense = Expense {
        id: Uuid::new_v4().to_string(),
        description: description.to_string(),
        amount,
        category: category.to_string(),
        payer_id,
        payer_legacy: legacy.map(str::to_string),
        date: parse_date(date),
        created_at,
        updated_at: created_at,
        schema_version: SCHEMA_VERSION.to_string(),
        fingerprint: String::new(),
    };
    expense.fingerprint = expense_fingerprint(&expense);
    expense
}

/// A resolved expense described as "Groceries"
pub fn expense(date: &str, amount: i64, category: &str, payer: PayerId) -> Expense {
    build(date, amount, category, Some(payer), None, "Groceries")
}

pub fn expense_with_description(date: &str, amount: i64, category: &str, payer: PayerId, description: &str) -> Expense {
    build(date, amount, category, Some(payer), None, description)
}

/// An expense whose payer never resolved to a member
pub fn unattributed_expense(date: &str, amount: i64, category: &str, legacy_payer: &str) -> Expense {
    build(date, amount, category, None, Some(legacy_payer), "Groceries")
}

pub fn settings_with_names(member1: &str, member2: &str) -> Settings {
    let mut settings = Settings::default();
    settings.display_names.member1 = member1.to_string();
    settings.display_names.member2 = member2.to_string();
    ensure_current_aliases(&mut settings);
    settings
}

/// Form input described as "Groceries"
pub fn draft(date: &str, amount: &str, category: &str, payer_id: Option<&str>) -> ExpenseDraft {
    ExpenseDraft {
        description: "Groceries".to_string(),
        amount: AmountInput::Text(amount.to_string()),
        category: category.to_string(),
        payer_id: payer_id.map(str::to_string),
        payer: None,
        date: date.to_string(),
    }
}
