//! Pure mutations of the settings aggregate.
//!
//! Repositories read the latest settings, run one of these updates, stamp the
//! write with [`stamp_settings_write`] and store the result with a revision
//! check.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use shared::{Expense, MonthKey, Settings, SettlementRecord, SCHEMA_VERSION};

use super::commands::settings::{SaveDisplayNamesCommand, SaveSettlementCommand};
use super::normalizers::{ensure_current_aliases, merge_aliases_with_display_name_change};
use super::validation::{sanitize_text, validate_username};
use crate::error::{LedgerError, LedgerResult};

/// A settings change, given the current ledger for context
pub type SettingsUpdate<'a> = dyn Fn(&mut Settings, &[Expense]) -> LedgerResult<()> + Send + Sync + 'a;

/// Rename the members; every old and new name stays in the alias table
pub fn apply_display_names(settings: &mut Settings, command: &SaveDisplayNamesCommand) -> LedgerResult<()> {
    let member1 = validate_username(&command.member1).into_result();
    let member2 = validate_username(&command.member2).into_result();

    let (member1, member2) = match (member1, member2) {
        (Ok(member1), Ok(member2)) => (member1, member2),
        (member1, member2) => {
            let mut problems = Vec::new();
            if let Err(e) = member1 {
                problems.push(format!("Member 1: {}", e));
            }
            if let Err(e) = member2 {
                problems.push(format!("Member 2: {}", e));
            }
            return Err(LedgerError::Validation(problems));
        }
    };

    let previous = settings.display_names.clone();
    settings.display_names.member1 = member1;
    settings.display_names.member2 = member2;
    settings.payer_aliases = merge_aliases_with_display_name_change(
        &settings.payer_aliases,
        &previous,
        &settings.display_names,
    );
    Ok(())
}

pub fn apply_settlement_completion(
    settings: &mut Settings,
    command: &SaveSettlementCommand,
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    let mut problems = Vec::new();
    if !command.amount.is_finite() || command.amount < 0.0 {
        problems.push("Settlement amount must be a non-negative number".to_string());
    }
    if command.from_payer_id == command.to_payer_id {
        problems.push("A settlement must be between two different members".to_string());
    }
    if !problems.is_empty() {
        return Err(LedgerError::Validation(problems));
    }

    settings.settlements.insert(
        command.month,
        SettlementRecord {
            amount: command.amount,
            from_payer_id: command.from_payer_id,
            to_payer_id: command.to_payer_id,
            completed_at: now,
            memo: sanitize_text(&command.memo),
        },
    );
    Ok(())
}

/// Removing a month without a record is a no-op
pub fn clear_settlement_completion(settings: &mut Settings, month: MonthKey) {
    settings.settlements.remove(&month);
}

/// Trimmed category keys with non-negative ceilings
pub fn validate_budget_ceilings(ceilings: &BTreeMap<String, i64>) -> LedgerResult<BTreeMap<String, i64>> {
    let mut problems = Vec::new();
    let mut cleaned = BTreeMap::new();
    for (category, amount) in ceilings {
        let category = category.trim();
        if category.is_empty() {
            problems.push("Budget category must not be empty".to_string());
        } else if *amount < 0 {
            problems.push(format!("Budget for {} must not be negative", category));
        } else {
            cleaned.insert(category.to_string(), *amount);
        }
    }
    if problems.is_empty() {
        Ok(cleaned)
    } else {
        Err(LedgerError::Validation(problems))
    }
}

/// Bump the revision and timestamp of a settings write
pub fn stamp_settings_write(settings: &mut Settings, now: DateTime<Utc>) {
    ensure_current_aliases(settings);
    settings.meta.schema_version = SCHEMA_VERSION.to_string();
    settings.meta.updated_at = Some(now);
    settings.meta.data_revision += 1;
}
