//! Write preparation for single expenses.
//!
//! Both storage backends call [`prepare_expense`] before persisting, so the
//! validation, payer resolution and closed-month rules are identical whichever
//! backend is in use.

use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use shared::{ExpenseDraft, Expense, Settings};
use uuid::Uuid;

use super::commands::expenses::SaveExpenseCommand;
use super::month_closure::guard_month_mutation;
use super::normalizers::{assemble_expense, resolve_payer_id};
use super::validation::{validate_amount, validate_expense_fields};
use crate::error::{LedgerError, LedgerResult};

fn build_expense(
    draft: &ExpenseDraft,
    existing: Option<&Expense>,
    settings: &Settings,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> LedgerResult<Expense> {
    let fields = validate_expense_fields(
        &draft.description,
        validate_amount(&draft.amount),
        &draft.category,
        draft.date.trim(),
        today,
    )
    .map_err(|problems| LedgerError::Validation(problems.iter().map(|p| p.to_string()).collect()))?;

    let payer = resolve_payer_id(
        draft.payer_id.as_deref(),
        draft.payer.as_deref(),
        &settings.display_names,
        &settings.payer_aliases,
    );
    if !payer.is_resolved() {
        let given = payer
            .legacy_payer
            .or_else(|| draft.payer_id.clone())
            .unwrap_or_else(|| "(none)".to_string());
        return Err(LedgerError::InvalidPayer(given));
    }

    let (id, created_at) = match existing {
        Some(existing) => (existing.id.clone(), existing.created_at),
        None => (Uuid::new_v4().to_string(), None),
    };
    Ok(assemble_expense(id, fields, payer, created_at, now))
}

/// Validate a save request and produce the expense to persist.
///
/// Fails without side effects when a field is invalid, the payer does not
/// resolve to a member, or the old or new date falls in a closed month.
pub fn prepare_expense(
    command: &SaveExpenseCommand,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> LedgerResult<Expense> {
    let expense = build_expense(
        &command.draft,
        command.existing.as_ref(),
        &command.settings,
        today,
        now,
    )
    .inspect_err(|e| warn!("Rejected expense save: {}", e))?;

    let dates = std::iter::once(expense.date).chain(command.existing.as_ref().map(|e| e.date));
    guard_month_mutation(&command.settings, dates)?;
    Ok(expense)
}

/// The expense a draft would become, or `None` if it would be rejected
pub fn draft_candidate(draft: &ExpenseDraft, settings: &Settings, today: NaiveDate) -> Option<Expense> {
    build_expense(draft, None, settings, today, Utc::now()).ok()
}
