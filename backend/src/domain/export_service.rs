//! Backup export and the per-month CSV report.
//!
//! The backup re-validates every expense before serializing. Normalized data
//! should always pass, so a failure here means something drifted and the whole
//! export is refused with one message per bad record.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use log::{error, info};
use shared::{AmountInput, BackupEnvelope, DisplayNames, Expense, MonthKey, Snapshot, EXPORT_VERSION};

use super::calculations::expenses_in_month;
use super::normalizers::expense_fingerprint;
use super::validation::{validate_amount, validate_category, validate_date, validate_description};
use crate::error::{LedgerError, LedgerResult};

/// Problems that would make `expense` unfit for a backup, one message each.
/// The date is checked against the same range as user input, relative to `today`.
pub fn export_problems(expense: &Expense, today: NaiveDate) -> Vec<String> {
    let mut problems = Vec::new();
    let label = if expense.id.is_empty() { "(no id)" } else { expense.id.as_str() };

    if let Some(message) = validate_description(&expense.description).error_message() {
        problems.push(format!("Expense {}: {}", label, message));
    }
    if let Some(message) = validate_amount(&AmountInput::Number(expense.amount as f64)).error_message() {
        problems.push(format!("Expense {}: {}", label, message));
    }
    if let Some(message) = validate_date(&expense.date.format("%Y-%m-%d").to_string(), today).error_message() {
        problems.push(format!("Expense {}: {}", label, message));
    }
    if let Some(message) = validate_category(&expense.category).error_message() {
        problems.push(format!("Expense {}: {}", label, message));
    }
    if expense.payer_id.is_none() {
        problems.push(format!(
            "Expense {}: payer '{}' is not linked to a household member",
            label,
            expense.payer_legacy.as_deref().unwrap_or("")
        ));
    }
    problems
}

/// Build the versioned backup envelope for `snapshot`
pub fn export_data(snapshot: &Snapshot, now: DateTime<Utc>) -> LedgerResult<BackupEnvelope> {
    info!("📄 EXPORT: Exporting {} expenses", snapshot.expenses.len());

    let today = now.with_timezone(&Local).date_naive();
    let problems: Vec<String> = snapshot
        .expenses
        .iter()
        .flat_map(|expense| export_problems(expense, today))
        .collect();
    if !problems.is_empty() {
        error!("❌ EXPORT: {} problem(s) found, export refused", problems.len());
        return Err(LedgerError::Export(problems));
    }

    let expenses = snapshot
        .expenses
        .iter()
        .map(|expense| Expense {
            fingerprint: expense_fingerprint(expense),
            ..expense.clone()
        })
        .collect();

    Ok(BackupEnvelope {
        version: EXPORT_VERSION.to_string(),
        export_date: now,
        settings: snapshot.settings.clone(),
        monthly_budgets: snapshot.monthly_budgets.clone(),
        expenses,
    })
}

/// Pretty-printed backup JSON
pub fn export_json(snapshot: &Snapshot, now: DateTime<Utc>) -> LedgerResult<String> {
    let envelope = export_data(snapshot, now)?;
    let json = serde_json::to_string_pretty(&envelope)?;
    info!("✅ EXPORT: Backup serialized ({} bytes)", json.len());
    Ok(json)
}

/// One month's expenses as CSV, oldest first: `date,description,category,payer,amount`
pub fn export_month_csv(
    expenses: &[Expense],
    month: MonthKey,
    display_names: &DisplayNames,
) -> Result<String> {
    let mut rows: Vec<&Expense> = expenses_in_month(expenses, month).collect();
    rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.created_at.cmp(&b.created_at)));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["date", "description", "category", "payer", "amount"])?;
    for expense in &rows {
        let payer = match expense.payer_id {
            Some(id) => display_names.name_for(id).to_string(),
            None => expense.payer_legacy.clone().unwrap_or_default(),
        };
        writer.write_record([
            expense.date.format("%Y-%m-%d").to_string(),
            expense.description.clone(),
            expense.category.clone(),
            payer,
            expense.amount.to_string(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .context("Failed to flush CSV writer")?;
    let csv_content = String::from_utf8(bytes).context("CSV output was not valid UTF-8")?;
    info!("📄 EXPORT: {} rows exported for {}", rows.len(), month);
    Ok(csv_content)
}
