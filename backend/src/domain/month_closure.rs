//! Month closure state machine.
//!
//! A month is `open` until explicitly closed. Closing captures immutable totals
//! and settlement snapshots; reopening needs a reason and is appended to the
//! month's audit trail. The lock is soft: [`guard_month_mutation`] is checked by
//! callers before writing, nothing in storage enforces it.

use chrono::{DateTime, NaiveDate, Utc};
use log::info;
use shared::{
    ClosureStatus, Expense, MonthClosure, MonthKey, ReopenEntry, Settings, SettlementRecord,
    SettlementSnapshot,
};
use thiserror::Error;

use super::calculations::{calculate_month_totals, calculate_settlement, settlement_amount};
use super::validation::sanitize_text;

pub const MIN_REOPEN_REASON_LENGTH: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClosureError {
    #[error("Cannot close {0}: the month has no expenses")]
    EmptyMonth(MonthKey),
    #[error("{0} is already closed")]
    AlreadyClosed(MonthKey),
    #[error("{0} is not closed")]
    NotClosed(MonthKey),
    #[error("A reopen reason of at least {min} characters is required")]
    ReasonTooShort { min: usize },
    #[error("{0} is closed; reopen it with a reason before changing its expenses")]
    MonthClosed(MonthKey),
}

pub fn is_month_closed(settings: &Settings, month: MonthKey) -> bool {
    settings
        .month_closures
        .get(&month)
        .is_some_and(|closure| closure.status == ClosureStatus::Closed)
}

/// Close `month`, snapshotting its totals and, when someone owes money, the
/// settlement. The owed settlement is also recorded as completed.
///
/// `settings` is left untouched on error.
pub fn close_month(
    settings: &mut Settings,
    expenses: &[Expense],
    month: MonthKey,
    closed_by: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), ClosureError> {
    if is_month_closed(settings, month) {
        return Err(ClosureError::AlreadyClosed(month));
    }
    let totals = calculate_month_totals(expenses, month);
    if totals.total_expense == 0 {
        return Err(ClosureError::EmptyMonth(month));
    }

    let settlement = calculate_settlement(&totals, &settings.display_names);
    let settlement_snapshot = match (settlement.from, settlement.to) {
        (Some(from), Some(to)) => Some(SettlementSnapshot {
            amount: settlement.amount,
            from_payer_id: from,
            to_payer_id: to,
        }),
        _ => None,
    };

    if let Some(snapshot) = &settlement_snapshot {
        settings.settlements.insert(
            month,
            SettlementRecord {
                amount: snapshot.amount,
                from_payer_id: snapshot.from_payer_id,
                to_payer_id: snapshot.to_payer_id,
                completed_at: now,
                memo: format!("Recorded when closing {}", month),
            },
        );
    }

    let closure = settings.month_closures.entry(month).or_default();
    closure.status = ClosureStatus::Closed;
    closure.closed_at = Some(now);
    closure.closed_by = closed_by.map(sanitize_text).filter(|s| !s.is_empty());
    closure.settlement_snapshot = settlement_snapshot;
    closure.totals_snapshot = Some(totals.snapshot());

    info!("CLOSE: closed {} with total {}", month, totals.total_expense);
    Ok(())
}

/// Reopen a closed month, appending exactly one audit entry
pub fn reopen_month(
    settings: &mut Settings,
    month: MonthKey,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), ClosureError> {
    let reason = sanitize_text(reason);
    if reason.chars().count() < MIN_REOPEN_REASON_LENGTH {
        return Err(ClosureError::ReasonTooShort {
            min: MIN_REOPEN_REASON_LENGTH,
        });
    }
    let closure = match settings.month_closures.get_mut(&month) {
        Some(closure) if closure.status == ClosureStatus::Closed => closure,
        _ => return Err(ClosureError::NotClosed(month)),
    };

    closure.status = ClosureStatus::Open;
    closure.closed_at = None;
    closure.reopen_history.push(ReopenEntry {
        reopened_at: now,
        reason,
    });

    info!(
        "CLOSE: reopened {} ({} reopen(s) so far)",
        month,
        closure.reopen_history.len()
    );
    Ok(())
}

/// True when a closed month's live totals or settlement drifted from its
/// snapshot by at least one unit
pub fn is_closure_outdated(closure: &MonthClosure, expenses: &[Expense], month: MonthKey) -> bool {
    if closure.status != ClosureStatus::Closed {
        return false;
    }
    let Some(snapshot) = &closure.totals_snapshot else {
        return false;
    };

    let live = calculate_month_totals(expenses, month);
    let drifted = |a: i64, b: i64| (a - b).abs() >= 1;
    if drifted(live.member1_total, snapshot.member1_total)
        || drifted(live.member2_total, snapshot.member2_total)
        || drifted(live.invalid_payer_total, snapshot.invalid_payer_total)
        || drifted(live.total_expense, snapshot.total_expense)
    {
        return true;
    }

    let recorded = closure
        .settlement_snapshot
        .as_ref()
        .map(|s| s.amount)
        .unwrap_or(0.0);
    (settlement_amount(&live) - recorded).abs() >= 1.0
}

/// Refuse a write touching any closed month among `dates`
pub fn guard_month_mutation(
    settings: &Settings,
    dates: impl IntoIterator<Item = NaiveDate>,
) -> Result<(), ClosureError> {
    for date in dates {
        let month = MonthKey::from_date(date);
        if is_month_closed(settings, month) {
            return Err(ClosureError::MonthClosed(month));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{expense, settings_with_names};
    use chrono::TimeZone;
    use shared::PayerId;

    fn february() -> MonthKey {
        MonthKey::new(2026, 2).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn ledger() -> Vec<Expense> {
        vec![
            expense("2026-02-03", 3200, "食費", PayerId::Member1),
            expense("2026-02-04", 800, "日用品", PayerId::Member2),
        ]
    }

    #[test]
    fn test_close_snapshots_totals_and_settlement() {
        let mut settings = settings_with_names("Taro", "Hanako");
        close_month(&mut settings, &ledger(), february(), Some("Taro"), now()).unwrap();

        let closure = &settings.month_closures[&february()];
        assert_eq!(closure.status, ClosureStatus::Closed);
        assert_eq!(closure.closed_at, Some(now()));
        assert_eq!(closure.closed_by.as_deref(), Some("Taro"));
        assert_eq!(closure.totals_snapshot.as_ref().unwrap().total_expense, 4000);

        let snapshot = closure.settlement_snapshot.as_ref().unwrap();
        assert_eq!(snapshot.amount, 1200.0);
        assert_eq!(snapshot.from_payer_id, PayerId::Member2);

        let record = &settings.settlements[&february()];
        assert_eq!(record.amount, 1200.0);
        assert_eq!(record.completed_at, now());
        assert!(is_month_closed(&settings, february()));
    }

    #[test]
    fn test_close_even_month_records_no_settlement() {
        let mut settings = Settings::default();
        let expenses = vec![
            expense("2026-02-03", 1000, "食費", PayerId::Member1),
            expense("2026-02-04", 1000, "食費", PayerId::Member2),
        ];
        close_month(&mut settings, &expenses, february(), None, now()).unwrap();
        assert!(settings.month_closures[&february()].settlement_snapshot.is_none());
        assert!(settings.settlements.is_empty());
    }

    #[test]
    fn test_close_empty_month_fails_without_mutation() {
        let mut settings = Settings::default();
        let before = settings.clone();
        let expenses = vec![expense("2026-01-03", 1000, "食費", PayerId::Member1)];

        let result = close_month(&mut settings, &expenses, february(), None, now());
        assert_eq!(result, Err(ClosureError::EmptyMonth(february())));
        assert_eq!(settings, before);
    }

    #[test]
    fn test_close_twice_is_rejected() {
        let mut settings = Settings::default();
        close_month(&mut settings, &ledger(), february(), None, now()).unwrap();
        let result = close_month(&mut settings, &ledger(), february(), None, now());
        assert_eq!(result, Err(ClosureError::AlreadyClosed(february())));
    }

    #[test]
    fn test_reopen_appends_audit_entries() {
        let mut settings = Settings::default();
        close_month(&mut settings, &ledger(), february(), None, now()).unwrap();
        reopen_month(&mut settings, february(), "forgot a receipt", now()).unwrap();

        let closure = &settings.month_closures[&february()];
        assert_eq!(closure.status, ClosureStatus::Open);
        assert_eq!(closure.closed_at, None);
        assert!(closure.totals_snapshot.is_some());
        assert_eq!(closure.reopen_history.len(), 1);
        let first = closure.reopen_history[0].clone();

        close_month(&mut settings, &ledger(), february(), None, now()).unwrap();
        reopen_month(&mut settings, february(), "typo", now()).unwrap();
        let history = &settings.month_closures[&february()].reopen_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], first);
        assert_eq!(history[1].reason, "typo");
    }

    #[test]
    fn test_reopen_requires_reason_and_closed_month() {
        let mut settings = Settings::default();
        assert_eq!(
            reopen_month(&mut settings, february(), "because", now()),
            Err(ClosureError::NotClosed(february()))
        );

        close_month(&mut settings, &ledger(), february(), None, now()).unwrap();
        assert_eq!(
            reopen_month(&mut settings, february(), "  <a> ", now()),
            Err(ClosureError::ReasonTooShort { min: 3 })
        );
        assert!(is_month_closed(&settings, february()));
    }

    #[test]
    fn test_outdated_closure_detection() {
        let mut settings = Settings::default();
        let mut expenses = ledger();
        close_month(&mut settings, &expenses, february(), None, now()).unwrap();
        let closure = settings.month_closures[&february()].clone();
        assert!(!is_closure_outdated(&closure, &expenses, february()));

        expenses.push(expense("2026-03-01", 500, "食費", PayerId::Member1));
        assert!(!is_closure_outdated(&closure, &expenses, february()));

        expenses.push(expense("2026-02-20", 1, "食費", PayerId::Member2));
        assert!(is_closure_outdated(&closure, &expenses, february()));
    }

    #[test]
    fn test_guard_blocks_closed_months_only() {
        let mut settings = Settings::default();
        close_month(&mut settings, &ledger(), february(), None, now()).unwrap();

        let in_february = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let in_march = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(
            guard_month_mutation(&settings, [in_march, in_february]),
            Err(ClosureError::MonthClosed(february()))
        );
        assert!(guard_month_mutation(&settings, [in_march]).is_ok());
    }
}
