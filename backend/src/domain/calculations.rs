//! Totals and the live settlement.
//!
//! Spending whose payer is unresolved is tracked in its own bucket. It counts
//! toward the headline total but never toward the 50/50 split.

use shared::{DisplayNames, Expense, MonthKey, PayerId, Settlement, Totals};

/// Differences below this are treated as already even
pub const SETTLEMENT_EPSILON: f64 = 0.01;

/// Expenses dated inside `month`
pub fn expenses_in_month<'a>(
    expenses: &'a [Expense],
    month: MonthKey,
) -> impl Iterator<Item = &'a Expense> + 'a {
    expenses.iter().filter(move |e| month.contains(e.date))
}

/// Single pass over `expenses` accumulating per-payer and per-category totals
pub fn calculate_totals<'a>(expenses: impl IntoIterator<Item = &'a Expense>) -> Totals {
    let mut totals = Totals::default();
    for expense in expenses {
        match expense.payer_id {
            Some(PayerId::Member1) => totals.member1_total += expense.amount,
            Some(PayerId::Member2) => totals.member2_total += expense.amount,
            None => totals.invalid_payer_total += expense.amount,
        }
        *totals
            .category_totals
            .entry(expense.category.clone())
            .or_insert(0) += expense.amount;
    }
    totals.total_expense = totals.member1_total + totals.member2_total + totals.invalid_payer_total;
    totals
}

pub fn calculate_month_totals(expenses: &[Expense], month: MonthKey) -> Totals {
    calculate_totals(expenses_in_month(expenses, month))
}

/// Half the gap between the two members, ignoring unattributed spending
pub fn settlement_amount(totals: &Totals) -> f64 {
    (totals.member1_total - totals.member2_total).abs() as f64 / 2.0
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("¥{:.0}", amount)
    } else {
        format!("¥{:.1}", amount)
    }
}

/// Derive who owes whom from `totals`.
///
/// The member above the fair share is owed the difference by the other. When
/// unattributed spending exists the message carries a note saying it was left
/// out.
pub fn calculate_settlement(totals: &Totals, display_names: &DisplayNames) -> Settlement {
    let fair_share = (totals.member1_total + totals.member2_total) as f64 / 2.0;
    let amount = settlement_amount(totals);

    let mut settlement = if amount < SETTLEMENT_EPSILON {
        Settlement {
            amount: 0.0,
            fair_share,
            from: None,
            to: None,
            from_name: None,
            to_name: None,
            message: "Spending is even; nobody owes anything.".to_string(),
        }
    } else {
        let to = if totals.member1_total > totals.member2_total {
            PayerId::Member1
        } else {
            PayerId::Member2
        };
        let from = to.other();
        let from_name = display_names.name_for(from).to_string();
        let to_name = display_names.name_for(to).to_string();
        Settlement {
            amount,
            fair_share,
            message: format!("{} owes {} {}.", from_name, to_name, format_amount(amount)),
            from: Some(from),
            to: Some(to),
            from_name: Some(from_name),
            to_name: Some(to_name),
        }
    };

    if totals.invalid_payer_total > 0 {
        settlement.message.push_str(&format!(
            " Note: {} paid by an unknown payer is excluded from this calculation.",
            format_amount(totals.invalid_payer_total as f64)
        ));
    }
    settlement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{expense, unattributed_expense};

    fn totals(member1: i64, member2: i64, invalid: i64) -> Totals {
        Totals {
            member1_total: member1,
            member2_total: member2,
            invalid_payer_total: invalid,
            total_expense: member1 + member2 + invalid,
            ..Totals::default()
        }
    }

    #[test]
    fn test_totals_bucket_by_payer_and_category() {
        let expenses = vec![
            expense("2026-02-01", 3000, "食費", PayerId::Member1),
            expense("2026-02-02", 200, "日用品", PayerId::Member1),
            expense("2026-02-03", 800, "食費", PayerId::Member2),
            unattributed_expense("2026-02-04", 500, "娯楽費", "Jiro"),
        ];
        let totals = calculate_totals(&expenses);

        assert_eq!(totals.member1_total, 3200);
        assert_eq!(totals.member2_total, 800);
        assert_eq!(totals.invalid_payer_total, 500);
        assert_eq!(totals.total_expense, 4500);
        assert_eq!(totals.category_totals.get("食費"), Some(&3800));
        assert_eq!(totals.category_totals.get("娯楽費"), Some(&500));
    }

    #[test]
    fn test_month_totals_only_count_that_month() {
        let expenses = vec![
            expense("2026-02-28", 1000, "食費", PayerId::Member1),
            expense("2026-03-01", 9000, "食費", PayerId::Member1),
        ];
        let february = MonthKey::new(2026, 2).unwrap();
        assert_eq!(calculate_month_totals(&expenses, february).total_expense, 1000);
    }

    #[test]
    fn test_settlement_direction_and_amount() {
        let settlement = calculate_settlement(&totals(3200, 800, 0), &DisplayNames::new("Taro", "Hanako"));
        assert_eq!(settlement.fair_share, 2000.0);
        assert_eq!(settlement.amount, 1200.0);
        assert_eq!(settlement.from, Some(PayerId::Member2));
        assert_eq!(settlement.to, Some(PayerId::Member1));
        assert_eq!(settlement.message, "Hanako owes Taro ¥1200.");
    }

    #[test]
    fn test_settlement_even_at_any_magnitude() {
        for amount in [0, 1, 5_000_000] {
            let settlement = calculate_settlement(&totals(amount, amount, 0), &DisplayNames::default());
            assert_eq!(settlement.amount, 0.0);
            assert!(settlement.is_even());
            assert!(settlement.message.contains("even"));
        }
    }

    #[test]
    fn test_settlement_excludes_unattributed_spending() {
        let settlement = calculate_settlement(&totals(1000, 1000, 500), &DisplayNames::default());
        assert_eq!(settlement.fair_share, 1000.0);
        assert!(settlement.is_even());
        assert!(settlement.message.contains("¥500 paid by an unknown payer is excluded"));
    }

    #[test]
    fn test_settlement_half_unit_amounts() {
        let settlement = calculate_settlement(&totals(1001, 0, 0), &DisplayNames::default());
        assert_eq!(settlement.amount, 500.5);
        assert!(settlement.message.ends_with("¥500.5."));
    }

    #[test]
    fn test_rename_only_changes_labels() {
        let before = calculate_settlement(&totals(3200, 800, 0), &DisplayNames::new("Taro", "Hanako"));
        let after = calculate_settlement(&totals(3200, 800, 0), &DisplayNames::new("Taro", "Hana"));
        assert_eq!(before.amount, after.amount);
        assert_eq!(before.from, after.from);
        assert_eq!(after.from_name.as_deref(), Some("Hana"));
    }
}
