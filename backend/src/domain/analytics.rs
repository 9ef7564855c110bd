//! Derived statistics over the ledger: KPIs, budget status, category trend,
//! anomaly checks and recurring-expense suggestions.
//!
//! Everything here is advisory and read-only. The `*_with_config` variants take
//! their thresholds from [`AnalyticsConfig`]; the plain functions use the defaults.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use shared::{
    is_known_category, AnomalyCheck, BudgetStatus, CategoryDelta, Expense, MonthCategoryTotals,
    MonthKey, MonthlyBudgets, MonthlyKpis, PayerId, RecurringSuggestion, SixMonthTrend, CATEGORIES,
};

use super::calculations::{calculate_month_totals, settlement_amount};
use crate::config::AnalyticsConfig;

/// Sum of the known-category ceilings budgeted for `month`
pub fn budget_total(budgets: &MonthlyBudgets, month: MonthKey) -> i64 {
    budgets
        .get(&month)
        .map(|ceilings| {
            ceilings
                .iter()
                .filter(|(category, _)| is_known_category(category))
                .map(|(_, amount)| *amount)
                .sum()
        })
        .unwrap_or(0)
}

pub fn calculate_monthly_kpis(
    expenses: &[Expense],
    budgets: &MonthlyBudgets,
    month: MonthKey,
) -> MonthlyKpis {
    let current = calculate_month_totals(expenses, month);
    let previous = calculate_month_totals(expenses, month.previous());
    let budget_total = budget_total(budgets, month);

    MonthlyKpis {
        month,
        spent: current.total_expense,
        previous_spent: previous.total_expense,
        budget_total,
        budget_delta: budget_total - current.total_expense,
        month_over_month_delta: current.total_expense - previous.total_expense,
        settlement_forecast: settlement_amount(&current),
    }
}

/// Budget vs. actual for every known category that has a ceiling this month,
/// in category-list order
pub fn calculate_budget_status(
    expenses: &[Expense],
    budgets: &MonthlyBudgets,
    month: MonthKey,
) -> Vec<BudgetStatus> {
    let Some(ceilings) = budgets.get(&month) else {
        return Vec::new();
    };
    let totals = calculate_month_totals(expenses, month);

    CATEGORIES
        .iter()
        .filter_map(|category| {
            let budget = *ceilings.get(*category)?;
            let spent = totals.category_totals.get(*category).copied().unwrap_or(0);
            Some(BudgetStatus {
                category: category.to_string(),
                budget,
                spent,
                remaining: budget - spent,
                over_budget: spent > budget,
            })
        })
        .collect()
}

pub fn calculate_six_month_trend(expenses: &[Expense], current_month: MonthKey) -> SixMonthTrend {
    calculate_six_month_trend_with_config(expenses, current_month, &AnalyticsConfig::default())
}

/// Per-category totals for the trailing months, plus the biggest movers
/// between the two most recent months
pub fn calculate_six_month_trend_with_config(
    expenses: &[Expense],
    current_month: MonthKey,
    config: &AnalyticsConfig,
) -> SixMonthTrend {
    let months: Vec<MonthCategoryTotals> = current_month
        .trailing(config.trend_months.max(2))
        .into_iter()
        .map(|month| MonthCategoryTotals {
            month,
            totals: calculate_month_totals(expenses, month).category_totals,
        })
        .collect();

    let empty = BTreeMap::new();
    let (previous, current) = match months.as_slice() {
        [.., previous, current] => (&previous.totals, &current.totals),
        _ => (&empty, &empty),
    };

    let categories: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
    let deltas: Vec<CategoryDelta> = categories
        .into_iter()
        .map(|category| {
            let previous = previous.get(category).copied().unwrap_or(0);
            let current = current.get(category).copied().unwrap_or(0);
            CategoryDelta {
                category: category.clone(),
                previous,
                current,
                difference: current - previous,
            }
        })
        .collect();

    let by_magnitude = |a: &CategoryDelta, b: &CategoryDelta| {
        b.difference
            .abs()
            .cmp(&a.difference.abs())
            .then_with(|| a.category.cmp(&b.category))
    };

    let mut top_increases: Vec<CategoryDelta> =
        deltas.iter().filter(|d| d.difference > 0).cloned().collect();
    top_increases.sort_by(by_magnitude);
    top_increases.truncate(config.trend_top_n);

    let mut top_decreases: Vec<CategoryDelta> =
        deltas.into_iter().filter(|d| d.difference < 0).collect();
    top_decreases.sort_by(by_magnitude);
    top_decreases.truncate(config.trend_top_n);

    SixMonthTrend {
        months,
        top_increases,
        top_decreases,
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn description_key(description: &str) -> String {
    description.trim().to_lowercase()
}

pub fn detect_expense_anomaly(candidate: &Expense, history: &[Expense]) -> AnomalyCheck {
    detect_expense_anomaly_with_config(candidate, history, &AnalyticsConfig::default())
}

/// Compare `candidate` with earlier expenses sharing its payer, category and
/// description. Expenses dated after the candidate never count as history.
/// Fewer than `anomaly_min_samples` matches is not evaluable.
pub fn detect_expense_anomaly_with_config(
    candidate: &Expense,
    history: &[Expense],
    config: &AnalyticsConfig,
) -> AnomalyCheck {
    let key = description_key(&candidate.description);
    let mut samples: Vec<f64> = history
        .iter()
        .filter(|e| e.id.is_empty() || e.id != candidate.id)
        .filter(|e| e.date <= candidate.date)
        .filter(|e| {
            e.payer_id == candidate.payer_id
                && e.category == candidate.category
                && description_key(&e.description) == key
        })
        .map(|e| e.amount as f64)
        .collect();

    let sample_count = samples.len();
    if sample_count < config.anomaly_min_samples {
        return AnomalyCheck {
            evaluable: false,
            is_anomaly: false,
            sample_count,
            median: None,
            threshold: None,
        };
    }

    let median = median(&mut samples);
    let threshold = median.map(|m| m * config.anomaly_multiplier);
    AnomalyCheck {
        evaluable: true,
        is_anomaly: threshold.is_some_and(|t| candidate.amount as f64 > t),
        sample_count,
        median,
        threshold,
    }
}

pub fn suggest_recurring_expenses(expenses: &[Expense], target_month: MonthKey) -> Vec<RecurringSuggestion> {
    suggest_recurring_expenses_with_config(expenses, target_month, &AnalyticsConfig::default())
}

/// Expenses that showed up at least twice before `target_month` and have not
/// been entered for it yet, most frequent first
pub fn suggest_recurring_expenses_with_config(
    expenses: &[Expense],
    target_month: MonthKey,
    config: &AnalyticsConfig,
) -> Vec<RecurringSuggestion> {
    let mut history: BTreeMap<(String, String, PayerId), Vec<&Expense>> = BTreeMap::new();
    let mut present: BTreeSet<(String, String, PayerId)> = BTreeSet::new();

    for expense in expenses {
        let Some(payer_id) = expense.payer_id else {
            continue;
        };
        let key = (description_key(&expense.description), expense.category.clone(), payer_id);
        if target_month.contains(expense.date) {
            present.insert(key);
        } else if expense.date < target_month.first_day() {
            history.entry(key).or_default().push(expense);
        }
    }

    let mut suggestions: Vec<RecurringSuggestion> = history
        .into_iter()
        .filter(|(key, rows)| rows.len() >= 2 && !present.contains(key))
        .filter_map(|(_, rows)| {
            let latest = rows
                .iter()
                .max_by(|a, b| a.date.cmp(&b.date).then_with(|| a.created_at.cmp(&b.created_at)))?;
            let mut amounts: Vec<f64> = rows.iter().map(|e| e.amount as f64).collect();
            let suggested = median(&mut amounts)?.round() as i64;
            Some(RecurringSuggestion {
                description: latest.description.clone(),
                category: latest.category.clone(),
                payer_id: latest.payer_id?,
                suggested_amount: suggested,
                occurrence_count: rows.len(),
                last_date: latest.date,
            })
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.occurrence_count
            .cmp(&a.occurrence_count)
            .then_with(|| b.last_date.cmp(&a.last_date))
            .then_with(|| a.description.cmp(&b.description))
    });
    suggestions.truncate(config.suggestion_limit);
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{expense, expense_with_description, unattributed_expense};

    fn month(raw: &str) -> MonthKey {
        MonthKey::parse(raw).unwrap()
    }

    #[test]
    fn test_monthly_kpis() {
        let expenses = vec![
            expense("2026-02-03", 3200, "食費", PayerId::Member1),
            expense("2026-02-04", 800, "日用品", PayerId::Member2),
            expense("2026-01-10", 2500, "食費", PayerId::Member1),
        ];
        let mut budgets = MonthlyBudgets::new();
        budgets.insert(
            month("2026-02"),
            BTreeMap::from([
                ("食費".to_string(), 4000),
                ("日用品".to_string(), 1000),
                ("ペット".to_string(), 9999),
            ]),
        );

        let kpis = calculate_monthly_kpis(&expenses, &budgets, month("2026-02"));
        assert_eq!(kpis.spent, 4000);
        assert_eq!(kpis.previous_spent, 2500);
        assert_eq!(kpis.budget_total, 5000);
        assert_eq!(kpis.budget_delta, 1000);
        assert_eq!(kpis.month_over_month_delta, 1500);
        assert_eq!(kpis.settlement_forecast, 1200.0);
    }

    #[test]
    fn test_budget_status_flags_overspending() {
        let expenses = vec![expense("2026-02-03", 4500, "食費", PayerId::Member1)];
        let mut budgets = MonthlyBudgets::new();
        budgets.insert(
            month("2026-02"),
            BTreeMap::from([("食費".to_string(), 4000), ("日用品".to_string(), 1000)]),
        );

        let status = calculate_budget_status(&expenses, &budgets, month("2026-02"));
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].category, "食費");
        assert_eq!(status[0].remaining, -500);
        assert!(status[0].over_budget);
        assert_eq!(status[1].spent, 0);
        assert!(!status[1].over_budget);

        assert!(calculate_budget_status(&expenses, &budgets, month("2026-03")).is_empty());
    }

    #[test]
    fn test_six_month_trend_diffs_last_two_months() {
        let expenses = vec![
            expense("2025-09-15", 99999, "食費", PayerId::Member1),
            expense("2025-10-15", 100, "食費", PayerId::Member1),
            expense("2026-02-10", 1000, "食費", PayerId::Member1),
            expense("2026-02-11", 500, "交通費", PayerId::Member2),
            expense("2026-03-01", 4000, "食費", PayerId::Member1),
            expense("2026-03-02", 300, "娯楽費", PayerId::Member2),
        ];
        let trend = calculate_six_month_trend(&expenses, month("2026-03"));

        assert_eq!(trend.months.len(), 6);
        assert_eq!(trend.months[0].month, month("2025-10"));
        assert_eq!(trend.months[0].totals.get("食費"), Some(&100));

        let increases: Vec<(&str, i64)> = trend
            .top_increases
            .iter()
            .map(|d| (d.category.as_str(), d.difference))
            .collect();
        assert_eq!(increases, vec![("食費", 3000), ("娯楽費", 300)]);

        assert_eq!(trend.top_decreases.len(), 1);
        assert_eq!(trend.top_decreases[0].category, "交通費");
        assert_eq!(trend.top_decreases[0].current, 0);
        assert_eq!(trend.top_decreases[0].difference, -500);
    }

    #[test]
    fn test_trend_keeps_only_top_three() {
        let categories = ["食費", "日用品", "交通費", "娯楽費"];
        let expenses: Vec<Expense> = categories
            .iter()
            .enumerate()
            .map(|(i, c)| expense("2026-03-05", 100 * (i as i64 + 1), c, PayerId::Member1))
            .collect();
        let trend = calculate_six_month_trend(&expenses, month("2026-03"));
        assert_eq!(trend.top_increases.len(), 3);
        assert_eq!(trend.top_increases[0].category, "娯楽費");
        assert!(trend.top_decreases.is_empty());
    }

    fn lunch_history(amounts: &[i64]) -> Vec<Expense> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| {
                let date = format!("2026-01-{:02}", i + 1);
                expense_with_description(&date, *amount, "食費", PayerId::Member1, "Lunch")
            })
            .collect()
    }

    #[test]
    fn test_anomaly_threshold() {
        let history = lunch_history(&[900, 1000, 1100]);

        let high = expense_with_description("2026-02-01", 2600, "食費", PayerId::Member1, " lunch ");
        let check = detect_expense_anomaly(&high, &history);
        assert!(check.evaluable);
        assert!(check.is_anomaly);
        assert_eq!(check.median, Some(1000.0));
        assert_eq!(check.threshold, Some(2500.0));

        let normal = expense_with_description("2026-02-01", 2400, "食費", PayerId::Member1, "Lunch");
        assert!(!detect_expense_anomaly(&normal, &history).is_anomaly);
    }

    #[test]
    fn test_anomaly_needs_three_matching_samples() {
        let mut history = lunch_history(&[1000, 1000]);
        history.push(expense_with_description("2026-01-20", 1000, "食費", PayerId::Member2, "Lunch"));
        history.push(expense_with_description("2026-01-21", 1000, "娯楽費", PayerId::Member1, "Lunch"));

        let candidate = expense_with_description("2026-02-01", 9000, "食費", PayerId::Member1, "Lunch");
        let check = detect_expense_anomaly(&candidate, &history);
        assert!(!check.evaluable);
        assert!(!check.is_anomaly);
        assert_eq!(check.sample_count, 2);
    }

    #[test]
    fn test_anomaly_ignores_the_candidate_itself() {
        let mut history = lunch_history(&[1000, 1000, 1000]);
        let candidate = history[0].clone();
        history[0].amount = 9000;
        let mut edited = candidate.clone();
        edited.amount = 9000;
        let check = detect_expense_anomaly(&edited, &history);
        assert_eq!(check.sample_count, 2);
        assert!(!check.evaluable);
    }

    #[test]
    fn test_anomaly_ignores_later_expenses() {
        let later: Vec<Expense> = ["2026-05-10", "2026-06-10", "2026-07-10"]
            .iter()
            .map(|date| expense_with_description(date, 1000, "食費", PayerId::Member1, "Lunch"))
            .collect();

        let backdated = expense_with_description("2026-01-01", 5000, "食費", PayerId::Member1, "Lunch");
        let check = detect_expense_anomaly(&backdated, &later);
        assert_eq!(check.sample_count, 0);
        assert!(!check.evaluable);
        assert!(!check.is_anomaly);

        let same_day = expense_with_description("2026-07-10", 5000, "食費", PayerId::Member1, "Lunch");
        let check = detect_expense_anomaly(&same_day, &later);
        assert_eq!(check.sample_count, 3);
        assert!(check.is_anomaly);
    }

    #[test]
    fn test_recurring_suggestions() {
        let mut expenses = vec![
            expense_with_description("2025-12-25", 4800, "通信費", PayerId::Member1, "Phone"),
            expense_with_description("2026-01-25", 5000, "通信費", PayerId::Member1, "phone"),
            expense_with_description("2026-02-25", 5100, "通信費", PayerId::Member1, "Phone bill "),
            expense_with_description("2026-01-05", 8000, "住居費", PayerId::Member2, "Rent share"),
            expense_with_description("2026-02-05", 8000, "住居費", PayerId::Member2, "Rent share"),
            expense_with_description("2026-03-05", 8000, "住居費", PayerId::Member2, "Rent share"),
            expense_with_description("2026-02-14", 3000, "娯楽費", PayerId::Member1, "Cinema"),
        ];
        expenses.push(unattributed_expense("2026-01-01", 100, "その他", "Jiro"));
        expenses.push(unattributed_expense("2026-02-01", 100, "その他", "Jiro"));

        let suggestions = suggest_recurring_expenses(&expenses, month("2026-03"));
        assert_eq!(suggestions.len(), 1);
        let phone = &suggestions[0];
        assert_eq!(phone.description, "phone");
        assert_eq!(phone.occurrence_count, 2);
        assert_eq!(phone.suggested_amount, 4900);
        assert_eq!(phone.last_date.to_string(), "2026-01-25");
    }

    #[test]
    fn test_recurring_suggestions_ranked_and_limited() {
        let mut expenses = Vec::new();
        for (description, count) in [("A", 2), ("B", 5), ("C", 3), ("D", 4)] {
            for i in 0..count {
                let date = format!("2025-{:02}-10", i + 1);
                expenses.push(expense_with_description(&date, 1000, "その他", PayerId::Member1, description));
            }
        }
        let suggestions = suggest_recurring_expenses(&expenses, month("2026-03"));
        let names: Vec<&str> = suggestions.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(names, vec!["B", "D", "C"]);
    }
}
