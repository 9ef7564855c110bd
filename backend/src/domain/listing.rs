//! Month view and search over an in-memory ledger.

use shared::{Expense, ListOptions, MonthKey};

fn matches_term(expense: &Expense, term: &str) -> bool {
    expense.description.to_lowercase().contains(term)
        || expense.category.to_lowercase().contains(term)
        || expense
            .payer_legacy
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(term))
}

/// Expenses for `month`, newest first.
///
/// While searching with a non-blank term the month is ignored and every
/// expense matching the term (description, category or legacy payer name,
/// case-insensitive) is returned instead.
pub fn list_by_month(expenses: &[Expense], month: MonthKey, options: &ListOptions) -> Vec<Expense> {
    let term = options.search_term.trim().to_lowercase();
    let searching = options.is_searching && !term.is_empty();

    let mut listed: Vec<Expense> = expenses
        .iter()
        .filter(|e| {
            if searching {
                matches_term(e, &term)
            } else {
                month.contains(e.date)
            }
        })
        .cloned()
        .collect();

    listed.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.created_at.cmp(&a.created_at)));
    listed
}
