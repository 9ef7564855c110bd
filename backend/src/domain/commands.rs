//! Domain-level command and result types.
//!
//! These structs are the inputs and outputs of repository operations. The
//! plain data they carry lives in the `shared` crate; the wrappers here only
//! bundle it per operation.

pub mod expenses {
    use shared::{Expense, ExpenseDraft, Settings, Snapshot};

    /// Input for creating or updating an expense.
    ///
    /// `settings` is the caller's last-known settings; payer resolution and
    /// the closed-month guard use it rather than any cached state.
    #[derive(Debug, Clone)]
    pub struct SaveExpenseCommand {
        pub draft: ExpenseDraft,
        /// Present when editing: id and `createdAt` are preserved
        pub existing: Option<Expense>,
        pub settings: Settings,
    }

    /// Result of a successful save.
    #[derive(Debug, Clone)]
    pub struct SaveExpenseResult {
        pub expense: Expense,
        pub snapshot: Snapshot,
    }
}

pub mod settings {
    use shared::{MonthKey, PayerId};

    /// Input for renaming the household members.
    #[derive(Debug, Clone)]
    pub struct SaveDisplayNamesCommand {
        pub member1: String,
        pub member2: String,
    }

    /// Input for recording that a month was settled up.
    #[derive(Debug, Clone)]
    pub struct SaveSettlementCommand {
        pub month: MonthKey,
        pub amount: f64,
        pub from_payer_id: PayerId,
        pub to_payer_id: PayerId,
        pub memo: String,
    }

    /// Input for closing a month.
    #[derive(Debug, Clone)]
    pub struct CloseMonthCommand {
        pub month: MonthKey,
        pub closed_by: Option<String>,
    }

    /// Input for reopening a closed month.
    #[derive(Debug, Clone)]
    pub struct ReopenMonthCommand {
        pub month: MonthKey,
        pub reason: String,
    }
}

pub mod import {
    use shared::{ImportSummary, Snapshot};

    /// Result of an import call; `snapshot` is unchanged for dry runs.
    #[derive(Debug, Clone)]
    pub struct ImportOutcome {
        pub summary: ImportSummary,
        pub snapshot: Snapshot,
    }
}
