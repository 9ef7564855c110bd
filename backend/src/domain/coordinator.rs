//! # Ledger Coordinator
//!
//! Sequences repository calls that need a user decision part-way through:
//!
//! - saving or deleting an expense in a closed month (reopen with a reason first)
//! - saving an amount far above the usual one (confirm the anomaly)
//! - importing a backup (dry run, confirm the summary, then commit)
//!
//! When a decision is needed the coordinator sends a [`DecisionRequest`] on
//! its channel and waits on the request's responder. The UI answers with
//! [`DecisionRequest::confirm`], [`DecisionRequest::confirm_with_reason`] or
//! [`DecisionRequest::decline`]. Declining, or dropping the request, returns
//! [`GuardedOutcome::Cancelled`] and the guarded write never happens.
//!
//! The pure domain modules stay decision-free; all prompting lives here.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use log::{info, warn};
use serde_json::Value;
use shared::{
    AnomalyCheck, ImportOptions, ImportSummary, MonthKey, RecurringSuggestion, SixMonthTrend, Snapshot,
};
use tokio::sync::{mpsc, oneshot};

use super::analytics::{
    calculate_six_month_trend_with_config, detect_expense_anomaly_with_config,
    suggest_recurring_expenses_with_config,
};
use super::commands::expenses::{SaveExpenseCommand, SaveExpenseResult};
use super::commands::import::ImportOutcome;
use super::commands::settings::ReopenMonthCommand;
use super::expense_service::draft_candidate;
use super::month_closure::{is_month_closed, ClosureError};
use crate::config::AnalyticsConfig;
use crate::error::LedgerResult;
use crate::storage::{local_today, LedgerRepository};

/// Pending prompts the UI can have open at once
const DECISION_CHANNEL_CAPACITY: usize = 8;

/// What the user is being asked
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionPrompt {
    /// Reopen a closed month; answer with a reason
    ReopenMonth { month: MonthKey },
    /// Save an amount well above the usual one for this expense
    ConfirmAnomaly {
        description: String,
        amount: i64,
        check: AnomalyCheck,
    },
    /// Commit an import whose dry-run summary is attached
    ConfirmImport { summary: ImportSummary },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Confirm,
    ConfirmWithReason(String),
    Decline,
}

/// A prompt waiting for an answer. Dropping it counts as declining.
#[derive(Debug)]
pub struct DecisionRequest {
    prompt: DecisionPrompt,
    responder: oneshot::Sender<Decision>,
}

impl DecisionRequest {
    pub fn prompt(&self) -> &DecisionPrompt {
        &self.prompt
    }

    pub fn confirm(self) {
        self.respond(Decision::Confirm);
    }

    pub fn confirm_with_reason(self, reason: impl Into<String>) {
        self.respond(Decision::ConfirmWithReason(reason.into()));
    }

    pub fn decline(self) {
        self.respond(Decision::Decline);
    }

    fn respond(self, decision: Decision) {
        // The waiting operation may already be gone.
        let _ = self.responder.send(decision);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardedOutcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> GuardedOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GuardedOutcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            GuardedOutcome::Completed(value) => Some(value),
            GuardedOutcome::Cancelled => None,
        }
    }
}

pub struct LedgerCoordinator {
    repository: Arc<dyn LedgerRepository>,
    analytics: AnalyticsConfig,
    decisions: mpsc::Sender<DecisionRequest>,
}

impl LedgerCoordinator {
    /// Returns the coordinator and the receiver the UI answers prompts from
    pub fn new(
        repository: Arc<dyn LedgerRepository>,
        analytics: AnalyticsConfig,
    ) -> (Self, mpsc::Receiver<DecisionRequest>) {
        let (decisions, receiver) = mpsc::channel(DECISION_CHANNEL_CAPACITY);
        (
            Self {
                repository,
                analytics,
                decisions,
            },
            receiver,
        )
    }

    pub fn repository(&self) -> &Arc<dyn LedgerRepository> {
        &self.repository
    }

    async fn ask(&self, prompt: DecisionPrompt) -> Decision {
        let (responder, answer) = oneshot::channel();
        if self.decisions.send(DecisionRequest { prompt, responder }).await.is_err() {
            warn!("⚠️ PROMPT: nobody is listening for decisions, cancelling");
            return Decision::Decline;
        }
        answer.await.unwrap_or(Decision::Decline)
    }

    /// Ask to reopen `month`; the refreshed snapshot once it is open again
    async fn reopen_with_prompt(&self, month: MonthKey) -> LedgerResult<Option<Snapshot>> {
        match self.ask(DecisionPrompt::ReopenMonth { month }).await {
            Decision::ConfirmWithReason(reason) => {
                let snapshot = self
                    .repository
                    .reopen_month(ReopenMonthCommand { month, reason })
                    .await?;
                Ok(Some(snapshot))
            }
            Decision::Confirm => {
                info!("PROMPT: reopening {} needs a reason, cancelling", month);
                Ok(None)
            }
            Decision::Decline => {
                info!("PROMPT: reopening {} declined", month);
                Ok(None)
            }
        }
    }

    /// Reopen a closed month after asking for the reason
    pub async fn reopen_month(&self, month: MonthKey) -> LedgerResult<GuardedOutcome<Snapshot>> {
        let snapshot = self.repository.load_snapshot().await?;
        if !is_month_closed(&snapshot.settings, month) {
            return Err(ClosureError::NotClosed(month).into());
        }
        Ok(match self.reopen_with_prompt(month).await? {
            Some(snapshot) => GuardedOutcome::Completed(snapshot),
            None => GuardedOutcome::Cancelled,
        })
    }

    /// Save an expense. Closed months touched by the old or new date must be
    /// reopened first, and an anomalous amount must be confirmed.
    pub async fn save_expense(&self, mut command: SaveExpenseCommand) -> LedgerResult<GuardedOutcome<SaveExpenseResult>> {
        let mut snapshot = self.repository.load_snapshot().await?;

        let new_month = NaiveDate::parse_from_str(command.draft.date.trim(), "%Y-%m-%d")
            .ok()
            .map(MonthKey::from_date);
        let old_month = command.existing.as_ref().map(|e| MonthKey::from_date(e.date));
        let touched: BTreeSet<MonthKey> = new_month.into_iter().chain(old_month).collect();

        for month in touched {
            if is_month_closed(&snapshot.settings, month) {
                match self.reopen_with_prompt(month).await? {
                    Some(reopened) => snapshot = reopened,
                    None => return Ok(GuardedOutcome::Cancelled),
                }
            }
        }
        command.settings = snapshot.settings.clone();

        if let Some(mut candidate) = draft_candidate(&command.draft, &command.settings, local_today()) {
            if let Some(existing) = &command.existing {
                candidate.id = existing.id.clone();
            }
            let check = detect_expense_anomaly_with_config(&candidate, &snapshot.expenses, &self.analytics);
            if check.is_anomaly {
                let prompt = DecisionPrompt::ConfirmAnomaly {
                    description: candidate.description.clone(),
                    amount: candidate.amount,
                    check,
                };
                if self.ask(prompt).await == Decision::Decline {
                    info!("PROMPT: unusual amount for {} declined", candidate.description);
                    return Ok(GuardedOutcome::Cancelled);
                }
            }
        }

        Ok(GuardedOutcome::Completed(self.repository.save_expense(command).await?))
    }

    /// Delete an expense, reopening its month first when it is closed
    pub async fn delete_expense(&self, id: &str) -> LedgerResult<GuardedOutcome<Snapshot>> {
        let snapshot = self.repository.load_snapshot().await?;
        if let Some(expense) = snapshot.expenses.iter().find(|e| e.id == id) {
            let month = MonthKey::from_date(expense.date);
            if is_month_closed(&snapshot.settings, month) && self.reopen_with_prompt(month).await?.is_none() {
                return Ok(GuardedOutcome::Cancelled);
            }
        }
        Ok(GuardedOutcome::Completed(self.repository.delete_expense(id).await?))
    }

    /// Dry run, ask for confirmation of the summary, then commit
    pub async fn import_backup(
        &self,
        payload: &Value,
        options: ImportOptions,
    ) -> LedgerResult<GuardedOutcome<ImportOutcome>> {
        let preview = self
            .repository
            .import_data(
                payload,
                &ImportOptions {
                    dry_run: true,
                    ..options.clone()
                },
            )
            .await?;

        let prompt = DecisionPrompt::ConfirmImport {
            summary: preview.summary,
        };
        if self.ask(prompt).await == Decision::Decline {
            info!("📥 IMPORT: cancelled after dry run");
            return Ok(GuardedOutcome::Cancelled);
        }

        let outcome = self
            .repository
            .import_data(
                payload,
                &ImportOptions {
                    dry_run: false,
                    ..options
                },
            )
            .await?;
        Ok(GuardedOutcome::Completed(outcome))
    }

    /// Recurring-expense suggestions, empty when the household turned them off
    pub fn recurring_suggestions(&self, snapshot: &Snapshot, month: MonthKey) -> Vec<RecurringSuggestion> {
        if !snapshot.settings.preferences.suggestions_enabled {
            return Vec::new();
        }
        suggest_recurring_expenses_with_config(&snapshot.expenses, month, &self.analytics)
    }

    pub fn six_month_trend(&self, snapshot: &Snapshot, month: MonthKey) -> SixMonthTrend {
        calculate_six_month_trend_with_config(&snapshot.expenses, month, &self.analytics)
    }
}
