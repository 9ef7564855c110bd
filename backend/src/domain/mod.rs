//! Ledger domain logic.
//!
//! Everything except [`coordinator`] is synchronous and storage-free: the
//! repositories in [`crate::storage`] read raw values, hand them to these
//! functions and write back what they return.

pub mod analytics;
pub mod calculations;
pub mod commands;
pub mod coordinator;
pub mod expense_service;
pub mod export_service;
pub mod import_service;
pub mod listing;
pub mod month_closure;
pub mod normalizers;
pub mod settings_service;
pub mod validation;

pub use coordinator::{Decision, DecisionPrompt, DecisionRequest, GuardedOutcome, LedgerCoordinator};
