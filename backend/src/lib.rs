//! # Household Ledger Backend
//!
//! Core of a shared expense ledger for a two-person household. It normalizes
//! and validates expenses, resolves who paid through an alias table that
//! survives renames, computes monthly totals, settlement and analytics,
//! closes and reopens months, and moves the whole ledger in and out of
//! versioned JSON backups.
//!
//! ## Layout
//!
//! - [`domain`]: pure validation, normalization, calculations, analytics,
//!   month closure, import/export and listing, plus the
//!   [`domain::LedgerCoordinator`] that asks the user before guarded writes
//! - [`storage`]: the [`storage::LedgerRepository`] contract with a document
//!   store backend and a key-value backend
//! - [`config`]: YAML configuration
//! - [`error`]: error types
//! - [`logging`]: `env_logger` setup
//!
//! ## Example
//!
//! ```no_run
//! use household_ledger_backend::config::LedgerConfig;
//! use household_ledger_backend::domain::calculations::{calculate_month_totals, calculate_settlement};
//! use household_ledger_backend::storage::from_config;
//! use shared::MonthKey;
//!
//! # async fn run() -> anyhow::Result<()> {
//! household_ledger_backend::logging::init_logging("info");
//! let repository = from_config(&LedgerConfig::load_or_default("ledger.yaml")?)?;
//! let snapshot = repository.load_snapshot().await?;
//! let month = MonthKey::parse("2026-02").expect("valid month");
//! let totals = calculate_month_totals(&snapshot.expenses, month);
//! println!("{}", calculate_settlement(&totals, &snapshot.settings.display_names).message);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult, StoreError};
pub use storage::{create_repository, from_config, BackendSelection, LedgerRepository, Subscription};
