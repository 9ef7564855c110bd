//! Logger installation for hosts and tests.
//!
//! The library itself only emits through the `log` facade.

use log::LevelFilter;

/// Install `env_logger` using `filter` (e.g. `"info"` or
/// `"household_ledger_backend=debug"`). `RUST_LOG` takes precedence when set.
/// Returns false when a logger was already installed.
pub fn init_logging(filter: &str) -> bool {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Info).parse_filters(filter);
    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env_filter);
    }
    builder.format_timestamp_millis().try_init().is_ok()
}

/// Logger for unit tests; output is captured by the test harness
pub fn init_test_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(LevelFilter::Debug)
        .try_init();
}
