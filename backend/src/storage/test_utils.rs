//! Test environment backed by a temporary data directory that is removed
//! when the environment is dropped, even if the test panics.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use super::key_value::{FileKeyValueStore, KeyValueLedgerRepository};
use crate::config::LedgerConfig;
use crate::logging::init_test_logging;

pub struct TestEnvironment {
    pub config: LedgerConfig,
    /// Data directory of the file-backed store
    pub base_path: PathBuf,
    _temp_dir: TempDir, // Keep alive to prevent cleanup
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        init_test_logging();
        let temp_dir = TempDir::new()?;
        let base_path = temp_dir.path().join("Household Ledger");
        let config = LedgerConfig {
            data_directory: Some(base_path.clone()),
            ..LedgerConfig::default()
        };
        Ok(Self {
            config,
            base_path,
            _temp_dir: temp_dir,
        })
    }

    /// A fresh repository over the environment's files; every call reopens them
    pub fn key_value_repository(&self) -> KeyValueLedgerRepository {
        let store = FileKeyValueStore::open(&self.base_path)
            .unwrap_or_else(|e| panic!("cannot open test store at {:?}: {}", self.base_path, e));
        KeyValueLedgerRepository::new(Arc::new(store), &self.config.account_id, &self.config)
    }
}
