//! # Ledger Configuration
//!
//! Host-side configuration for the ledger core, stored as YAML:
//!
//! ```yaml
//! backend: key_value
//! account_id: household
//! data_directory: /home/me/Documents/Household Ledger
//! import:
//!   chunk_size: 500
//!   skip_duplicates: true
//! analytics:
//!   anomaly_multiplier: 2.5
//!   anomaly_min_samples: 3
//! ```
//!
//! Every field is optional; missing values take the defaults below.

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::ImportOptions;
use std::fs;
use std::path::{Path, PathBuf};

/// Largest number of writes a single backend batch may carry
pub const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Live document/collection store (cloud-hosted in production)
    Document,
    /// Local persistent key-value store
    #[default]
    KeyValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub chunk_size: usize,
    pub skip_duplicates: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_BATCH_SIZE,
            skip_duplicates: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub anomaly_multiplier: f64,
    pub anomaly_min_samples: usize,
    pub trend_months: usize,
    pub trend_top_n: usize,
    pub suggestion_limit: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            anomaly_multiplier: 2.5,
            anomaly_min_samples: 3,
            trend_months: 6,
            trend_top_n: 3,
            suggestion_limit: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: BackendKind,
    pub account_id: String,
    pub data_directory: Option<PathBuf>,
    pub import: ImportConfig,
    pub analytics: AnalyticsConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            account_id: "household".to_string(),
            data_directory: None,
            import: ImportConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Load and validate a YAML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: LedgerConfig = serde_yaml::from_str(&yaml_content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        debug!("Loaded ledger config from {}", path.display());
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write the configuration atomically (temp file, then rename)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let yaml_content = serde_yaml::to_string(self)?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, yaml_content)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_id.trim().is_empty() {
            bail!("account_id must not be empty");
        }
        if self.import.chunk_size == 0 {
            bail!("import.chunk_size must be at least 1");
        }
        if self.analytics.anomaly_multiplier <= 1.0 || !self.analytics.anomaly_multiplier.is_finite() {
            bail!("analytics.anomaly_multiplier must be a finite number greater than 1");
        }
        if self.analytics.anomaly_min_samples == 0 {
            bail!("analytics.anomaly_min_samples must be at least 1");
        }
        if self.analytics.trend_months < 2 {
            bail!("analytics.trend_months must be at least 2");
        }
        Ok(())
    }

    /// Chunk size actually used for commits, bounded by the backend batch limit
    pub fn effective_chunk_size(&self) -> usize {
        self.import.chunk_size.clamp(1, MAX_BATCH_SIZE)
    }

    /// Import options seeded from the `import` section
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            chunk_size: self.effective_chunk_size(),
            skip_duplicates: self.import.skip_duplicates,
            ..ImportOptions::default()
        }
    }

    /// Directory for the file-backed key-value store
    pub fn resolved_data_directory(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_directory {
            return Ok(dir.clone());
        }
        default_data_directory()
    }
}

/// `~/Documents/Household Ledger`, or `~/Household Ledger` when there is no Documents folder
pub fn default_data_directory() -> Result<PathBuf> {
    let base = dirs::document_dir()
        .or_else(dirs::home_dir)
        .context("Could not determine a home or documents directory")?;
    Ok(base.join("Household Ledger"))
}
