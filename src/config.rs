// src/config.rs

//! Run configuration.
//!
//! Every section carries serde defaults, so a YAML file only has to name the
//! values it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::fetch::retry::{Backoff, RetryPolicy};
use crate::process::resolve::COLUMN_MAP;
use crate::process::table::{PartialRowPolicy, TableOptions};
use crate::verify::Tolerance;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub retry: RetryConfig,
    pub tables: TableConfig,
    pub verify: VerifyConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Read a YAML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing config {:?}", path))
    }
}

/// Where the dataset lives and which columns to ask for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub dataset_id: String,
    pub base_url: String,
    /// Used once per fetch, only after the primary path has failed.
    pub fallback_base_url: String,
    pub entity_set: String,
    /// `None` fetches every column.
    pub select_fields: Option<Vec<String>>,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dataset_id: "82610ENG".to_string(),
            base_url: "https://opendata.cbs.nl/ODataApi/odata".to_string(),
            fallback_base_url: "http://opendata.cbs.nl/ODataApi/odata".to_string(),
            entity_set: "TypedDataSet".to_string(),
            select_fields: Some(
                COLUMN_MAP
                    .required()
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
            ),
            user_agent: concat!("renewscraper/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
    /// Per-attempt ceiling; a timeout counts as a retryable failure.
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            backoff: Backoff::Exponential,
            timeout_secs: 90,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff: self.backoff,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub partial_rows: PartialRowPolicy,
    pub min_year: Option<i32>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            partial_rows: PartialRowPolicy::Keep,
            min_year: Some(1990),
        }
    }
}

impl TableConfig {
    pub fn options(&self) -> TableOptions {
        TableOptions {
            partial_rows: self.partial_rows,
            min_year: self.min_year,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Absolute tolerance; `0.0` demands an exact match.
    pub tolerance: f64,
    pub capacity_tolerance: Option<f64>,
    pub production_tolerance: Option<f64>,
    /// Reference year used to re-derive source keys; `None` skips the audit.
    pub audit_year: Option<i32>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            capacity_tolerance: None,
            production_tolerance: None,
            audit_year: Some(2023),
        }
    }
}

impl VerifyConfig {
    pub fn tolerance(&self) -> Tolerance {
        Tolerance {
            default: self.tolerance,
            capacity: self.capacity_tolerance,
            production: self.production_tolerance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}
