//! Engine configuration
//!
//! Read from a TOML file; every section and field is optional:
//!
//! ```text
//! data_dir = "/var/lib/wordwise"
//!
//! [store]
//! flush_delay_ms = 250
//! retry_backoff_ms = [1000, 5000, 15000]
//! max_retries = 3
//!
//! [selection]
//! words_per_page = 5
//!
//! [quota]
//! daily_words = 100
//! daily_explanations = 10
//!
//! [sync_quota]
//! total_bytes = 102400
//! item_bytes = 8192
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::learning::DEFAULT_WORDS_PER_PAGE;
use crate::persistence::{NamespaceQuota, StoreConfig};
use crate::usage::QuotaLimits;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Data directory not found")]
    DataDirNotFound,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub flush_delay_ms: u64,
    pub retry_backoff_ms: Vec<u64>,
    pub max_retries: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            flush_delay_ms: 250,
            retry_backoff_ms: vec![1000, 5000, 15000],
            max_retries: 3,
        }
    }
}

impl StoreSection {
    pub fn to_store_config(&self) -> StoreConfig {
        StoreConfig {
            flush_delay: Duration::from_millis(self.flush_delay_ms),
            retry_backoff: self
                .retry_backoff_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            max_retries: self.max_retries.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSection {
    pub words_per_page: usize,
}

impl Default for SelectionSection {
    fn default() -> Self {
        Self {
            words_per_page: DEFAULT_WORDS_PER_PAGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSection {
    pub daily_words: u32,
    pub daily_explanations: u32,
}

impl Default for QuotaSection {
    fn default() -> Self {
        let limits = QuotaLimits::default();
        Self {
            daily_words: limits.daily_words,
            daily_explanations: limits.daily_explanations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncQuotaSection {
    pub total_bytes: usize,
    pub item_bytes: usize,
}

impl Default for SyncQuotaSection {
    fn default() -> Self {
        let quota = NamespaceQuota::default();
        Self {
            total_bytes: quota.total_bytes,
            item_bytes: quota.item_bytes,
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the persisted state; platform data dir when unset
    pub data_dir: Option<PathBuf>,
    pub store: StoreSection,
    pub selection: SelectionSection,
    pub quota: QuotaSection,
    pub sync_quota: SyncQuotaSection,
}

impl EngineConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("wordwise").join("config.toml"))
    }

    /// Directory holding the persisted state
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_local_dir()
                .map(|p| p.join("wordwise"))
                .ok_or(ConfigError::DataDirNotFound),
        }
    }

    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            daily_words: self.quota.daily_words,
            daily_explanations: self.quota.daily_explanations,
        }
    }

    pub fn sync_quota(&self) -> NamespaceQuota {
        NamespaceQuota {
            total_bytes: self.sync_quota.total_bytes,
            item_bytes: self.sync_quota.item_bytes,
        }
    }
}
