//! Configuration types
//!
//! Database locations, ingestion tuning and hub query settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Path to the model size database (JSON)
    #[serde(default)]
    pub size_db: Option<PathBuf>,
    /// Path to the download trend database (JSON)
    #[serde(default)]
    pub download_db: Option<PathBuf>,
    /// Number of concurrent size estimations per ingestion batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Timeout for a single size estimation, in seconds (0 = no timeout)
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
    /// Number of dates kept in the download trend database when pruning
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Days a cached hub listing stays valid
    #[serde(default = "default_cache_expire_days")]
    pub cache_expire_days: i64,
    /// Library filter applied to the hub listing
    #[serde(default = "default_library")]
    pub library: String,
    /// Page size requested from the hub API
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Maximum number of models fetched from the hub
    #[serde(default = "default_max_models")]
    pub max_models: usize,
}

fn default_batch_size() -> usize {
    32
}

fn default_oracle_timeout_secs() -> u64 {
    300
}

fn default_max_records() -> usize {
    10
}

fn default_cache_expire_days() -> i64 {
    7
}

fn default_library() -> String {
    "pytorch".to_string()
}

fn default_page_size() -> usize {
    1000
}

fn default_max_models() -> usize {
    20000
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            size_db: None,
            download_db: None,
            batch_size: default_batch_size(),
            oracle_timeout_secs: default_oracle_timeout_secs(),
            max_records: default_max_records(),
            cache_expire_days: default_cache_expire_days(),
            library: default_library(),
            page_size: default_page_size(),
            max_models: default_max_models(),
        }
    }
}

impl StatsConfig {
    /// Validate configuration values
    ///
    /// Resets out-of-range values to their defaults.
    pub fn validate(&mut self) {
        if self.batch_size == 0 {
            self.batch_size = default_batch_size();
        }

        // The hub API rejects larger pages
        self.page_size = self.page_size.clamp(1, 1000);

        if self.max_records == 0 {
            self.max_records = default_max_records();
        }

        if self.cache_expire_days < 0 {
            self.cache_expire_days = default_cache_expire_days();
        }

        if self.library.trim().is_empty() {
            self.library = default_library();
        }
    }

    /// Override the database paths that are given, keeping the others
    pub fn with_paths(mut self, size_db: Option<PathBuf>, download_db: Option<PathBuf>) -> Self {
        if size_db.is_some() {
            self.size_db = size_db;
        }
        if download_db.is_some() {
            self.download_db = download_db;
        }
        self
    }

    pub fn oracle_timeout(&self) -> Option<Duration> {
        match self.oracle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
