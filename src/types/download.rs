//! Download types
//!
//! Hub listing entries, per-date download snapshots and the calendar date
//! format used as database keys.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Key format of the download trend database
pub const DATE_FORMAT: &str = "%m-%d-%y";

/// One model's download count as observed on a given date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSnapshot {
    pub model_id: String,
    pub download: i64,
}

impl DownloadSnapshot {
    pub fn new(model_id: impl Into<String>, download: i64) -> Self {
        Self {
            model_id: model_id.into(),
            download,
        }
    }
}

/// A model as listed by the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubModel {
    pub model_id: String,
    /// Downloads in the last 30 days, absent when the hub does not report it
    #[serde(default)]
    pub downloads: Option<i64>,
}

impl HubModel {
    pub fn new(model_id: impl Into<String>, downloads: Option<i64>) -> Self {
        Self {
            model_id: model_id.into(),
            downloads,
        }
    }
}

/// Parse a database date key, accepting non-padded fields like `1-2-24`
pub fn parse_date(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key.trim(), DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Sort snapshots by downloads, highest first, keeping ingest order on ties
pub fn sort_by_downloads(snapshots: &[DownloadSnapshot]) -> Vec<&DownloadSnapshot> {
    let mut sorted: Vec<&DownloadSnapshot> = snapshots.iter().collect();
    sorted.sort_by(|a, b| b.download.cmp(&a.download));
    sorted
}
