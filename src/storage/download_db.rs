//! Download trend database
//!
//! One list of download snapshots per calendar day. New days are appended,
//! re-ingesting a day replaces it and `prune` drops the oldest days.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::storage::{read_json, write_json_atomic, StorageError};
use crate::types::download::{format_date, parse_date, DownloadSnapshot, HubModel};

/// Persistent date -> download snapshots map
#[derive(Debug)]
pub struct DownloadHistory {
    path: Option<PathBuf>,
    days: BTreeMap<NaiveDate, Vec<DownloadSnapshot>>,
}

impl DownloadHistory {
    /// Open the history backed by `path`; a missing file yields an empty history
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let raw: BTreeMap<String, Vec<DownloadSnapshot>> = read_json(&path)?.unwrap_or_default();

        let mut days = BTreeMap::new();
        for (key, snapshots) in raw {
            let date = parse_date(&key).ok_or_else(|| StorageError::InvalidDate(key.clone()))?;
            if days.insert(date, snapshots).is_some() {
                return Err(StorageError::DuplicateDate(key));
            }
        }

        if !days.is_empty() {
            tracing::info!("{} records loaded from the download trend DB", days.len());
        }

        Ok(Self {
            path: Some(path),
            days,
        })
    }

    /// A history without a backing file
    pub fn in_memory() -> Self {
        Self {
            path: None,
            days: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of stored dates
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.days.contains_key(&date)
    }

    pub fn get(&self, date: NaiveDate) -> Result<&[DownloadSnapshot], StorageError> {
        self.days
            .get(&date)
            .map(Vec::as_slice)
            .ok_or_else(|| StorageError::KeyNotFound(format_date(date)))
    }

    /// All stored dates, ascending by calendar order when `sorted`
    pub fn dates(&self, sorted: bool) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.days.keys().copied().collect();
        if sorted {
            dates.sort();
        }
        dates
    }

    pub fn latest_date(&self) -> Result<NaiveDate, StorageError> {
        self.days
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| StorageError::KeyNotFound("latest".to_string()))
    }

    /// Snapshots of the most recent date
    pub fn latest(&self) -> Result<&[DownloadSnapshot], StorageError> {
        let date = self.latest_date()?;
        self.get(date)
    }

    /// Record today's downloads of `models[start..end]` and persist
    pub fn update(
        &mut self,
        models: &[HubModel],
        start: usize,
        end: usize,
    ) -> Result<usize, StorageError> {
        let today = chrono::Local::now().date_naive();
        self.update_on(today, models, start, end)
    }

    /// Record the downloads of `models[start..end]` under `date` and persist
    ///
    /// An existing entry for `date` is replaced. Models without a download
    /// count are skipped. Returns the number of snapshots recorded.
    pub fn update_on(
        &mut self,
        date: NaiveDate,
        models: &[HubModel],
        start: usize,
        end: usize,
    ) -> Result<usize, StorageError> {
        let end = end.min(models.len());
        let snapshots: Vec<DownloadSnapshot> = models
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .filter_map(|model| {
                model
                    .downloads
                    .map(|download| DownloadSnapshot::new(model.model_id.clone(), download))
            })
            .collect();

        let count = snapshots.len();
        if self.days.insert(date, snapshots).is_some() {
            tracing::info!("Replacing download records of {}", format_date(date));
        }

        self.persist()?;
        Ok(count)
    }

    /// Keep only the `max_records` most recent dates
    ///
    /// Returns the removed dates, oldest first.
    pub fn prune(&mut self, max_records: usize) -> Result<Vec<NaiveDate>, StorageError> {
        if self.days.len() <= max_records {
            tracing::info!(
                "Skip pruning because {} >= {}",
                max_records,
                self.days.len()
            );
            return Ok(Vec::new());
        }

        let excess = self.days.len() - max_records;
        let removed: Vec<NaiveDate> = self.days.keys().take(excess).copied().collect();
        for date in &removed {
            self.days.remove(date);
        }

        self.persist()?;
        Ok(removed)
    }

    /// Write the whole history back to its file
    pub fn persist(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        tracing::info!("Updating download database with total {} records", self.days.len());
        let data: BTreeMap<String, &Vec<DownloadSnapshot>> = self
            .days
            .iter()
            .map(|(date, snapshots)| (format_date(*date), snapshots))
            .collect();
        write_json_atomic(path, &data)
    }
}
