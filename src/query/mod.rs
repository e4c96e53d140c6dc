//! Database queries
//!
//! [`RankEngine`] answers read-only questions over a download history and a
//! size database. Sizes missing from the database are resolved through an
//! optional [`SizeOracle`] and memoized for the lifetime of the engine.

pub mod top;
pub mod trend;

use chrono::NaiveDate;
use dashmap::DashMap;
use thiserror::Error;

use crate::oracle::SizeOracle;
use crate::storage::{DownloadHistory, SizeStore, StorageError};
use crate::types::download::{format_date, DownloadSnapshot};
use crate::types::size::{SizeRange, SizeResult};

pub use top::{RankedModel, ReportedSize, TopQuery};
pub use trend::{Rank, RankTrend, SizeStats, SizeTrend, TrendQuery};

/// Query errors
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("No download records for {}", display_date(.0))]
    DateNotFound(NaiveDate),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn display_date(date: &NaiveDate) -> String {
    format_date(*date)
}

/// Join layer over the download and size databases
pub struct RankEngine<'a> {
    downloads: &'a DownloadHistory,
    sizes: &'a SizeStore,
    oracle: Option<&'a dyn SizeOracle>,
    live: DashMap<String, SizeResult>,
}

impl<'a> RankEngine<'a> {
    pub fn new(downloads: &'a DownloadHistory, sizes: &'a SizeStore) -> Self {
        Self {
            downloads,
            sizes,
            oracle: None,
            live: DashMap::new(),
        }
    }

    /// Estimate sizes missing from the size database with `oracle`
    pub fn with_oracle(mut self, oracle: &'a dyn SizeOracle) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Snapshots for `date`, or for the latest date when `None`
    fn snapshots(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<(NaiveDate, &'a [DownloadSnapshot]), QueryError> {
        let date = match date {
            Some(date) => date,
            None => self.downloads.latest_date()?,
        };
        if !self.downloads.contains(date) {
            return Err(QueryError::DateNotFound(date));
        }
        Ok((date, self.downloads.get(date)?))
    }

    /// Size of `model_id` from the database, else from the oracle
    ///
    /// Without an oracle, models missing from the database are unsupported.
    pub async fn resolve_size(&self, model_id: &str) -> SizeResult {
        if let Some(stored) = self.sizes.lookup(model_id) {
            return stored.clone();
        }
        if let Some(live) = self.live.get(model_id) {
            return live.value().clone();
        }

        let result = match self.oracle {
            Some(oracle) => oracle.estimate(model_id, true).await,
            None => SizeResult::unsupported(model_id, "not in the size database"),
        };
        self.live.insert(model_id.to_string(), result.clone());
        result
    }

    /// True if the model has a known size within `range`
    ///
    /// An unbounded range accepts every model without resolving its size.
    pub async fn size_in_range(&self, model_id: &str, range: &SizeRange) -> bool {
        if range.is_unbounded() {
            return true;
        }
        self.resolve_size(model_id)
            .await
            .size()
            .is_some_and(|size| range.contains(size))
    }

    /// Size estimates of `model_ids`, in the given order
    pub async fn model_sizes(&self, model_ids: &[String]) -> Vec<SizeResult> {
        let mut results = Vec::with_capacity(model_ids.len());
        for model_id in model_ids {
            results.push(self.resolve_size(model_id).await);
        }
        results
    }

    /// Download snapshots of `model_ids` on `date` (latest when `None`)
    pub fn model_downloads(
        &self,
        model_ids: &[String],
        date: Option<NaiveDate>,
    ) -> Result<Vec<DownloadSnapshot>, QueryError> {
        let (_, snapshots) = self.snapshots(date)?;
        Ok(snapshots
            .iter()
            .filter(|snapshot| model_ids.contains(&snapshot.model_id))
            .cloned()
            .collect())
    }

    /// Dates of the trend window, oldest first
    ///
    /// `window == 0` means every stored date.
    fn window(&self, window: usize) -> Vec<NaiveDate> {
        let dates = self.downloads.dates(true);
        if window > 0 && window < dates.len() {
            dates[dates.len() - window..].to_vec()
        } else {
            dates
        }
    }
}
