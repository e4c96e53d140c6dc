//! Trends over the stored dates
//!
//! Rank trend: how the current top models ranked on each date. Size trend:
//! the size spread of each date's top models.

use chrono::NaiveDate;

use crate::query::{QueryError, RankEngine};
use crate::types::download::sort_by_downloads;
use crate::types::size::SizeRange;

/// Parameters of a trend query
#[derive(Debug, Clone)]
pub struct TrendQuery {
    /// Number of models tracked (rank trend) or measured per date (size trend)
    pub limit: usize,
    pub range: SizeRange,
    /// Number of most recent dates covered, 0 for all of them
    pub window: usize,
}

impl Default for TrendQuery {
    fn default() -> Self {
        Self {
            limit: 20,
            range: SizeRange::unbounded(),
            window: 0,
        }
    }
}

/// Rank of a model on one date
///
/// `Unranked` orders after every rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    At(usize),
    Unranked,
}

impl Rank {
    pub fn position(&self) -> Option<usize> {
        match self {
            Rank::At(rank) => Some(*rank),
            Rank::Unranked => None,
        }
    }
}

/// Ranks of the tracked models, one row per date
#[derive(Debug, Clone, PartialEq)]
pub struct RankTrend {
    /// Tracked models, best ranked on the latest date first
    pub models: Vec<String>,
    /// `(date, ranks)` with one rank per tracked model, oldest date first
    pub rows: Vec<(NaiveDate, Vec<Rank>)>,
}

impl RankTrend {
    /// Ranks of one tracked model across the dates
    pub fn column(&self, model_id: &str) -> Option<Vec<Rank>> {
        let idx = self.models.iter().position(|m| m == model_id)?;
        Some(self.rows.iter().map(|(_, ranks)| ranks[idx]).collect())
    }
}

/// Size spread of one date's top models, in billions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeStats {
    pub max: f64,
    pub mean: f64,
    pub min: f64,
}

impl SizeStats {
    fn from_sizes(sizes: &[f64]) -> Option<Self> {
        if sizes.is_empty() {
            return None;
        }
        let max = sizes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = sizes.iter().copied().fold(f64::INFINITY, f64::min);
        let mean = sizes.iter().sum::<f64>() / sizes.len() as f64;
        Some(Self { max, mean, min })
    }
}

/// Size spread per date, `None` when no model of that date was eligible
#[derive(Debug, Clone, PartialEq)]
pub struct SizeTrend {
    pub rows: Vec<(NaiveDate, Option<SizeStats>)>,
}

impl RankEngine<'_> {
    /// Models ranked among the size-eligible models of each date
    ///
    /// The tracked models are the first `limit` eligible models of the latest
    /// date. Ranks are dense: models outside the size range never take a rank.
    pub async fn rank_trend(&self, query: &TrendQuery) -> Result<RankTrend, QueryError> {
        let (_, latest) = self.snapshots(None)?;

        let mut models = Vec::new();
        for snapshot in sort_by_downloads(latest) {
            if models.len() >= query.limit {
                break;
            }
            if self.size_in_range(&snapshot.model_id, &query.range).await {
                models.push(snapshot.model_id.clone());
            }
        }

        let mut rows = Vec::new();
        for date in self.window(query.window) {
            let (_, snapshots) = self.snapshots(Some(date))?;

            let mut ranked: Vec<&str> = Vec::new();
            for snapshot in sort_by_downloads(snapshots) {
                if self.size_in_range(&snapshot.model_id, &query.range).await {
                    ranked.push(snapshot.model_id.as_str());
                }
            }

            let ranks = models
                .iter()
                .map(|model| match ranked.iter().position(|id| id == model) {
                    Some(idx) => Rank::At(idx + 1),
                    None => Rank::Unranked,
                })
                .collect();
            rows.push((date, ranks));
        }

        tracing::info!(
            "Ranked {} models over {} dates",
            models.len(),
            rows.len()
        );
        Ok(RankTrend { models, rows })
    }

    /// Max, mean and min size of the top `limit` sized models of each date
    pub async fn size_trend(&self, query: &TrendQuery) -> Result<SizeTrend, QueryError> {
        // Fail on an empty history like the other queries
        self.downloads.latest_date()?;

        let mut rows = Vec::new();
        for date in self.window(query.window) {
            let (_, snapshots) = self.snapshots(Some(date))?;

            let mut sizes = Vec::new();
            for snapshot in sort_by_downloads(snapshots) {
                if sizes.len() >= query.limit {
                    break;
                }
                let resolved = self.resolve_size(&snapshot.model_id).await;
                if let Some(size) = resolved.size().filter(|size| query.range.contains(*size)) {
                    sizes.push(size);
                }
            }

            rows.push((date, SizeStats::from_sizes(&sizes)));
        }

        Ok(SizeTrend { rows })
    }
}
