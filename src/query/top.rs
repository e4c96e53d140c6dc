//! Top downloaded models
//!
//! Selects the most downloaded models of a date, optionally restricted to a
//! size range.

use chrono::NaiveDate;

use crate::query::{QueryError, RankEngine};
use crate::types::download::sort_by_downloads;
use crate::types::size::{SizeOutcome, SizeRange};

/// Parameters of a top-K query
#[derive(Debug, Clone)]
pub struct TopQuery {
    /// Date to rank, the latest stored date when `None`
    pub date: Option<NaiveDate>,
    /// Number of sized models to return
    pub limit: usize,
    pub range: SizeRange,
    /// Keep models whose size is unknown, without counting them against `limit`
    pub include_unsupported: bool,
    /// First position of the sorted list considered
    pub start: usize,
    /// Position after the last one considered
    pub end: usize,
}

impl Default for TopQuery {
    fn default() -> Self {
        Self {
            date: None,
            limit: 20,
            range: SizeRange::unbounded(),
            include_unsupported: false,
            start: 0,
            end: usize::MAX,
        }
    }
}

/// Size reported next to a ranked model
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportedSize {
    /// The query did not need sizes
    Unknown,
    /// The model could not be estimated
    Unsupported,
    /// Billions of parameters
    Billions(f64),
}

/// One row of a top-K result
#[derive(Debug, Clone, PartialEq)]
pub struct RankedModel {
    pub rank: usize,
    pub model_id: String,
    pub download: i64,
    pub size: ReportedSize,
}

impl RankEngine<'_> {
    /// The top `limit` models of a date within a size range
    ///
    /// Models are ranked by downloads. When `include_unsupported` is set,
    /// models without a known size are kept and each one extends the result
    /// by one slot, so they never displace sized models.
    pub async fn top_models(&self, query: &TopQuery) -> Result<Vec<RankedModel>, QueryError> {
        let (date, snapshots) = self.snapshots(query.date)?;
        let sorted = sort_by_downloads(snapshots);
        let end = query.end.min(sorted.len());
        let candidates = sorted.get(query.start..end).unwrap_or_default();
        let skip_size = query.range.is_unbounded();

        let mut models: Vec<RankedModel> = Vec::new();
        let mut extra = 0;
        for snapshot in candidates {
            if models.len() >= query.limit + extra {
                break;
            }

            let size = if skip_size {
                ReportedSize::Unknown
            } else {
                match self.resolve_size(&snapshot.model_id).await.outcome {
                    SizeOutcome::Ok(size) if query.range.contains(size) => {
                        ReportedSize::Billions(size)
                    }
                    SizeOutcome::Ok(_) => continue,
                    _ if query.include_unsupported => {
                        extra += 1;
                        ReportedSize::Unsupported
                    }
                    _ => continue,
                }
            };

            models.push(RankedModel {
                rank: models.len() + 1,
                model_id: snapshot.model_id.clone(),
                download: snapshot.download,
                size,
            });
            tracing::debug!(
                "Appended {}: {:?}, now {} models, target {} models",
                snapshot.model_id,
                size,
                models.len(),
                query.limit + extra
            );
        }

        tracing::info!("Selected {} top models of {}", models.len(), date);
        Ok(models)
    }
}
