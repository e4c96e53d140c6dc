//! Model size types
//!
//! Defines the result of estimating a model's parameter count and the size
//! filter used by queries.

use serde::{Deserialize, Serialize};

/// Persisted status of a size estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizeStatus {
    /// The size was estimated
    Ok,
    /// The model cannot be estimated at all
    Unsupported,
    /// The size cannot be estimated without loading real weights
    NeedsWeights,
}

/// Outcome of a size estimate
#[derive(Debug, Clone)]
pub enum SizeOutcome {
    /// Parameter count in billions
    Ok(f64),
    /// The model is not supported by the estimator
    Unsupported { reason: String },
    /// Estimation needs the real weights (or timed out on the cheap path)
    NeedsWeights { note: Option<String> },
}

impl PartialEq for SizeOutcome {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SizeOutcome::Ok(a), SizeOutcome::Ok(b)) => a.to_bits() == b.to_bits(),
            (
                SizeOutcome::Unsupported { reason: a },
                SizeOutcome::Unsupported { reason: b },
            ) => a == b,
            (SizeOutcome::NeedsWeights { note: a }, SizeOutcome::NeedsWeights { note: b }) => {
                a == b
            }
            _ => false,
        }
    }
}

impl SizeOutcome {
    pub fn status(&self) -> SizeStatus {
        match self {
            SizeOutcome::Ok(_) => SizeStatus::Ok,
            SizeOutcome::Unsupported { .. } => SizeStatus::Unsupported,
            SizeOutcome::NeedsWeights { .. } => SizeStatus::NeedsWeights,
        }
    }
}

/// Result of estimating the size of one model
///
/// Serialized as the flat `{model_id, size, status, note}` record, which is
/// the on-disk contract of the size database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "SizeRecord", from = "SizeRecord")]
pub struct SizeResult {
    pub model_id: String,
    pub outcome: SizeOutcome,
}

impl SizeResult {
    pub fn ok(model_id: impl Into<String>, size_in_b: f64) -> Self {
        Self {
            model_id: model_id.into(),
            outcome: SizeOutcome::Ok(size_in_b),
        }
    }

    pub fn unsupported(model_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            outcome: SizeOutcome::Unsupported {
                reason: reason.into(),
            },
        }
    }

    pub fn needs_weights(model_id: impl Into<String>, note: Option<String>) -> Self {
        Self {
            model_id: model_id.into(),
            outcome: SizeOutcome::NeedsWeights { note },
        }
    }

    pub fn status(&self) -> SizeStatus {
        self.outcome.status()
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, SizeOutcome::Ok(_))
    }

    /// Size in billions of parameters, only for successful estimates
    pub fn size(&self) -> Option<f64> {
        match self.outcome {
            SizeOutcome::Ok(size) => Some(size),
            _ => None,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match &self.outcome {
            SizeOutcome::Ok(_) => None,
            SizeOutcome::Unsupported { reason } => Some(reason.as_str()),
            SizeOutcome::NeedsWeights { note } => note.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SizeRecord {
    model_id: String,
    size: f64,
    status: SizeStatus,
    #[serde(default)]
    note: Option<String>,
}

impl From<SizeResult> for SizeRecord {
    fn from(result: SizeResult) -> Self {
        let (size, status, note) = match result.outcome {
            SizeOutcome::Ok(size) => (size, SizeStatus::Ok, None),
            SizeOutcome::Unsupported { reason } => {
                // A missing note loads as an empty reason; write it back as null
                let note = Some(reason).filter(|reason| !reason.is_empty());
                (0.0, SizeStatus::Unsupported, note)
            }
            SizeOutcome::NeedsWeights { note } => (0.0, SizeStatus::NeedsWeights, note),
        };
        Self {
            model_id: result.model_id,
            size,
            status,
            note,
        }
    }
}

impl From<SizeRecord> for SizeResult {
    fn from(record: SizeRecord) -> Self {
        let outcome = match record.status {
            SizeStatus::Ok => SizeOutcome::Ok(record.size),
            SizeStatus::Unsupported => SizeOutcome::Unsupported {
                reason: record.note.unwrap_or_default(),
            },
            SizeStatus::NeedsWeights => SizeOutcome::NeedsWeights { note: record.note },
        };
        Self {
            model_id: record.model_id,
            outcome,
        }
    }
}

/// Inclusive size filter in billions of parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeRange {
    pub min: f64,
    pub max: f64,
}

impl Default for SizeRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl SizeRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn unbounded() -> Self {
        Self {
            min: 0.0,
            max: f64::INFINITY,
        }
    }

    /// True when the filter accepts every model, so sizes need not be resolved
    pub fn is_unbounded(&self) -> bool {
        self.min == 0.0 && self.max == f64::INFINITY
    }

    pub fn contains(&self, size: f64) -> bool {
        size >= self.min && size <= self.max
    }
}
