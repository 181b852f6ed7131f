//! Ensemble verdicts and the per-item fusion state
//!
//! Per work item: `Incomplete → Fused → Refused`. `Fused` and `Refused` are
//! operationally equivalent; `Refused` only records that at least one
//! recomputation happened after new evidence arrived.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vigil_common::{ConcernLevel, Error};

/// How closely the contributing models agree on concern level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgreementLevel {
    /// All models reported the same level
    Perfect,
    /// Spread of at most one level
    High,
    /// Spread of at most two levels
    Moderate,
    /// Anything wider
    Low,
}

impl AgreementLevel {
    /// Classify the spread (max ordinal - min ordinal) of concern levels
    pub fn from_spread(spread: u8) -> Self {
        match spread {
            0 => AgreementLevel::Perfect,
            1 => AgreementLevel::High,
            2 => AgreementLevel::Moderate,
            _ => AgreementLevel::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgreementLevel::Perfect => "perfect",
            AgreementLevel::High => "high",
            AgreementLevel::Moderate => "moderate",
            AgreementLevel::Low => "low",
        }
    }
}

impl fmt::Display for AgreementLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgreementLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "perfect" => Ok(AgreementLevel::Perfect),
            "high" => Ok(AgreementLevel::High),
            "moderate" => Ok(AgreementLevel::Moderate),
            "low" => Ok(AgreementLevel::Low),
            other => Err(Error::InvalidInput(format!("Unknown agreement level: {}", other))),
        }
    }
}

/// Fused multi-model judgment for one work item
///
/// Pure output of the fusion function: carries no timestamp so that two
/// fusions of the same input set compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleVerdict {
    pub work_item_id: i64,
    /// Maximum concern level among contributing results
    pub concern_level: ConcernLevel,
    /// Agreement-weighted ensemble confidence, always in [0, 1]
    pub confidence: f64,
    /// Case-insensitive union of contributing indicators, first-seen casing
    pub indicators: Vec<String>,
    /// Contributing model ids, sorted
    pub contributing_models: Vec<String>,
    pub agreement: AgreementLevel,
    /// Fused on a partial quorum (degraded mode)
    pub low_confidence: bool,
    pub priority_score: f64,
    pub flagged_for_review: bool,
}

impl EnsembleVerdict {
    pub fn contributing_count(&self) -> usize {
        self.contributing_models.len()
    }
}

/// A verdict as persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVerdict {
    #[serde(flatten)]
    pub verdict: EnsembleVerdict,
    /// Number of times this item has been fused (1 = first fusion)
    pub fusion_count: i64,
    pub computed_at: DateTime<Utc>,
}

impl StoredVerdict {
    pub fn fusion_state(&self) -> ItemFusionState {
        ItemFusionState::from_fusion_count(self.fusion_count)
    }
}

/// Per work item fusion lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemFusionState {
    /// Quorum not met, no verdict
    Incomplete,
    /// Verdict exists
    Fused,
    /// Verdict exists and has been recomputed at least once
    Refused,
}

impl ItemFusionState {
    pub fn from_fusion_count(count: i64) -> Self {
        match count {
            c if c <= 0 => ItemFusionState::Incomplete,
            1 => ItemFusionState::Fused,
            _ => ItemFusionState::Refused,
        }
    }

    /// A verdict is available for reporting
    pub fn has_verdict(self) -> bool {
        !matches!(self, ItemFusionState::Incomplete)
    }
}

/// What a verdict write did to the stored row
///
/// Success results are never replaced, so an item's evidence is fully
/// described by its contributing model set; the count only moves when that
/// set changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictChange {
    /// First verdict for the item
    Created,
    /// Recomputed over a different contributing set
    Refused,
    /// Same contributing set as the stored verdict; `fusion_count` kept
    Unchanged,
}
