//! Per-model judgments and the per-(item, model) state machine
//!
//! # State progression
//! `Pending → InFlight → {Success, Failed}`; `Failed` may re-enter `Pending`
//! on the next run. `Success` is terminal: the store refuses to replace a
//! successful result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use vigil_common::{ConcernLevel, Error};

/// Outcome status of an inference attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
    Skipped,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Failed => "failed",
            ResultStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ResultStatus::Success),
            "failed" => Ok(ResultStatus::Failed),
            "skipped" => Ok(ResultStatus::Skipped),
            other => Err(Error::InvalidInput(format!("Unknown result status: {}", other))),
        }
    }
}

/// Structured judgment produced by a model adapter
///
/// This is the schema every adapter maps its raw output onto. Confidence is
/// the model's own certainty and is always within [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelJudgment {
    pub description: String,
    pub concern_level: ConcernLevel,
    pub indicators: Vec<String>,
    pub confidence: f64,
}

/// Error details attached to a failed or skipped result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultError {
    /// Error class ("transient", "permanent", "parse", "missing_artifact", ...)
    pub kind: String,
    /// Human-readable detail
    pub detail: String,
    /// Raw model output, preserved for manual inspection of parse failures
    pub raw_output: Option<String>,
}

/// One model's judgment (or failure) for one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub work_item_id: i64,
    pub model_id: String,
    pub status: ResultStatus,
    pub description: String,
    pub concern_level: Option<ConcernLevel>,
    pub indicators: Vec<String>,
    pub confidence: Option<f64>,
    pub duration: Duration,
    pub attempts: u32,
    pub error: Option<ResultError>,
    pub created_at: DateTime<Utc>,
}

impl ModelResult {
    /// Successful inference
    pub fn success(
        work_item_id: i64,
        model_id: impl Into<String>,
        judgment: ModelJudgment,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            work_item_id,
            model_id: model_id.into(),
            status: ResultStatus::Success,
            description: judgment.description,
            concern_level: Some(judgment.concern_level),
            indicators: judgment.indicators,
            confidence: Some(judgment.confidence),
            duration,
            attempts,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Terminal failure after the retry policy gave up (or refused to retry)
    pub fn failed(
        work_item_id: i64,
        model_id: impl Into<String>,
        error: ResultError,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            work_item_id,
            model_id: model_id.into(),
            status: ResultStatus::Failed,
            description: String::new(),
            concern_level: None,
            indicators: Vec::new(),
            confidence: None,
            duration,
            attempts,
            error: Some(error),
            created_at: Utc::now(),
        }
    }

    /// No inference attempted (e.g. artifact missing on disk)
    pub fn skipped(
        work_item_id: i64,
        model_id: impl Into<String>,
        kind: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            work_item_id,
            model_id: model_id.into(),
            status: ResultStatus::Skipped,
            description: String::new(),
            concern_level: None,
            indicators: Vec::new(),
            confidence: None,
            duration: Duration::ZERO,
            attempts: 0,
            error: Some(ResultError {
                kind: kind.to_string(),
                detail: reason.into(),
                raw_output: None,
            }),
            created_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// The structured judgment, if this is a usable success row
    pub fn judgment(&self) -> Option<ModelJudgment> {
        match (self.status, self.concern_level, self.confidence) {
            (ResultStatus::Success, Some(concern_level), Some(confidence)) => Some(ModelJudgment {
                description: self.description.clone(),
                concern_level,
                indicators: self.indicators.clone(),
                confidence,
            }),
            _ => None,
        }
    }
}

/// Per (work item × model) lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemModelState {
    /// No successful result; eligible for the next run
    Pending,
    /// A worker currently holds the item
    InFlight,
    /// Terminal, immutable
    Success,
    /// Terminal for this run; re-enters Pending on the next one
    Failed,
}

impl ItemModelState {
    /// State implied by the authoritative stored result (if any)
    pub fn from_result(result: Option<&ModelResult>) -> Self {
        match result.map(|r| r.status) {
            None | Some(ResultStatus::Skipped) => ItemModelState::Pending,
            Some(ResultStatus::Success) => ItemModelState::Success,
            Some(ResultStatus::Failed) => ItemModelState::Failed,
        }
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: ItemModelState) -> bool {
        use ItemModelState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (InFlight, Success)
                | (InFlight, Failed)
                | (InFlight, Pending)
                | (Failed, Pending)
        )
    }

    /// Still needs inference from this model
    pub fn is_pending_work(self) -> bool {
        !matches!(self, ItemModelState::Success)
    }
}
