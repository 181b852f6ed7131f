//! Concern level vocabulary
//!
//! Ordered severity classification shared by the analysis orchestrator and
//! the reporting tools that read its output. Ordering is by severity:
//! `none < low < medium < high < critical`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity classification reported by a model or produced by fusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcernLevel {
    None,
    #[serde(alias = "minimal")]
    Low,
    #[serde(alias = "moderate")]
    Medium,
    #[serde(alias = "severe")]
    High,
    #[serde(alias = "extreme")]
    Critical,
}

impl ConcernLevel {
    /// All levels in ascending severity
    pub const ALL: [ConcernLevel; 5] = [
        ConcernLevel::None,
        ConcernLevel::Low,
        ConcernLevel::Medium,
        ConcernLevel::High,
        ConcernLevel::Critical,
    ];

    /// Severity ordinal (none = 0 ... critical = 4)
    pub fn ordinal(self) -> u8 {
        match self {
            ConcernLevel::None => 0,
            ConcernLevel::Low => 1,
            ConcernLevel::Medium => 2,
            ConcernLevel::High => 3,
            ConcernLevel::Critical => 4,
        }
    }

    /// Canonical lowercase name, as stored in the database
    pub fn as_str(self) -> &'static str {
        match self {
            ConcernLevel::None => "none",
            ConcernLevel::Low => "low",
            ConcernLevel::Medium => "medium",
            ConcernLevel::High => "high",
            ConcernLevel::Critical => "critical",
        }
    }

    /// Parse a model-reported level, accepting the alternate vocabulary some
    /// prompts elicit (minimal / moderate / severe / extreme).
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    /// Returns `None` for anything outside the known vocabulary.
    pub fn from_model_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "none" => Some(ConcernLevel::None),
            "low" | "minimal" => Some(ConcernLevel::Low),
            "medium" | "moderate" => Some(ConcernLevel::Medium),
            "high" | "severe" => Some(ConcernLevel::High),
            "critical" | "extreme" => Some(ConcernLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for ConcernLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConcernLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ConcernLevel::from_model_label(s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown concern level: {:?}", s)))
    }
}
