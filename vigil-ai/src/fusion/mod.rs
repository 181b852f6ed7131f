//! Ensemble fusion
//!
//! [`fuse_results`] is a pure function of the current result set: no clock,
//! no store, no memory of earlier verdicts. Inputs are sorted by model id
//! before any arithmetic, so the same set always yields a bit-identical
//! verdict regardless of arrival order.
//!
//! # Algorithm
//! 1. Drop failed/skipped results; none left → `InsufficientEvidence`
//! 2. Quorum check against the required model set (degraded mode optional)
//! 3. Concern level = max over contributors (never averaged down)
//! 4. Indicators = case-insensitive union, first-seen casing
//! 5. Confidence = mean self-confidence × agreement factor, clamped to [0, 1]
//!
//! The agreement factor is `floor + (1 - floor) × agreeing / n`, where
//! `agreeing` counts contributors that reported the maximal level.

pub mod engine;
pub mod priority;

pub use engine::{FuseAllSummary, FusionEngine};
pub use priority::{priority_cmp, priority_score, rank_verdicts};

use crate::config::FusionConfig;
use crate::error::FusionError;
use crate::models::{AgreementLevel, EnsembleVerdict, ModelJudgment, ModelResult};
use std::collections::HashSet;
use tracing::warn;
use vigil_common::ConcernLevel;

/// Fusion parameters resolved against the configured model set
#[derive(Debug, Clone, PartialEq)]
pub struct FusionPolicy {
    /// Models that make up a full quorum
    pub required_models: Vec<String>,
    /// Minimum contributing required models for degraded fusion
    pub min_quorum: Option<usize>,
    pub agreement_floor: f64,
    pub review_confidence_threshold: f64,
    pub review_indicator_threshold: usize,
    pub max_indicators: Option<usize>,
}

impl FusionPolicy {
    pub fn new(required_models: Vec<String>, config: &FusionConfig) -> Self {
        Self {
            required_models,
            min_quorum: config.min_quorum,
            agreement_floor: config.agreement_floor.clamp(0.0, 1.0),
            review_confidence_threshold: config.review_confidence_threshold,
            review_indicator_threshold: config.review_indicator_threshold,
            max_indicators: config.max_indicators,
        }
    }

    /// Policy with default tuning over `required_models`
    pub fn for_models<S: AsRef<str>>(required_models: &[S]) -> Self {
        Self::new(
            required_models.iter().map(|m| m.as_ref().to_string()).collect(),
            &FusionConfig::default(),
        )
    }
}

/// Fuse all results currently known for one work item
pub fn fuse_results(
    work_item_id: i64,
    results: &[ModelResult],
    policy: &FusionPolicy,
) -> Result<EnsembleVerdict, FusionError> {
    let mut contributing: Vec<(&str, ModelJudgment)> = results
        .iter()
        .filter_map(|r| r.judgment().map(|j| (r.model_id.as_str(), j)))
        .collect();

    if contributing.is_empty() {
        return Err(FusionError::InsufficientEvidence { work_item_id });
    }

    contributing.sort_by(|a, b| a.0.cmp(b.0));
    contributing.dedup_by(|a, b| a.0 == b.0);

    let low_confidence = check_quorum(&contributing, policy)?;

    let n = contributing.len();
    let concern_level = contributing
        .iter()
        .map(|(_, j)| j.concern_level)
        .max()
        .unwrap_or(ConcernLevel::None);

    let indicators = merge_indicators(
        contributing.iter().map(|(_, j)| j.indicators.as_slice()),
        policy.max_indicators,
    );

    let mean = contributing
        .iter()
        .map(|(model, j)| sanitize_confidence(work_item_id, model, j.confidence))
        .sum::<f64>()
        / n as f64;
    let agreeing = contributing.iter().filter(|(_, j)| j.concern_level == concern_level).count();
    let factor = agreement_factor(agreeing, n, policy.agreement_floor);
    let confidence = clamp_confidence(work_item_id, mean * factor);

    let min_level = contributing
        .iter()
        .map(|(_, j)| j.concern_level)
        .min()
        .unwrap_or(concern_level);
    let agreement = AgreementLevel::from_spread(concern_level.ordinal() - min_level.ordinal());

    let flagged_for_review =
        should_flag(concern_level, confidence, agreement, indicators.len(), policy);

    Ok(EnsembleVerdict {
        work_item_id,
        concern_level,
        confidence,
        priority_score: priority_score(concern_level, confidence, indicators.len()),
        indicators,
        contributing_models: contributing.iter().map(|(m, _)| m.to_string()).collect(),
        agreement,
        low_confidence,
        flagged_for_review,
    })
}

/// Returns whether fusion runs in degraded (low-confidence) mode
fn check_quorum(
    contributing: &[(&str, ModelJudgment)],
    policy: &FusionPolicy,
) -> Result<bool, FusionError> {
    let need = policy.required_models.len();
    let present: HashSet<&str> = contributing.iter().map(|(m, _)| *m).collect();
    let have = policy
        .required_models
        .iter()
        .filter(|m| present.contains(m.as_str()))
        .count();

    if have >= need {
        return Ok(false);
    }
    match policy.min_quorum {
        Some(quorum) if have >= quorum.max(1) => Ok(true),
        _ => Err(FusionError::QuorumNotMet { have, need }),
    }
}

/// Confidence multiplier for `agreeing` of `n` contributors at the max level
pub fn agreement_factor(agreeing: usize, n: usize, floor: f64) -> f64 {
    if n == 0 {
        return floor;
    }
    floor + (1.0 - floor) * (agreeing.min(n) as f64 / n as f64)
}

/// Union of indicator lists, deduplicated case-insensitively
///
/// Entries are trimmed; blanks dropped; the first spelling seen wins.
pub fn merge_indicators<'a>(
    lists: impl Iterator<Item = &'a [String]>,
    cap: Option<usize>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for list in lists {
        for tag in list {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            if seen.insert(tag.to_lowercase()) {
                merged.push(tag.to_string());
            }
        }
    }
    if let Some(cap) = cap {
        merged.truncate(cap);
    }
    merged
}

fn sanitize_confidence(work_item_id: i64, model: &str, value: f64) -> f64 {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        return value;
    }
    warn!(
        anomaly = "confidence_out_of_range",
        item_id = work_item_id,
        model = %model,
        value,
        "Model confidence outside [0, 1], clamping"
    );
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn clamp_confidence(work_item_id: i64, value: f64) -> f64 {
    if (0.0..=1.0).contains(&value) {
        return value;
    }
    warn!(
        anomaly = "confidence_out_of_range",
        item_id = work_item_id,
        value,
        "Ensemble confidence outside [0, 1], clamping"
    );
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn should_flag(
    concern: ConcernLevel,
    confidence: f64,
    agreement: AgreementLevel,
    indicator_count: usize,
    policy: &FusionPolicy,
) -> bool {
    let severe = concern >= ConcernLevel::High;
    (severe && confidence >= policy.review_confidence_threshold)
        || (severe && agreement == AgreementLevel::Low)
        || indicator_count >= policy.review_indicator_threshold
}
