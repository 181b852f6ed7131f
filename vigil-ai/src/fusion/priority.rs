//! Review priority
//!
//! Total order over verdicts: concern level descending, ensemble confidence
//! descending, work item id ascending.

use crate::models::{EnsembleVerdict, StoredVerdict};
use std::cmp::Ordering;
use vigil_common::ConcernLevel;

/// Dashboard sort score: 2×concern ordinal + 2×confidence + min(0.5×indicators, 3)
pub fn priority_score(concern: ConcernLevel, confidence: f64, indicator_count: usize) -> f64 {
    let indicator_bonus = (indicator_count as f64 * 0.5).min(3.0);
    concern.ordinal() as f64 * 2.0 + confidence * 2.0 + indicator_bonus
}

/// `Less` means `a` should be reviewed before `b`
pub fn priority_cmp(a: &EnsembleVerdict, b: &EnsembleVerdict) -> Ordering {
    b.concern_level
        .cmp(&a.concern_level)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.work_item_id.cmp(&b.work_item_id))
}

/// Sort verdicts into review order
pub fn rank_verdicts(verdicts: &mut [StoredVerdict]) {
    verdicts.sort_by(|a, b| priority_cmp(&a.verdict, &b.verdict));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgreementLevel;
    use chrono::Utc;

    fn stored(id: i64, level: ConcernLevel, confidence: f64) -> StoredVerdict {
        StoredVerdict {
            verdict: EnsembleVerdict {
                work_item_id: id,
                concern_level: level,
                confidence,
                indicators: Vec::new(),
                contributing_models: vec!["m".to_string()],
                agreement: AgreementLevel::Perfect,
                low_confidence: false,
                priority_score: priority_score(level, confidence, 0),
                flagged_for_review: false,
            },
            fusion_count: 1,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_rank_order() {
        let mut verdicts = vec![
            stored(1, ConcernLevel::Medium, 0.9),
            stored(2, ConcernLevel::Critical, 0.2),
            stored(3, ConcernLevel::High, 0.5),
            stored(4, ConcernLevel::High, 0.8),
            stored(5, ConcernLevel::High, 0.8),
        ];
        rank_verdicts(&mut verdicts);
        let ids: Vec<i64> = verdicts.iter().map(|v| v.verdict.work_item_id).collect();
        assert_eq!(ids, vec![2, 4, 5, 3, 1]);
    }

    #[test]
    fn test_priority_score() {
        assert_eq!(priority_score(ConcernLevel::None, 0.0, 0), 0.0);
        assert!((priority_score(ConcernLevel::High, 0.5, 2) - 8.0).abs() < 1e-12);
        // Indicator bonus caps at 3
        assert!((priority_score(ConcernLevel::Critical, 1.0, 40) - 13.0).abs() < 1e-12);
    }
}
