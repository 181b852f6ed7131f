//! Ensemble verdict persistence
//!
//! One row per work item. Every fusion overwrites the row; `fusion_count`
//! only moves when the contributing evidence changed.

use crate::db::{decode_tags, encode_tags, format_timestamp, parse_timestamp};
use crate::models::{EnsembleVerdict, StoredVerdict, VerdictChange};
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use vigil_common::{ConcernLevel, Result};

const VERDICT_COLUMNS: &str = "work_item_id, concern_level, confidence, indicators, \
     contributing_models, contributing_count, agreement, low_confidence, priority_score, \
     flagged_for_review, fusion_count, computed_at";

/// SQL expression ranking stored concern levels by severity
const CONCERN_ORDINAL_SQL: &str = "CASE concern_level \
     WHEN 'critical' THEN 4 WHEN 'high' THEN 3 WHEN 'medium' THEN 2 WHEN 'low' THEN 1 ELSE 0 END";

fn row_to_verdict(row: &SqliteRow) -> Result<StoredVerdict> {
    let concern: String = row.get("concern_level");
    let indicators: String = row.get("indicators");
    let contributing: String = row.get("contributing_models");
    let agreement: String = row.get("agreement");
    let computed_at: String = row.get("computed_at");

    Ok(StoredVerdict {
        verdict: EnsembleVerdict {
            work_item_id: row.get("work_item_id"),
            concern_level: concern.parse::<ConcernLevel>()?,
            confidence: row.get("confidence"),
            indicators: decode_tags(&indicators)?,
            contributing_models: decode_tags(&contributing)?,
            agreement: agreement.parse()?,
            low_confidence: row.get::<i64, _>("low_confidence") != 0,
            priority_score: row.get("priority_score"),
            flagged_for_review: row.get::<i64, _>("flagged_for_review") != 0,
        },
        fusion_count: row.get("fusion_count"),
        computed_at: parse_timestamp(&computed_at)?,
    })
}

/// Result of [`upsert_verdict`]
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictWrite {
    pub stored: StoredVerdict,
    pub change: VerdictChange,
}

/// Write (or overwrite) the verdict for its work item
///
/// `fusion_count` starts at 1 and only increases when the contributing model
/// set differs from the stored verdict's. Rewriting over the same evidence
/// refreshes the row and leaves the count alone.
pub async fn upsert_verdict(pool: &SqlitePool, verdict: &EnsembleVerdict) -> Result<VerdictWrite> {
    let computed_at = Utc::now();
    let contributing = encode_tags(&verdict.contributing_models)?;

    let mut tx = pool.begin().await?;

    let prior: Option<(String, i64)> = sqlx::query_as(
        "SELECT contributing_models, fusion_count FROM ensemble_verdicts WHERE work_item_id = ?",
    )
    .bind(verdict.work_item_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (change, fusion_count) = match prior {
        None => (VerdictChange::Created, 1),
        Some((stored, count)) if stored == contributing => (VerdictChange::Unchanged, count),
        Some((_, count)) => (VerdictChange::Refused, count + 1),
    };

    sqlx::query(
        r#"
        INSERT INTO ensemble_verdicts (
            work_item_id, concern_level, confidence, indicators, contributing_models,
            contributing_count, agreement, low_confidence, priority_score, flagged_for_review,
            fusion_count, computed_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(work_item_id) DO UPDATE SET
            concern_level = excluded.concern_level,
            confidence = excluded.confidence,
            indicators = excluded.indicators,
            contributing_models = excluded.contributing_models,
            contributing_count = excluded.contributing_count,
            agreement = excluded.agreement,
            low_confidence = excluded.low_confidence,
            priority_score = excluded.priority_score,
            flagged_for_review = excluded.flagged_for_review,
            fusion_count = excluded.fusion_count,
            computed_at = excluded.computed_at
        "#,
    )
    .bind(verdict.work_item_id)
    .bind(verdict.concern_level.as_str())
    .bind(verdict.confidence)
    .bind(encode_tags(&verdict.indicators)?)
    .bind(&contributing)
    .bind(verdict.contributing_count() as i64)
    .bind(verdict.agreement.as_str())
    .bind(verdict.low_confidence as i64)
    .bind(verdict.priority_score)
    .bind(verdict.flagged_for_review as i64)
    .bind(fusion_count)
    .bind(format_timestamp(&computed_at))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(VerdictWrite {
        stored: StoredVerdict {
            verdict: verdict.clone(),
            fusion_count,
            computed_at,
        },
        change,
    })
}

pub async fn load_verdict(pool: &SqlitePool, work_item_id: i64) -> Result<Option<StoredVerdict>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM ensemble_verdicts WHERE work_item_id = ?",
        VERDICT_COLUMNS
    ))
    .bind(work_item_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_verdict).transpose()
}

/// Verdicts in review-priority order
///
/// Concern level descending, then ensemble confidence descending, then
/// work item id ascending so the order is total.
pub async fn priority_list(
    pool: &SqlitePool,
    limit: Option<usize>,
    flagged_only: bool,
) -> Result<Vec<StoredVerdict>> {
    let sql = format!(
        "SELECT {} FROM ensemble_verdicts {} \
         ORDER BY {} DESC, confidence DESC, work_item_id ASC LIMIT ?",
        VERDICT_COLUMNS,
        if flagged_only { "WHERE flagged_for_review = 1" } else { "" },
        CONCERN_ORDINAL_SQL,
    );

    // SQLite treats a negative LIMIT as unbounded
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;

    rows.iter().map(row_to_verdict).collect()
}

/// Item counts by fusion state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FusionCoverage {
    pub fused: i64,
    pub refused: i64,
    pub incomplete: i64,
    pub flagged: i64,
}

pub async fn fusion_coverage(pool: &SqlitePool) -> Result<FusionCoverage> {
    let row = sqlx::query(
        r#"
        SELECT
            (SELECT COUNT(*) FROM work_items) AS total,
            COALESCE(SUM(CASE WHEN fusion_count = 1 THEN 1 ELSE 0 END), 0) AS fused,
            COALESCE(SUM(CASE WHEN fusion_count > 1 THEN 1 ELSE 0 END), 0) AS refused,
            COALESCE(SUM(flagged_for_review), 0) AS flagged
        FROM ensemble_verdicts
        "#,
    )
    .fetch_one(pool)
    .await?;

    let total: i64 = row.get("total");
    let fused: i64 = row.get("fused");
    let refused: i64 = row.get("refused");

    Ok(FusionCoverage {
        fused,
        refused,
        incomplete: (total - fused - refused).max(0),
        flagged: row.get("flagged"),
    })
}
