//! Model result persistence
//!
//! Every attempt is kept. Exactly one row per (item, model) is authoritative
//! (`superseded = 0`); a new result supersedes a prior failed or skipped row,
//! and a success is never replaced.

use crate::db::{decode_tags, encode_tags, format_timestamp, parse_timestamp};
use crate::models::{ModelResult, ResultError, ResultStatus};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::warn;
use vigil_common::{ConcernLevel, Result};

/// Result of [`insert_result`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New authoritative row
    Inserted { id: i64, superseded_prior: bool },
    /// An authoritative success already exists; nothing written
    AlreadySucceeded,
}

fn row_to_result(row: &SqliteRow) -> Result<ModelResult> {
    let status: String = row.get("status");
    let concern: Option<String> = row.get("concern_level");
    let indicators: String = row.get("indicators");
    let duration_ms: i64 = row.get("duration_ms");
    let attempts: i64 = row.get("attempts");
    let created_at: String = row.get("created_at");
    let error_kind: Option<String> = row.get("error_kind");

    let error = error_kind.map(|kind| ResultError {
        kind,
        detail: row.get::<Option<String>, _>("error_detail").unwrap_or_default(),
        raw_output: row.get("raw_output"),
    });

    Ok(ModelResult {
        work_item_id: row.get("work_item_id"),
        model_id: row.get("model_id"),
        status: status.parse()?,
        description: row.get("description"),
        concern_level: concern.as_deref().map(str::parse::<ConcernLevel>).transpose()?,
        indicators: decode_tags(&indicators)?,
        confidence: row.get("confidence"),
        duration: Duration::from_millis(duration_ms.max(0) as u64),
        attempts: attempts.max(0) as u32,
        error,
        created_at: parse_timestamp(&created_at)?,
    })
}

const RESULT_COLUMNS: &str = "work_item_id, model_id, status, description, concern_level, \
     indicators, confidence, duration_ms, attempts, error_kind, error_detail, raw_output, \
     created_at";

/// Persist a result as the new authoritative row for its (item, model) pair
pub async fn insert_result(pool: &SqlitePool, result: &ModelResult) -> Result<InsertOutcome> {
    let mut tx = pool.begin().await?;

    let existing: Option<String> = sqlx::query_scalar(
        "SELECT status FROM model_results \
         WHERE work_item_id = ? AND model_id = ? AND superseded = 0",
    )
    .bind(result.work_item_id)
    .bind(&result.model_id)
    .fetch_optional(&mut *tx)
    .await?;

    if existing.as_deref() == Some(ResultStatus::Success.as_str()) {
        tx.rollback().await?;
        warn!(
            item_id = result.work_item_id,
            model = %result.model_id,
            attempted_status = %result.status,
            "Refusing to overwrite successful model result"
        );
        return Ok(InsertOutcome::AlreadySucceeded);
    }

    if existing.is_some() {
        sqlx::query(
            "UPDATE model_results SET superseded = 1 \
             WHERE work_item_id = ? AND model_id = ? AND superseded = 0",
        )
        .bind(result.work_item_id)
        .bind(&result.model_id)
        .execute(&mut *tx)
        .await?;
    }

    let (error_kind, error_detail, raw_output) = match &result.error {
        Some(e) => (Some(e.kind.as_str()), Some(e.detail.as_str()), e.raw_output.as_deref()),
        None => (None, None, None),
    };

    let id = sqlx::query(&format!(
        "INSERT INTO model_results ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        RESULT_COLUMNS
    ))
    .bind(result.work_item_id)
    .bind(&result.model_id)
    .bind(result.status.as_str())
    .bind(&result.description)
    .bind(result.concern_level.map(|c| c.as_str()))
    .bind(encode_tags(&result.indicators)?)
    .bind(result.confidence)
    .bind(result.duration.as_millis() as i64)
    .bind(result.attempts as i64)
    .bind(error_kind)
    .bind(error_detail)
    .bind(raw_output)
    .bind(format_timestamp(&result.created_at))
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    tx.commit().await?;

    Ok(InsertOutcome::Inserted {
        id,
        superseded_prior: existing.is_some(),
    })
}

/// Authoritative result for one (item, model) pair
pub async fn load_result(
    pool: &SqlitePool,
    work_item_id: i64,
    model_id: &str,
) -> Result<Option<ModelResult>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM model_results WHERE work_item_id = ? AND model_id = ? AND superseded = 0",
        RESULT_COLUMNS
    ))
    .bind(work_item_id)
    .bind(model_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_result).transpose()
}

/// All authoritative results for one item, ordered by model id
pub async fn load_results_for_item(
    pool: &SqlitePool,
    work_item_id: i64,
) -> Result<Vec<ModelResult>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM model_results WHERE work_item_id = ? AND superseded = 0 ORDER BY model_id",
        RESULT_COLUMNS
    ))
    .bind(work_item_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_result).collect()
}

/// Full attempt history for one (item, model) pair, oldest first
pub async fn load_attempt_history(
    pool: &SqlitePool,
    work_item_id: i64,
    model_id: &str,
) -> Result<Vec<ModelResult>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM model_results WHERE work_item_id = ? AND model_id = ? ORDER BY id",
        RESULT_COLUMNS
    ))
    .bind(work_item_id)
    .bind(model_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_result).collect()
}

/// Items with at least one authoritative success (fusion candidates)
pub async fn fusion_candidates(pool: &SqlitePool) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT DISTINCT work_item_id FROM model_results \
         WHERE superseded = 0 AND status = 'success' ORDER BY work_item_id",
    )
    .fetch_all(pool)
    .await?)
}

/// Per-model coverage over all work items
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCoverage {
    pub model_id: String,
    pub total_items: i64,
    pub success: i64,
    pub failed: i64,
    pub skipped: i64,
    /// Items without a success (failed and skipped included)
    pub pending: i64,
}

pub async fn model_coverage(pool: &SqlitePool, model_id: &str) -> Result<ModelCoverage> {
    let total_items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM work_items")
        .fetch_one(pool)
        .await?;

    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS success,
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
            COALESCE(SUM(CASE WHEN status = 'skipped' THEN 1 ELSE 0 END), 0) AS skipped
        FROM model_results
        WHERE model_id = ? AND superseded = 0
        "#,
    )
    .bind(model_id)
    .fetch_one(pool)
    .await?;

    let success: i64 = row.get("success");
    Ok(ModelCoverage {
        model_id: model_id.to_string(),
        total_items,
        success,
        failed: row.get("failed"),
        skipped: row.get("skipped"),
        pending: (total_items - success).max(0),
    })
}
