//! Work item queries
//!
//! The pending set for model M is every work item without an authoritative
//! `success` result for M, narrowed by an optional [`WorkItemFilter`].

use crate::db::{format_timestamp, parse_timestamp};
use crate::models::WorkItem;
use crate::scheduler::filter::WorkItemFilter;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::{Path, PathBuf};
use vigil_common::Result;

fn row_to_work_item(row: &SqliteRow) -> Result<WorkItem> {
    let path: String = row.get("artifact_path");
    let created_at: String = row.get("created_at");
    Ok(WorkItem {
        id: row.get("id"),
        artifact_path: PathBuf::from(path),
        source_ref: row.get("source_ref"),
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Register an artifact; idempotent on path
///
/// Returns the item id and whether a new row was created.
pub async fn register_work_item(
    pool: &SqlitePool,
    artifact_path: &Path,
    source_ref: Option<&str>,
) -> Result<(i64, bool)> {
    let path = artifact_path.to_string_lossy().to_string();

    let inserted = sqlx::query(
        r#"
        INSERT INTO work_items (artifact_path, source_ref, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT(artifact_path) DO NOTHING
        "#,
    )
    .bind(&path)
    .bind(source_ref)
    .bind(format_timestamp(&Utc::now()))
    .execute(pool)
    .await?
    .rows_affected()
        > 0;

    let id: i64 = sqlx::query_scalar("SELECT id FROM work_items WHERE artifact_path = ?")
        .bind(&path)
        .fetch_one(pool)
        .await?;

    Ok((id, inserted))
}

pub async fn load_work_item(pool: &SqlitePool, id: i64) -> Result<Option<WorkItem>> {
    let row = sqlx::query(
        "SELECT id, artifact_path, source_ref, created_at FROM work_items WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_work_item).transpose()
}

pub async fn count_work_items(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM work_items").fetch_one(pool).await?)
}

/// Items lacking an authoritative success result for `model_id`
///
/// Ordered by id so repeated runs dispatch in a stable order.
pub async fn pending_work_items(
    pool: &SqlitePool,
    model_id: &str,
    filter: &WorkItemFilter,
) -> Result<Vec<WorkItem>> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT w.id, w.artifact_path, w.source_ref, w.created_at FROM work_items w \
         WHERE NOT EXISTS (SELECT 1 FROM model_results r \
         WHERE r.work_item_id = w.id AND r.superseded = 0 \
         AND r.status = 'success' AND r.model_id = ",
    );
    qb.push_bind(model_id).push(")");
    filter.push_predicates(&mut qb, model_id);
    qb.push(" ORDER BY w.id");
    filter.push_limit(&mut qb);

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(row_to_work_item).collect()
}
