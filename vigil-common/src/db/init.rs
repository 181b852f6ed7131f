//! Database initialization
//!
//! Opens (or creates) the work item store and applies the schema the
//! orchestrator reads and writes. Table creation is idempotent, so every
//! binary may call `init_database` on startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// SQLite busy timeout applied to every pooled connection.
///
/// Kept short so lock contention surfaces quickly to `retry_on_lock`,
/// which owns the longer backoff budget.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 250;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    init_database_with(db_path, 20).await
}

/// Initialize database with an explicit pool size
///
/// Pool size should be at least the batch concurrency plus one so workers
/// persisting results never starve the pending-set reader.
pub async fn init_database_with(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Per-connection settings: WAL allows concurrent readers with one writer,
    // which is the access pattern of the worker pool.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(2))
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all vigil tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_work_items_table(pool).await?;
    create_model_results_table(pool).await?;
    create_ensemble_verdicts_table(pool).await?;
    Ok(())
}

/// Analyzable artifacts registered by the ingestion side
pub async fn create_work_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            artifact_path TEXT NOT NULL UNIQUE,
            source_ref TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-(item, model) inference attempts
///
/// Every attempt is kept for audit; exactly one row per (item, model) has
/// `superseded = 0` and is authoritative. The partial unique index makes a
/// second authoritative row impossible even under concurrent writers.
pub async fn create_model_results_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS model_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            work_item_id INTEGER NOT NULL REFERENCES work_items(id) ON DELETE CASCADE,
            model_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('success', 'failed', 'skipped')),
            description TEXT NOT NULL DEFAULT '',
            concern_level TEXT,
            indicators TEXT NOT NULL DEFAULT '[]',
            confidence REAL CHECK (confidence IS NULL OR (confidence >= 0.0 AND confidence <= 1.0)),
            duration_ms INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 1,
            error_kind TEXT,
            error_detail TEXT,
            raw_output TEXT,
            superseded INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_model_results_authoritative
        ON model_results (work_item_id, model_id)
        WHERE superseded = 0
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_model_results_model_status
        ON model_results (model_id, status)
        WHERE superseded = 0
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One fused verdict per work item, overwritten on re-fusion
pub async fn create_ensemble_verdicts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ensemble_verdicts (
            work_item_id INTEGER PRIMARY KEY REFERENCES work_items(id) ON DELETE CASCADE,
            concern_level TEXT NOT NULL,
            confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
            indicators TEXT NOT NULL DEFAULT '[]',
            contributing_models TEXT NOT NULL DEFAULT '[]',
            contributing_count INTEGER NOT NULL,
            agreement TEXT NOT NULL,
            low_confidence INTEGER NOT NULL DEFAULT 0,
            priority_score REAL NOT NULL,
            flagged_for_review INTEGER NOT NULL DEFAULT 0,
            fusion_count INTEGER NOT NULL DEFAULT 1,
            computed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_ensemble_verdicts_priority
        ON ensemble_verdicts (concern_level, confidence)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_all_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("data").join("vigil.db");

        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert_eq!(tables, vec!["ensemble_verdicts", "model_results", "work_items"]);
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("vigil.db");

        let pool = init_database(&db_path).await.unwrap();
        create_schema(&pool).await.unwrap();
        pool.close().await;

        // Reopen existing database
        let pool = init_database(&db_path).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM work_items")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_out_of_range_verdict_confidence_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("vigil.db")).await.unwrap();

        sqlx::query(
            "INSERT INTO work_items (artifact_path, created_at) \
             VALUES ('a.jpg', '2024-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = sqlx::query(
            r#"
            INSERT INTO ensemble_verdicts
                (work_item_id, concern_level, confidence, contributing_count, agreement,
                 priority_score, computed_at)
            VALUES (1, 'high', 1.5, 1, 'perfect', 1.0, '2024-01-01T00:00:00Z')
            "#,
        )
        .execute(&pool)
        .await;

        assert!(result.is_err(), "CHECK constraint should reject confidence > 1.0");
    }
}
