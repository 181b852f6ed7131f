//! Database Test Utilities

use super::image_fixtures::write_test_png;
use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use vigil_ai::cache::{ImageStandardizer, PreprocessingCache};
use vigil_ai::db::work_items::register_work_item;

/// Create temporary test database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_vigil.db");
    let pool = vigil_common::db::init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Write `count` distinct PNG artifacts under `dir` and register each
///
/// Files are named `artifact_000.png`, `artifact_001.png`, ... and ids are
/// returned in registration order.
pub async fn seed_work_items(pool: &SqlitePool, dir: &Path, count: usize) -> Result<Vec<i64>> {
    let images = dir.join("images");
    std::fs::create_dir_all(&images)?;

    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let path = write_test_png(&images.join(format!("artifact_{:03}.png", i)), i as u8)?;
        let (id, _) = register_work_item(pool, &path, Some("test")).await?;
        ids.push(id);
    }
    Ok(ids)
}

/// Preprocessing cache under `dir/cache` with the default standardizer
pub fn test_cache(dir: &Path) -> Arc<PreprocessingCache> {
    Arc::new(PreprocessingCache::new(
        dir.join("cache"),
        Arc::new(ImageStandardizer::default()),
    ))
}
