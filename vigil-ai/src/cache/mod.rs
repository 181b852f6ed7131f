//! Preprocessing cache
//!
//! Content-addressed store of transformed artifacts. Key =
//! SHA-256(source bytes, transform params); entries live at
//! `<dir>/<key[..2]>/<key>.<ext>` and are never mutated once written.
//!
//! Concurrent `prepare` calls for the same key serialize on a per-key async
//! lock, so the transform runs at most once per key; later callers find the
//! file on disk and count as hits. Distinct keys never contend.

pub mod transform;

pub use transform::{ImageStandardizer, Transform, TransformOutput};

use crate::error::CacheError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

/// A transformed artifact ready for model consumption
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedArtifact {
    /// Cached file handed to the adapter
    pub path: PathBuf,
    pub cache_key: String,
    /// Original artifact location
    pub source: PathBuf,
    pub cache_hit: bool,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub transforms_executed: u64,
}

/// On-disk footprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub files: u64,
    pub bytes: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    transforms_executed: AtomicU64,
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// A caller's hold on one key's lock slot
///
/// Dropping it (finished or cancelled) removes the slot once no other caller
/// holds or waits on it.
struct KeyLease<'a> {
    cache: &'a PreprocessingCache,
    key: String,
    lock: KeyLock,
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.cache.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map and this lease hold it
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.key);
        }
    }
}

pub struct PreprocessingCache {
    dir: PathBuf,
    transform: Arc<dyn Transform>,
    locks: Mutex<HashMap<String, KeyLock>>,
    counters: Counters,
}

impl PreprocessingCache {
    pub fn new(dir: impl Into<PathBuf>, transform: Arc<dyn Transform>) -> Self {
        Self {
            dir: dir.into(),
            transform,
            locks: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for `source` bytes under the current transform
    pub fn cache_key(&self, source: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source);
        hasher.update([0u8]);
        hasher.update(self.transform.params().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str, extension: &str) -> PathBuf {
        self.dir.join(&key[..2]).join(format!("{}.{}", key, extension))
    }

    fn find_entry(&self, key: &str) -> Option<PathBuf> {
        self.transform
            .output_extensions()
            .iter()
            .map(|ext| self.entry_path(key, ext))
            .find(|p| p.is_file())
    }

    fn lease_key(&self, key: &str) -> KeyLease<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks.entry(key.to_string()).or_default().clone();
        KeyLease {
            cache: self,
            key: key.to_string(),
            lock,
        }
    }

    /// Return the standardized artifact for `source`, transforming on miss
    pub async fn prepare(&self, source: &Path) -> Result<PreparedArtifact, CacheError> {
        let bytes = tokio::fs::read(source).await?;
        let key = self.cache_key(&bytes);

        let lease = self.lease_key(&key);
        let _guard = lease.lock.lock().await;
        self.prepare_locked(source, &key, bytes).await
    }

    async fn prepare_locked(
        &self,
        source: &Path,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<PreparedArtifact, CacheError> {
        if let Some(path) = self.find_entry(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, source = %source.display(), "Preprocessing cache hit");
            return Ok(PreparedArtifact {
                path,
                cache_key: key.to_string(),
                source: source.to_path_buf(),
                cache_hit: true,
            });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let transform = Arc::clone(&self.transform);
        let output = tokio::task::spawn_blocking(move || transform.apply(&bytes))
            .await
            .map_err(|e| CacheError::Transform(format!("Transform task failed: {}", e)))??;
        self.counters.transforms_executed.fetch_add(1, Ordering::Relaxed);

        let path = self.entry_path(key, output.extension);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_file_name(format!("{}.{}.tmp", key, Uuid::new_v4()));
        tokio::fs::write(&tmp, &output.bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(
            key = %key,
            source = %source.display(),
            bytes = output.bytes.len(),
            "Preprocessing cache miss, stored transformed artifact"
        );

        Ok(PreparedArtifact {
            path,
            cache_key: key.to_string(),
            source: source.to_path_buf(),
            cache_hit: false,
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            transforms_executed: self.counters.transforms_executed.load(Ordering::Relaxed),
        }
    }

    /// Count cached files and bytes (temp files excluded)
    pub fn disk_usage(&self) -> DiskUsage {
        let mut usage = DiskUsage::default();
        for entry in WalkDir::new(&self.dir).into_iter().filter_map(|e| e.ok()) {
            let is_tmp = entry.path().extension().is_some_and(|e| e == "tmp");
            if !entry.file_type().is_file() || is_tmp {
                continue;
            }
            usage.files += 1;
            usage.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Uppercases text; slow enough for concurrent callers to overlap
    struct SlowUpper {
        calls: Arc<AtomicUsize>,
    }

    impl Transform for SlowUpper {
        fn params(&self) -> String {
            "upper/v1".to_string()
        }

        fn output_extensions(&self) -> &'static [&'static str] {
            &["txt"]
        }

        fn apply(&self, source: &[u8]) -> Result<TransformOutput, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(TransformOutput {
                bytes: source.to_ascii_uppercase(),
                extension: "txt",
            })
        }
    }

    fn setup() -> (TempDir, Arc<AtomicUsize>, PreprocessingCache) {
        let temp = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = PreprocessingCache::new(
            temp.path().join("cache"),
            Arc::new(SlowUpper { calls: calls.clone() }),
        );
        (temp, calls, cache)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (temp, calls, cache) = setup();
        let src = temp.path().join("a.txt");
        std::fs::write(&src, b"hello").unwrap();

        let first = cache.prepare(&src).await.unwrap();
        let second = cache.prepare(&src).await.unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.path, second.path);
        assert_eq!(std::fs::read(&first.path).unwrap(), b"HELLO");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                transforms_executed: 1
            }
        );
        assert_eq!(cache.disk_usage(), DiskUsage { files: 1, bytes: 5 });
    }

    #[tokio::test]
    async fn test_same_content_different_paths_share_entry() {
        let (temp, calls, cache) = setup();
        let a = temp.path().join("a.txt");
        let b = temp.path().join("b.txt");
        std::fs::write(&a, b"same").unwrap();
        std::fs::write(&b, b"same").unwrap();

        let pa = cache.prepare(&a).await.unwrap();
        let pb = cache.prepare(&b).await.unwrap();
        assert_eq!(pa.cache_key, pb.cache_key);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_key_depends_on_params() {
        let temp = TempDir::new().unwrap();
        let small = PreprocessingCache::new(temp.path(), Arc::new(ImageStandardizer::new(512, 95)));
        let large = PreprocessingCache::new(temp.path(), Arc::new(ImageStandardizer::new(896, 95)));
        assert_ne!(small.cache_key(b"x"), large.cache_key(b"x"));
        assert_eq!(small.cache_key(b"x"), small.cache_key(b"x"));
    }

    #[tokio::test]
    async fn test_missing_source_is_io_error() {
        let (temp, _calls, cache) = setup();
        let err = cache.prepare(&temp.path().join("nope.txt")).await.unwrap_err();
        assert!(matches!(err, CacheError::Io(_)));
    }

    #[tokio::test]
    async fn test_lock_table_drained_after_use() {
        let (temp, _calls, cache) = setup();
        let src = temp.path().join("a.txt");
        std::fs::write(&src, b"drain").unwrap();
        cache.prepare(&src).await.unwrap();
        assert!(cache.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_lock_slot() {
        let (temp, calls, cache) = setup();
        let src = temp.path().join("a.txt");
        std::fs::write(&src, b"cancel").unwrap();
        let key = cache.cache_key(b"cancel");

        let holder = cache.lease_key(&key);
        let held = holder.lock.lock().await;

        // Waits behind the held key lock until the timeout drops it
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), cache.prepare(&src)).await;
        assert!(waited.is_err());
        assert_eq!(cache.locks.lock().unwrap().len(), 1);

        drop(held);
        drop(holder);
        assert!(cache.locks.lock().unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let prepared = cache.prepare(&src).await.unwrap();
        assert!(!prepared.cache_hit);
        assert!(cache.locks.lock().unwrap().is_empty());
    }
}
