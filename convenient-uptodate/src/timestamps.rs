//! File last-write time caches
//!
//! A single check asks for the same timestamp many times (an output that is
//! also a copy destination, shared references across configurations), and a
//! solution build asks again for every project. Both caches memoize the
//! filesystem answer, including "not found".

use crate::names::PathKey;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Source of file timestamps consumed by the decision engine.
pub trait FileTimestamps: Send {
    /// Last-write time of `path` in UTC, or `None` when the file does not exist.
    fn get_timestamp_utc(&mut self, path: &Path) -> Option<DateTime<Utc>>;

    /// Forget cached values for `paths` so the next lookup hits the filesystem.
    fn clear_timestamps(&mut self, paths: &[&Path]);

    /// Number of distinct paths looked up so far.
    fn len(&self) -> usize;

    /// Whether nothing has been looked up yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read the last-write time of a regular file straight from the filesystem.
#[must_use]
pub fn read_timestamp_utc(path: &Path) -> Option<DateTime<Utc>> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => match metadata.modified() {
            Ok(modified) => Some(DateTime::<Utc>::from(modified)),
            Err(e) => {
                debug!("No modification time for {}: {}", path.display(), e);
                None
            }
        },
        Ok(_) => None,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Cannot stat {}: {}", path.display(), e);
            }
            None
        }
    }
}

/// Check-scoped timestamp cache. Not shared, so no locking.
#[derive(Debug, Default)]
pub struct TimestampCache {
    timestamps: HashMap<PathKey, Option<DateTime<Utc>>>,
}

impl TimestampCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileTimestamps for TimestampCache {
    fn get_timestamp_utc(&mut self, path: &Path) -> Option<DateTime<Utc>> {
        *self
            .timestamps
            .entry(PathKey::new(path))
            .or_insert_with(|| read_timestamp_utc(path))
    }

    fn clear_timestamps(&mut self, paths: &[&Path]) {
        for path in paths {
            let _ = self.timestamps.remove(&PathKey::new(path));
        }
    }

    fn len(&self) -> usize {
        self.timestamps.len()
    }
}

/// Solution-build scoped timestamp cache shared between projects.
///
/// The lock only guards the map. Filesystem calls happen outside it, so two
/// threads missing on the same path may both stat the file; they store the
/// same answer.
#[derive(Debug, Default)]
pub struct ConcurrentTimestampCache {
    timestamps: Mutex<HashMap<PathKey, Option<DateTime<Utc>>>>,
}

impl ConcurrentTimestampCache {
    /// Create an empty shared cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached or freshly read timestamp for `path`.
    pub fn timestamp_utc(&self, path: &Path) -> Option<DateTime<Utc>> {
        let key = PathKey::new(path);

        if let Some(cached) = self.lock().get(&key) {
            return *cached;
        }

        let timestamp = read_timestamp_utc(path);
        let _ = self.lock().insert(key, timestamp);
        timestamp
    }

    /// Invalidate `paths`, typically the outputs of a project that just built.
    pub fn invalidate(&self, paths: &[&Path]) {
        let mut timestamps = self.lock();
        for path in paths {
            let _ = timestamps.remove(&PathKey::new(path));
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathKey, Option<DateTime<Utc>>>> {
        // A panic while holding the lock leaves the map consistent; keep using it.
        self.timestamps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl FileTimestamps for Arc<ConcurrentTimestampCache> {
    fn get_timestamp_utc(&mut self, path: &Path) -> Option<DateTime<Utc>> {
        ConcurrentTimestampCache::timestamp_utc(self, path)
    }

    fn clear_timestamps(&mut self, paths: &[&Path]) {
        ConcurrentTimestampCache::invalidate(self, paths);
    }

    fn len(&self) -> usize {
        ConcurrentTimestampCache::len(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    fn touch(path: &Path, unix_seconds: i64) {
        std::fs::write(path, b"x").unwrap();
        filetime::set_file_mtime(path, FileTime::from_unix_time(unix_seconds, 0)).unwrap();
    }

    #[test]
    fn test_missing_file_is_none() {
        let temp = TempDir::new().unwrap();
        let mut cache = TimestampCache::new();
        assert_eq!(cache.get_timestamp_utc(&temp.path().join("nope.cs")), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_directories_are_not_files() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read_timestamp_utc(temp.path()), None);
    }

    #[test]
    fn test_cache_memoizes_until_cleared() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.cs");
        touch(&file, 1_000);

        let mut cache = TimestampCache::new();
        let first = cache.get_timestamp_utc(&file).unwrap();
        assert_eq!(first.timestamp(), 1_000);

        filetime::set_file_mtime(&file, FileTime::from_unix_time(2_000, 0)).unwrap();
        assert_eq!(cache.get_timestamp_utc(&file).unwrap().timestamp(), 1_000);

        cache.clear_timestamps(&[file.as_path()]);
        assert_eq!(cache.get_timestamp_utc(&file).unwrap().timestamp(), 2_000);
    }

    #[test]
    fn test_concurrent_cache_shared_between_threads() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("shared.dll");
        touch(&file, 5_000);

        let cache = Arc::new(ConcurrentTimestampCache::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let file = file.clone();
                std::thread::spawn(move || cache.timestamp_utc(&file))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap().timestamp(), 5_000);
        }
        assert_eq!(cache.len(), 1);

        cache.invalidate(&[file.as_path()]);
        assert!(cache.is_empty());
    }
}
