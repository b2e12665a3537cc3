//! Services shared by every project in a host session

use crate::copy_items::CopyItemAggregator;
use crate::timestamps::{ConcurrentTimestampCache, FileTimestamps, TimestampCache};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Solution-scoped state: the copy item registry, and the shared timestamp
/// cache while a solution build is running.
#[derive(Debug, Default)]
pub struct SolutionBuildContext {
    copy_items: Arc<CopyItemAggregator>,
    timestamps: Mutex<Option<Arc<ConcurrentTimestampCache>>>,
}

impl SolutionBuildContext {
    /// Create a context with no build in progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn timestamps(&self) -> MutexGuard<'_, Option<Arc<ConcurrentTimestampCache>>> {
        self.timestamps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registry of every project's copy data.
    #[must_use]
    pub fn copy_items(&self) -> Arc<CopyItemAggregator> {
        Arc::clone(&self.copy_items)
    }

    /// Start sharing timestamps between projects.
    pub fn on_solution_build_started(&self) {
        info!("Solution build started");
        *self.timestamps() = Some(Arc::new(ConcurrentTimestampCache::new()));
    }

    /// Stop sharing timestamps.
    pub fn on_solution_build_completed(&self) {
        if let Some(cache) = self.timestamps().take() {
            info!("Solution build completed, {} timestamps cached", cache.len());
        }
    }

    /// Drop everything tied to the open solution.
    pub fn on_solution_closed(&self) {
        let _ = self.timestamps().take();
        self.copy_items.reset();
    }

    /// Whether a solution build is in progress.
    #[must_use]
    pub fn is_solution_build_active(&self) -> bool {
        self.timestamps().is_some()
    }

    /// Timestamp source for one check: the shared cache during a solution
    /// build, otherwise a fresh cache owned by the check.
    #[must_use]
    pub fn timestamps_for_check(&self) -> Box<dyn FileTimestamps> {
        match self.timestamps().as_ref() {
            Some(shared) => Box::new(Arc::clone(shared)),
            None => Box::new(TimestampCache::new()),
        }
    }

    /// Forget shared timestamps for files a project build may have written.
    pub fn invalidate_timestamps(&self, paths: &[&Path]) {
        if let Some(shared) = self.timestamps().as_ref() {
            debug!("Invalidating {} shared timestamps", paths.len());
            shared.invalidate(paths);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    #[test]
    fn test_shared_cache_only_during_build() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.cs");
        std::fs::write(&file, "").unwrap();
        filetime::set_file_mtime(&file, FileTime::from_unix_time(1_000, 0)).unwrap();

        let context = SolutionBuildContext::new();
        assert!(!context.is_solution_build_active());

        context.on_solution_build_started();
        let mut first = context.timestamps_for_check();
        let _ = first.get_timestamp_utc(&file);
        let second = context.timestamps_for_check();
        assert_eq!(second.len(), 1);

        context.on_solution_build_completed();
        let fresh = context.timestamps_for_check();
        assert!(fresh.is_empty());
    }

    #[test]
    fn test_invalidate_rereads_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("App.dll");
        std::fs::write(&file, "").unwrap();
        filetime::set_file_mtime(&file, FileTime::from_unix_time(1_000, 0)).unwrap();

        let context = SolutionBuildContext::new();
        context.on_solution_build_started();
        let mut cache = context.timestamps_for_check();
        let before = cache.get_timestamp_utc(&file).unwrap();

        filetime::set_file_mtime(&file, FileTime::from_unix_time(2_000, 0)).unwrap();
        assert_eq!(cache.get_timestamp_utc(&file), Some(before));

        context.invalidate_timestamps(&[file.as_path()]);
        assert_eq!(cache.get_timestamp_utc(&file).unwrap().timestamp(), 2_000);
    }

    #[test]
    fn test_closing_resets_copy_items() {
        let context = SolutionBuildContext::new();
        context.copy_items().set_project_data(crate::items::ProjectCopyData {
            target_path: "/s/A/A.dll".into(),
            ..Default::default()
        });
        assert_eq!(context.copy_items().len(), 1);
        context.on_solution_closed();
        assert!(context.copy_items().is_empty());
    }
}
