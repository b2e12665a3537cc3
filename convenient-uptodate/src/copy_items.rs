//! Cross-project copy item registry
//!
//! Every project publishes the items it copies to its output directory and
//! the target paths of the projects it references. A referencing project's
//! build copies all of those items transitively, so accelerating it is only
//! safe when every reachable project has published.

use crate::items::{CopyItem, ProjectCopyData};
use crate::names::PathKey;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Copy items gathered for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyItemsResult {
    /// De-duplicated items from every reachable referenced project
    pub items: Vec<CopyItem>,
    /// Whether every reachable project had published its data
    pub is_complete: bool,
    /// Target paths with no published data
    pub incomplete_projects: Vec<PathBuf>,
}

/// Solution-wide registry of project copy data, keyed by target path.
#[derive(Debug, Default)]
pub struct CopyItemAggregator {
    projects: Mutex<HashMap<PathKey, ProjectCopyData>>,
}

impl CopyItemAggregator {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathKey, ProjectCopyData>> {
        self.projects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish or replace a project's copy data. Empty data is ignored.
    pub fn set_project_data(&self, data: ProjectCopyData) {
        if data.is_empty() {
            return;
        }
        debug!(
            "Registering {} copy items for {}",
            data.copy_items.len(),
            data.target_path.display()
        );
        let _ = self.lock().insert(PathKey::new(&data.target_path), data);
    }

    /// Number of projects that have published.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no project has published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget everything.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Gather the copy items of every project reachable from the project
    /// whose primary output is `target_path`, excluding its own items.
    ///
    /// Traversal is breadth-first; the first item seen for a relative target
    /// path wins.
    #[must_use]
    pub fn try_gather_copy_items_for_project(&self, target_path: &Path) -> CopyItemsResult {
        let projects = self.lock();

        let mut result = CopyItemsResult {
            is_complete: true,
            ..CopyItemsResult::default()
        };
        let mut explored: HashSet<PathKey> = HashSet::new();
        let mut seen_targets: HashSet<PathKey> = HashSet::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::new();

        let start = PathKey::new(target_path);
        let _ = explored.insert(start.clone());
        match projects.get(&start) {
            Some(data) => queue.extend(data.referenced_target_paths.iter().cloned()),
            None => {
                result.is_complete = false;
                result.incomplete_projects.push(target_path.to_path_buf());
                return result;
            }
        }

        while let Some(reference) = queue.pop_front() {
            let key = PathKey::new(&reference);
            if !explored.insert(key.clone()) {
                continue;
            }

            let Some(data) = projects.get(&key) else {
                result.is_complete = false;
                result.incomplete_projects.push(reference);
                continue;
            };

            for item in &data.copy_items {
                if seen_targets.insert(PathKey::new(&item.relative_target_path)) {
                    result.items.push(item.clone());
                }
            }
            queue.extend(data.referenced_target_paths.iter().cloned());
        }

        if !result.is_complete {
            debug!(
                "Copy data for {} is incomplete; missing {:?}",
                target_path.display(),
                result.incomplete_projects
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::CopyType;

    fn item(source: &str, target: &str) -> CopyItem {
        CopyItem {
            source_path: PathBuf::from(source),
            relative_target_path: PathBuf::from(target),
            copy_type: CopyType::PreserveNewest,
        }
    }

    fn project(target: &str, items: Vec<CopyItem>, references: &[&str]) -> ProjectCopyData {
        ProjectCopyData {
            project_full_path: PathBuf::from(target).with_extension("csproj"),
            target_path: PathBuf::from(target),
            copy_items: items,
            referenced_target_paths: references.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn test_gathers_transitively_and_deduplicates() {
        let aggregator = CopyItemAggregator::new();
        aggregator.set_project_data(project("/s/App/App.dll", vec![item("/s/App/own.txt", "own.txt")], &["/s/B/B.dll"]));
        aggregator.set_project_data(project(
            "/s/B/B.dll",
            vec![item("/s/B/config.json", "config.json")],
            &["/s/C/C.dll"],
        ));
        aggregator.set_project_data(project(
            "/s/C/C.dll",
            vec![item("/s/C/config.json", "config.json"), item("/s/C/data.bin", "data.bin")],
            &[],
        ));

        let result = aggregator.try_gather_copy_items_for_project(Path::new("/s/App/App.dll"));
        assert!(result.is_complete);
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.items[0].source_path, PathBuf::from("/s/B/config.json"));
        assert!(result.items.iter().all(|i| i.relative_target_path != Path::new("own.txt")));
    }

    #[test]
    fn test_missing_reference_is_incomplete() {
        let aggregator = CopyItemAggregator::new();
        aggregator.set_project_data(project("/s/App/App.dll", vec![], &["/s/B/B.dll"]));

        let result = aggregator.try_gather_copy_items_for_project(Path::new("/s/App/App.dll"));
        assert!(!result.is_complete);
        assert_eq!(result.incomplete_projects, vec![PathBuf::from("/s/B/B.dll")]);
    }

    #[test]
    fn test_unpublished_start_is_incomplete() {
        let aggregator = CopyItemAggregator::new();
        let result = aggregator.try_gather_copy_items_for_project(Path::new("/s/App/App.dll"));
        assert!(!result.is_complete);
    }

    #[test]
    fn test_cycles_terminate() {
        let aggregator = CopyItemAggregator::new();
        aggregator.set_project_data(project("/s/A/A.dll", vec![item("/s/A/a.txt", "a.txt")], &["/s/B/B.dll"]));
        aggregator.set_project_data(project("/s/B/B.dll", vec![item("/s/B/b.txt", "b.txt")], &["/s/A/A.dll"]));

        let result = aggregator.try_gather_copy_items_for_project(Path::new("/s/A/A.dll"));
        assert!(result.is_complete);
        assert_eq!(result.items.len(), 1);
    }

    #[test]
    fn test_reset_and_empty_data() {
        let aggregator = CopyItemAggregator::new();
        aggregator.set_project_data(ProjectCopyData::default());
        assert!(aggregator.is_empty());

        aggregator.set_project_data(project("/s/A/A.dll", vec![], &[]));
        assert_eq!(aggregator.len(), 1);
        aggregator.reset();
        assert!(aggregator.is_empty());
    }
}
