//! Snapshot files wired into data sources sharing one solution context

use crate::error::CliError;
use convenient_uptodate::project_data::{properties, rules};
use convenient_uptodate::{
    ConfiguredInputDataSource, InMemoryStatePersistence, ProjectSnapshot, SolutionBuildContext,
    UpToDateCheckStatePersistence,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Read a snapshot file. Versions below 1 are raised to 1 so the pipeline accepts them.
pub async fn read_snapshot(path: &Path) -> Result<ProjectSnapshot, CliError> {
    let json = tokio::fs::read_to_string(path).await.map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut snapshot = ProjectSnapshot::from_json(&json).map_err(|source| CliError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    snapshot.version = snapshot.version.max(1);
    Ok(snapshot)
}

/// Name shown in the log: the project file's stem, else the snapshot file's.
pub fn project_name(snapshot: &ProjectSnapshot, snapshot_path: &Path) -> String {
    let project = snapshot
        .rule(rules::CONFIGURATION_GENERAL)
        .property(properties::PROJECT_FULL_PATH)
        .map(PathBuf::from);
    project
        .as_deref()
        .unwrap_or(snapshot_path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string())
}

/// One checked project and the referenced projects it sees.
pub struct Session {
    pub context: Arc<SolutionBuildContext>,
    pub project_name: String,
    pub data_source: Arc<ConfiguredInputDataSource>,
    references: Vec<ConfiguredInputDataSource>,
}

impl Session {
    /// Publish every reference, then every configuration of the checked project.
    pub async fn load(
        projects: &[PathBuf],
        references: &[PathBuf],
        persistence: Arc<dyn UpToDateCheckStatePersistence>,
        cancel: &CancellationToken,
    ) -> Result<Self, CliError> {
        let context = Arc::new(SolutionBuildContext::new());

        let mut published = Vec::with_capacity(references.len());
        for path in references {
            let snapshot = read_snapshot(path).await?;
            published.push(publish(&context, vec![snapshot], Arc::new(InMemoryStatePersistence::new()), cancel).await?);
        }

        let mut snapshots = Vec::with_capacity(projects.len());
        for path in projects {
            snapshots.push(read_snapshot(path).await?);
        }
        let project_name = match (snapshots.first(), projects.first()) {
            (Some(snapshot), Some(path)) => project_name(snapshot, path),
            _ => "project".to_string(),
        };
        let data_source = publish(&context, snapshots, persistence, cancel).await?;

        info!(
            "Loaded {} with {} configurations and {} references",
            project_name,
            projects.len(),
            published.len()
        );
        Ok(Self {
            context,
            project_name,
            data_source: Arc::new(data_source),
            references: published,
        })
    }

    /// Stop every pipeline.
    pub async fn close(self) {
        for mut reference in self.references {
            reference.close().await;
        }
        if let Ok(mut data_source) = Arc::try_unwrap(self.data_source) {
            data_source.close().await;
        }
    }
}

/// Feed one project's configuration snapshots through a new data source and
/// wait until all of them are applied.
pub async fn publish(
    context: &SolutionBuildContext,
    snapshots: Vec<ProjectSnapshot>,
    persistence: Arc<dyn UpToDateCheckStatePersistence>,
    cancel: &CancellationToken,
) -> Result<ConfiguredInputDataSource, CliError> {
    let mut seen = HashSet::new();
    for snapshot in &snapshots {
        if !seen.insert(snapshot.configuration.clone()) {
            return Err(CliError::DuplicateConfiguration(snapshot.configuration.to_string()));
        }
    }

    let configurations = snapshots.iter().map(|s| s.configuration.clone()).collect();
    let data_source = ConfiguredInputDataSource::new(configurations, persistence, context.copy_items());
    for snapshot in snapshots {
        debug!("Posting snapshot version {} for {}", snapshot.version, snapshot.configuration);
        data_source.post(snapshot).await?;
    }
    let _ = data_source.wait_for_initial(cancel).await?;
    Ok(data_source)
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = r#"{
        "version": 0,
        "configuration": { "Configuration": "Debug" },
        "rules": {
            "ConfigurationGeneral": {
                "properties": { "MSBuildProjectFullPath": "/repo/App/App.csproj" },
                "items": {}
            }
        }
    }"#;

    #[tokio::test]
    async fn test_read_snapshot_raises_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        std::fs::write(&path, APP).unwrap();

        let snapshot = read_snapshot(&path).await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(project_name(&snapshot, &path), "App");
    }

    #[tokio::test]
    async fn test_read_snapshot_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = read_snapshot(&path).await.unwrap_err();
        assert!(matches!(err, CliError::Parse { .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[tokio::test]
    async fn test_duplicate_configuration_rejected() {
        let snapshot = ProjectSnapshot::from_json(APP).unwrap();
        let result = publish(
            &SolutionBuildContext::new(),
            vec![snapshot.clone(), snapshot],
            Arc::new(InMemoryStatePersistence::new()),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CliError::DuplicateConfiguration(_))));
    }
}
