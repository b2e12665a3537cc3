// Shared fixtures for the integration tests
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use convenient_uptodate::{
    BuildAction, BuildUpToDateCheck, ConfiguredInputDataSource, FailureReason, InMemoryStatePersistence,
    LogLevel, ProjectConfiguration, ProjectSnapshot, RecordingTelemetry, RuleSnapshot, SolutionBuildContext,
    UpToDateCheckOptions, UpToDateCheckStatePersistence,
};
use filetime::FileTime;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Base time for file stamps: well in the past, so checks never see future inputs.
pub const T0: i64 = 1_700_000_000;

pub fn touch(path: &Path, unix_seconds: i64) {
    touch_with(path, "", unix_seconds);
}

pub fn touch_with(path: &Path, contents: &str, unix_seconds: i64) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
    set_time(path, unix_seconds);
}

pub fn set_time(path: &Path, unix_seconds: i64) {
    filetime::set_file_mtime(path, FileTime::from_unix_time(unix_seconds, 0)).unwrap();
}

pub fn set_time_at(path: &Path, time: DateTime<Utc>) {
    let stamp = FileTime::from_unix_time(time.timestamp(), time.timestamp_subsec_nanos());
    filetime::set_file_mtime(path, stamp).unwrap();
}

pub fn debug_configuration() -> ProjectConfiguration {
    ProjectConfiguration::new([("Configuration", "Debug")])
}

fn path_string(path: &Path) -> String {
    path.display().to_string()
}

/// Snapshot of a project `name` in `project_dir`, building `bin/<name>.dll`.
pub fn project_snapshot(project_dir: &Path, name: &str, version: u64) -> ProjectSnapshot {
    let mut snapshot = ProjectSnapshot {
        version,
        configuration: debug_configuration(),
        ..ProjectSnapshot::default()
    };

    let mut general = RuleSnapshot::default();
    let _ = general.properties.insert(
        "MSBuildProjectFullPath".into(),
        path_string(&project_dir.join(format!("{name}.csproj"))),
    );
    let _ = general.properties.insert("OutDir".into(), "bin/".into());
    let _ = general.properties.insert(
        "TargetPath".into(),
        path_string(&project_dir.join("bin").join(format!("{name}.dll"))),
    );
    let _ = snapshot.rules.insert("ConfigurationGeneral".into(), general);

    for item_type in ["Compile", "Content", "None"] {
        let _ = snapshot.up_to_date_check_item_types.insert(item_type.into());
        let _ = snapshot.catalog.insert(item_type.into(), item_type.into());
        let _ = snapshot.rules.insert(item_type.into(), RuleSnapshot::default());
    }

    add_item(&mut snapshot, "UpToDateCheckBuilt", &format!("bin/{name}.dll"), &[]);
    snapshot
}

pub fn add_item(snapshot: &mut ProjectSnapshot, rule: &str, spec: &str, metadata: &[(&str, &str)]) {
    let metadata = metadata
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    let _ = snapshot
        .rules
        .entry(rule.to_string())
        .or_default()
        .items
        .insert(spec.to_string(), metadata);
}

pub fn set_property(snapshot: &mut ProjectSnapshot, name: &str, value: &str) {
    let _ = snapshot
        .rules
        .entry("ConfigurationGeneral".to_string())
        .or_default()
        .properties
        .insert(name.to_string(), value.to_string());
}

/// On-disk project with `Program.cs` older than its output.
pub struct ProjectFiles {
    pub dir: PathBuf,
    pub name: String,
}

impl ProjectFiles {
    pub fn create(root: &Path, name: &str) -> Self {
        let dir = root.join(name);
        touch(&dir.join(format!("{name}.csproj")), T0);
        touch(&dir.join("Program.cs"), T0 + 10);
        touch(&dir.join("bin").join(format!("{name}.dll")), T0 + 20);
        Self {
            dir,
            name: name.to_string(),
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.join(relative)
    }

    pub fn output(&self) -> PathBuf {
        self.dir.join("bin").join(format!("{}.dll", self.name))
    }

    pub fn snapshot(&self, version: u64) -> ProjectSnapshot {
        let mut snapshot = project_snapshot(&self.dir, &self.name, version);
        add_item(&mut snapshot, "Compile", "Program.cs", &[]);
        snapshot
    }
}

/// One project wired to a checker, recording telemetry.
pub struct Harness {
    pub solution: Arc<SolutionBuildContext>,
    pub data_source: Arc<ConfiguredInputDataSource>,
    pub check: BuildUpToDateCheck,
    pub telemetry: Arc<RecordingTelemetry>,
}

impl Harness {
    pub async fn start(snapshot: ProjectSnapshot) -> Self {
        Self::start_with(
            snapshot,
            Arc::new(InMemoryStatePersistence::new()),
            Arc::new(SolutionBuildContext::new()),
        )
        .await
    }

    pub async fn start_with(
        snapshot: ProjectSnapshot,
        persistence: Arc<dyn UpToDateCheckStatePersistence>,
        solution: Arc<SolutionBuildContext>,
    ) -> Self {
        let data_source = Arc::new(ConfiguredInputDataSource::new(
            vec![snapshot.configuration.clone()],
            persistence,
            solution.copy_items(),
        ));
        let version = snapshot.version;
        data_source.post(snapshot).await.unwrap();
        let _ = data_source
            .wait_for_version(version, &CancellationToken::new())
            .await
            .unwrap();

        let telemetry = Arc::new(RecordingTelemetry::new());
        let options = UpToDateCheckOptions {
            log_level: LogLevel::Verbose,
            ..UpToDateCheckOptions::default()
        };
        let check = BuildUpToDateCheck::new(
            "App",
            options,
            data_source.clone(),
            solution.clone(),
            telemetry.clone(),
        );

        Self {
            solution,
            data_source,
            check,
            telemetry,
        }
    }

    /// Post a newer snapshot and wait until it is applied.
    pub async fn post(&self, snapshot: ProjectSnapshot) {
        let version = snapshot.version;
        self.data_source.post(snapshot).await.unwrap();
        let _ = self
            .data_source
            .wait_for_version(version, &CancellationToken::new())
            .await
            .unwrap();
    }

    /// Run a check; `None` means up to date.
    pub async fn check(&self) -> Option<FailureReason> {
        self.check_with(&HashMap::new()).await
    }

    pub async fn check_with(&self, global_properties: &HashMap<String, String>) -> Option<FailureReason> {
        let mut log = Vec::new();
        let up_to_date = self
            .check
            .is_up_to_date(BuildAction::Build, &mut log, global_properties, &CancellationToken::new())
            .await
            .unwrap();
        let reason = self.telemetry.events().last().and_then(|event| event.fail_reason);
        assert_eq!(
            up_to_date,
            reason.is_none(),
            "result and telemetry disagree; log:\n{}",
            String::from_utf8_lossy(&log)
        );
        reason
    }

    /// Run the first check, which always fails with `FirstRun` in a fresh session.
    pub async fn first_run(&self) {
        assert_eq!(self.check().await, Some(FailureReason::FirstRun));
    }
}
