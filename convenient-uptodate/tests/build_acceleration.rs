// Copy acceleration across a project reference

mod common;

use common::*;
use convenient_uptodate::{
    AccelerationResult, ConfiguredInputDataSource, FailureReason, InMemoryStatePersistence, ProjectSnapshot,
    SolutionBuildContext,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// App referencing Lib, which copies two content files to its output.
struct Solution {
    _temp: TempDir,
    app: ProjectFiles,
    lib: ProjectFiles,
}

impl Solution {
    fn create() -> Self {
        let temp = TempDir::new().unwrap();
        let app = ProjectFiles::create(temp.path(), "App");
        let lib = ProjectFiles::create(temp.path(), "Lib");

        touch_with(&lib.path("config.json"), "{\"level\":2}", T0 + 10);
        touch_with(&lib.path("data.json"), "[]", T0 + 10);
        touch_with(&app.path("bin/config.json"), "{}", T0 + 5);
        touch_with(&app.path("bin/data.json"), "[]", T0 + 10);

        Self { _temp: temp, app, lib }
    }

    fn lib_snapshot(&self) -> ProjectSnapshot {
        let mut snapshot = self.lib.snapshot(1);
        for file in ["config.json", "data.json"] {
            add_item(&mut snapshot, "Content", file, &[("CopyToOutputDirectory", "PreserveNewest")]);
        }
        snapshot
    }

    fn app_snapshot(&self) -> ProjectSnapshot {
        let mut snapshot = self.app.snapshot(1);
        set_property(&mut snapshot, "AccelerateBuildsInVisualStudio", "true");
        let lib_output = self.lib.output().display().to_string();
        add_item(
            &mut snapshot,
            "ResolvedCompilationReference",
            &lib_output,
            &[("ReferenceSourceTarget", "ProjectReference"), ("OriginalPath", &lib_output)],
        );
        snapshot
    }
}

async fn publish(solution: &SolutionBuildContext, snapshot: ProjectSnapshot) -> ConfiguredInputDataSource {
    let data_source = ConfiguredInputDataSource::new(
        vec![snapshot.configuration.clone()],
        Arc::new(InMemoryStatePersistence::new()),
        solution.copy_items(),
    );
    let version = snapshot.version;
    data_source.post(snapshot).await.unwrap();
    let _ = data_source
        .wait_for_version(version, &CancellationToken::new())
        .await
        .unwrap();
    data_source
}

#[tokio::test]
async fn test_referenced_copies_are_accelerated() {
    let files = Solution::create();
    let context = Arc::new(SolutionBuildContext::new());
    let _lib = publish(&context, files.lib_snapshot()).await;
    let harness = Harness::start_with(
        files.app_snapshot(),
        Arc::new(InMemoryStatePersistence::new()),
        Arc::clone(&context),
    )
    .await;

    harness.first_run().await;

    assert_eq!(harness.check().await, None);
    let event = harness.telemetry.events().last().cloned().unwrap();
    assert_eq!(event.acceleration_result, AccelerationResult::EnabledAccelerated);
    assert_eq!(event.copy_count, 1);
    assert_eq!(
        std::fs::read_to_string(files.app.path("bin/config.json")).unwrap(),
        "{\"level\":2}"
    );

    assert_eq!(harness.check().await, None);
    let event = harness.telemetry.events().last().cloned().unwrap();
    assert_eq!(event.acceleration_result, AccelerationResult::EnabledNotAccelerated);
    assert_eq!(event.copy_count, 0);
}

#[tokio::test]
async fn test_incomplete_copy_data_disables_acceleration() {
    let files = Solution::create();
    touch(&files.app.path("assets/logo.png"), T0 + 12);
    touch(&files.app.path("bin/assets/logo.png"), T0 + 2);
    let mut snapshot = files.app_snapshot();
    add_item(
        &mut snapshot,
        "Content",
        "assets/logo.png",
        &[("CopyToOutputDirectory", "PreserveNewest")],
    );

    // Lib never publishes its copy data.
    let harness = Harness::start(snapshot).await;
    harness.first_run().await;

    assert_eq!(harness.check().await, Some(FailureReason::CopyToOutputDirectorySourceNewer));
    let event = harness.telemetry.events().last().cloned().unwrap();
    assert_eq!(event.acceleration_result, AccelerationResult::DisabledCandidate);
    assert_eq!(event.copy_count, 0);
}

#[tokio::test]
async fn test_copy_always_items_are_copied_when_accelerated() {
    let files = Solution::create();
    touch_with(&files.app.path("appsettings.json"), "{\"a\":1}", T0 + 8);
    let mut snapshot = files.app_snapshot();
    add_item(
        &mut snapshot,
        "Content",
        "appsettings.json",
        &[("CopyToOutputDirectory", "Always")],
    );

    let context = Arc::new(SolutionBuildContext::new());
    let _lib = publish(&context, files.lib_snapshot()).await;
    let harness = Harness::start_with(snapshot, Arc::new(InMemoryStatePersistence::new()), context).await;
    harness.first_run().await;

    assert_eq!(harness.check().await, None);
    assert!(files.app.path("bin/appsettings.json").exists());
    // config.json from Lib plus appsettings.json
    assert_eq!(harness.telemetry.events().last().unwrap().copy_count, 2);
}

#[tokio::test]
async fn test_acceleration_needs_a_target_path() {
    let files = Solution::create();
    touch(&files.app.path("assets/logo.png"), T0 + 12);
    touch(&files.app.path("bin/assets/logo.png"), T0 + 2);
    let mut snapshot = files.app_snapshot();
    add_item(
        &mut snapshot,
        "Content",
        "assets/logo.png",
        &[("CopyToOutputDirectory", "PreserveNewest")],
    );
    let _ = snapshot
        .rules
        .get_mut("ConfigurationGeneral")
        .unwrap()
        .properties
        .remove("TargetPath");

    // Lib's copy data is complete, so only the missing target path disables acceleration.
    let context = Arc::new(SolutionBuildContext::new());
    let _lib = publish(&context, files.lib_snapshot()).await;
    let harness = Harness::start_with(snapshot, Arc::new(InMemoryStatePersistence::new()), context).await;
    harness.first_run().await;

    assert_eq!(harness.check().await, Some(FailureReason::CopyToOutputDirectorySourceNewer));
    let event = harness.telemetry.events().last().cloned().unwrap();
    assert_eq!(event.acceleration_result, AccelerationResult::DisabledCandidate);
    assert_eq!(event.copy_count, 0);
    assert_eq!(std::fs::read_to_string(files.app.path("bin/config.json")).unwrap(), "{}");
}
