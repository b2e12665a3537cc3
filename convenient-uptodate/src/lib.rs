//! Fast up-to-date check for project builds
//!
//! Decides, before a build is started, whether a project's outputs already
//! reflect its inputs so the build can be skipped. The decision is made from
//! file timestamps and a snapshot of the project's evaluated items, without
//! invoking the build engine.
//!
//! # Features
//!
//! - Incremental per-configuration state derived from project snapshots
//! - Staged decision engine with structured failure reasons
//! - Build acceleration: copy-only work is done directly instead of building
//! - Cross-project copy item registry for transitive copy data
//! - Item state persisted across sessions
//!
//! # Example
//!
//! ```no_run
//! use convenient_uptodate::{
//!     BuildAction, BuildUpToDateCheck, ConfiguredInputDataSource, InMemoryStatePersistence,
//!     ProjectSnapshot, SolutionBuildContext, TracingTelemetry, UpToDateCheckOptions,
//! };
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let snapshot = ProjectSnapshot::from_json(&std::fs::read_to_string("App.json")?)?;
//!     let solution = Arc::new(SolutionBuildContext::new());
//!
//!     let data_source = Arc::new(ConfiguredInputDataSource::new(
//!         vec![snapshot.configuration.clone()],
//!         Arc::new(InMemoryStatePersistence::new()),
//!         solution.copy_items(),
//!     ));
//!     data_source.post(snapshot).await?;
//!
//!     let check = BuildUpToDateCheck::new(
//!         "App",
//!         UpToDateCheckOptions::default(),
//!         data_source,
//!         solution,
//!         Arc::new(TracingTelemetry),
//!     );
//!
//!     let mut log = std::io::stdout();
//!     let up_to_date = check
//!         .is_up_to_date(BuildAction::Build, &mut log, &HashMap::new(), &CancellationToken::new())
//!         .await?;
//!     println!("up to date: {up_to_date}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod check_log;
pub mod checker;
pub mod config;
pub mod copy_items;
pub mod data_source;
pub mod error;
pub mod failure;
pub mod file_system_operations;
pub mod input_state;
pub mod items;
pub mod names;
pub mod persistence;
pub mod project_data;
pub mod solution;
pub mod telemetry;
pub mod timestamps;

pub use check_log::{CheckLog, LogLevel};
pub use checker::{BuildAction, BuildUpToDateCheck, CriticalTaskGuard, ValidationResult};
pub use config::UpToDateCheckOptions;
pub use copy_items::{CopyItemAggregator, CopyItemsResult};
pub use data_source::{ConfiguredInputDataSource, ConfiguredInputPipeline};
pub use error::{CheckError, CheckResult};
pub use failure::{CheckFailure, FailureReason};
pub use file_system_operations::{AccelerationResult, FileSystemOperationAggregator};
pub use input_state::{ImplicitConfiguredInput, RestoredState, UpToDateCheckConfiguredInput};
pub use items::{CopyItem, CopyType, InputItem, ProjectCopyData};
pub use names::{IgnoreKinds, KindName, SetName};
pub use persistence::{InMemoryStatePersistence, JsonStatePersistence, UpToDateCheckStatePersistence};
pub use project_data::{ProjectConfiguration, ProjectSnapshot, ProjectUpdate, RuleSnapshot};
pub use solution::SolutionBuildContext;
pub use telemetry::{CheckTelemetryEvent, RecordingTelemetry, TelemetryService, TracingTelemetry};
pub use timestamps::{ConcurrentTimestampCache, FileTimestamps, TimestampCache};
