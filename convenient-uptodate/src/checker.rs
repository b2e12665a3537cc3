//! Up-to-date decision engine
//!
//! A check walks each implicitly active configuration through a fixed
//! sequence of stages:
//!
//! 1. global conditions
//! 2. inputs against outputs, default set first, then named sets in order
//! 3. copy markers of referenced projects
//! 4. copy-to-output-directory items
//! 5. copied output files
//!
//! The first failing stage decides the outcome. Once every configuration
//! passes, copies recorded for build acceleration are applied.

use crate::check_log::{format_time, CheckLog, LogLevel};
use crate::config::UpToDateCheckOptions;
use crate::copy_items::CopyItemAggregator;
use crate::data_source::ConfiguredInputDataSource;
use crate::error::{CheckError, CheckResult};
use crate::failure::{CheckFailure, FailureReason};
use crate::file_system_operations::{AccelerationResult, ConfiguredFileSystemOperations, FileSystemOperationAggregator};
use crate::input_state::{ImplicitConfiguredInput, UpToDateCheckConfiguredInput};
use crate::items::{is_non_compilation_item_type, resolve_path, CopyItem, CopyType};
use crate::names::{IgnoreKinds, PathKey, SetName};
use crate::project_data::ProjectConfiguration;
use crate::solution::SolutionBuildContext;
use crate::telemetry::{CheckTelemetryEvent, TelemetryService};
use crate::timestamps::FileTimestamps;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Kind of build the host is about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildAction {
    /// Incremental build
    Build,
    /// Clean then build
    Rebuild,
    /// Delete outputs
    Clean,
}

impl FromStr for BuildAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "build" => Ok(Self::Build),
            "rebuild" => Ok(Self::Rebuild),
            "clean" => Ok(Self::Clean),
            other => Err(format!("Unknown build action '{other}'")),
        }
    }
}

impl fmt::Display for BuildAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Rebuild => write!(f, "rebuild"),
            Self::Clean => write!(f, "clean"),
        }
    }
}

/// Outcome of [`BuildUpToDateCheck::validate_up_to_date`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the project would be considered up to date
    pub is_up_to_date: bool,
    /// Why not, when it is not
    pub failure: Option<CheckFailure>,
}

/// Marks a build-critical operation in progress. Checks fail with
/// [`FailureReason::CriticalTasks`] while any guard is alive.
#[derive(Debug)]
pub struct CriticalTaskGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for CriticalTaskGuard {
    fn drop(&mut self) {
        let _ = self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct SessionState {
    // Start time of the most recent non-validation check, per configuration
    last_checked_at: HashMap<ProjectConfiguration, DateTime<Utc>>,
    last_global_properties: HashMap<String, String>,
    last_checked_files: Vec<PathBuf>,
    build_started_at: Option<DateTime<Utc>>,
}

/// Fast up-to-date check for one project.
pub struct BuildUpToDateCheck {
    project_name: String,
    options: UpToDateCheckOptions,
    data_source: Arc<ConfiguredInputDataSource>,
    solution: Arc<SolutionBuildContext>,
    telemetry: Arc<dyn TelemetryService>,
    semaphore: Semaphore,
    critical_tasks: Arc<AtomicUsize>,
    check_number: AtomicU64,
    session: Mutex<SessionState>,
}

impl BuildUpToDateCheck {
    /// Create a checker reading state from `data_source`.
    pub fn new(
        project_name: impl Into<String>,
        options: UpToDateCheckOptions,
        data_source: Arc<ConfiguredInputDataSource>,
        solution: Arc<SolutionBuildContext>,
        telemetry: Arc<dyn TelemetryService>,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            options,
            data_source,
            solution,
            telemetry,
            semaphore: Semaphore::new(1),
            critical_tasks: Arc::new(AtomicUsize::new(0)),
            check_number: AtomicU64::new(0),
            session: Mutex::new(SessionState::default()),
        }
    }

    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the host option enables the check.
    #[must_use]
    pub fn is_up_to_date_check_enabled(&self) -> bool {
        self.options.enabled
    }

    /// Mark a build-critical operation as running until the guard is dropped.
    pub fn begin_critical_task(&self) -> CriticalTaskGuard {
        let _ = self.critical_tasks.fetch_add(1, Ordering::SeqCst);
        CriticalTaskGuard {
            active: Arc::clone(&self.critical_tasks),
        }
    }

    /// Record the start of a build of this project.
    pub fn notify_build_started(&self) {
        self.session().build_started_at = Some(Utc::now());
    }

    /// Record the end of a build of this project.
    ///
    /// Shared timestamps of every file the last check looked at are dropped.
    /// After a successful rebuild, inputs older than the rebuild's start are
    /// known to be reflected in the outputs.
    pub fn notify_build_completed(&self, succeeded: bool, was_rebuild: bool) {
        let mut session = self.session();
        let files = std::mem::take(&mut session.last_checked_files);
        let paths: Vec<&Path> = files.iter().map(PathBuf::as_path).collect();
        self.solution.invalidate_timestamps(&paths);

        let started_at = session.build_started_at.take();
        if let (true, true, Some(started_at)) = (succeeded, was_rebuild, started_at) {
            debug!("Rebuild of {} completed; resetting last check time", self.project_name);
            for configuration in self.data_source.configurations() {
                let _ = session.last_checked_at.insert(configuration.clone(), started_at);
            }
        }
    }

    /// Decide whether the build can be skipped.
    ///
    /// Writes the diagnostic log to `log_writer` and posts one telemetry event.
    /// Failures of the check itself are reported as
    /// [`FailureReason::Exception`] and yield `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::Cancelled`] when `cancel` fires; the outcome is
    /// then unknown.
    pub async fn is_up_to_date(
        &self,
        build_action: BuildAction,
        log_writer: &mut (dyn Write + Send),
        global_properties: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> CheckResult<bool> {
        if build_action != BuildAction::Build {
            info!("Skipping up-to-date check of {} for {}", self.project_name, build_action);
            return Ok(false);
        }

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CheckError::Cancelled),
            permit = self.semaphore.acquire() => permit
                .map_err(|_| CheckError::DataSourceClosed("check semaphore closed".into()))?,
        };

        let started = Instant::now();
        let check_started_at = Utc::now();
        let check_number = self.check_number.fetch_add(1, Ordering::SeqCst) + 1;
        let ignore_kinds = ignore_kinds_from(global_properties);
        self.session().last_global_properties = global_properties.clone();

        if !self.options.enabled {
            let mut log = CheckLog::new(log_writer, self.options.log_level, self.project_name.clone());
            let _ = log.fail(FailureReason::Disabled, "The up-to-date check is disabled by option.");
            self.post_telemetry(&log, started, 0, None, check_number, &ignore_kinds);
            return Ok(false);
        }

        let input = match self.data_source.wait_for_initial(cancel).await {
            Ok(input) => input,
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                let mut log = CheckLog::new(log_writer, self.options.log_level, self.project_name.clone());
                let _ = log.fail(FailureReason::Exception, format!("Project data is unavailable: {e}"));
                self.post_telemetry(&log, started, 0, None, check_number, &ignore_kinds);
                return Ok(false);
            }
        };

        // The log is not Send; keep it after the last await.
        let log = CheckLog::new(log_writer, self.options.log_level, self.project_name.clone());
        let last_checked_at = self.session().last_checked_at.clone();
        let mut aggregator = FileSystemOperationAggregator::new();
        let mut run = CheckRun {
            log,
            timestamps: self.solution.timestamps_for_check(),
            cancel,
            ignore_kinds: &ignore_kinds,
            copy_items: self.solution.copy_items(),
            critical_tasks_active: self.critical_tasks.load(Ordering::SeqCst) > 0,
            is_validation: false,
            checked_files: Vec::new(),
        };

        let outcome = run.check_all(&input, &last_checked_at, &mut aggregator);
        let mut copy_count = 0;
        let is_up_to_date = match outcome {
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                warn!("Up-to-date check of {} failed: {}", self.project_name, e);
                run.log.fail(FailureReason::Exception, format!("The check failed unexpectedly: {e}"))
            }
            Ok(false) => false,
            Ok(true) => {
                let (success, copied) = aggregator.try_apply_file_system_operations(&mut run.log);
                copy_count = copied;
                if success {
                    if copied > 0 {
                        run.log.info(format!("Copied {copied} files to accelerate the build."));
                    }
                    run.log.info("Project is up-to-date.");
                    true
                } else {
                    run.log.fail(
                        FailureReason::AccelerationCopyFailed,
                        "Failed to copy files for build acceleration.",
                    )
                }
            }
        };

        {
            let mut session = self.session();
            for state in &input.implicit_inputs {
                let _ = session
                    .last_checked_at
                    .insert(state.configuration.clone(), check_started_at);
            }
            session.last_checked_files = std::mem::take(&mut run.checked_files);
        }

        let acceleration = aggregator.acceleration_result(copy_count);
        self.post_telemetry(
            &run.log,
            started,
            input.implicit_inputs.len(),
            Some((acceleration, copy_count)),
            check_number,
            &ignore_kinds,
        );

        info!(
            "{} is {}up to date (check #{})",
            self.project_name,
            if is_up_to_date { "" } else { "not " },
            check_number
        );
        Ok(is_up_to_date)
    }

    /// Re-run the check without side effects, using the global properties of
    /// the previous [`BuildUpToDateCheck::is_up_to_date`] call.
    ///
    /// Last-check times are not advanced, copies are never applied and no
    /// telemetry is posted.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::Cancelled`] when `cancel` fires.
    pub async fn validate_up_to_date(&self, cancel: &CancellationToken) -> CheckResult<ValidationResult> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CheckError::Cancelled),
            permit = self.semaphore.acquire() => permit
                .map_err(|_| CheckError::DataSourceClosed("check semaphore closed".into()))?,
        };

        let input = self.data_source.wait_for_initial(cancel).await?;
        let (global_properties, last_checked_at) = {
            let session = self.session();
            (session.last_global_properties.clone(), session.last_checked_at.clone())
        };
        let ignore_kinds = ignore_kinds_from(&global_properties);

        let mut sink = std::io::sink();
        let log = CheckLog::new(&mut sink, LogLevel::Verbose, self.project_name.clone());
        let mut aggregator = FileSystemOperationAggregator::new();
        let mut run = CheckRun {
            log,
            timestamps: self.solution.timestamps_for_check(),
            cancel,
            ignore_kinds: &ignore_kinds,
            copy_items: self.solution.copy_items(),
            critical_tasks_active: false,
            is_validation: true,
            checked_files: Vec::new(),
        };

        let is_up_to_date = match run.check_all(&input, &last_checked_at, &mut aggregator) {
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => run
                .log
                .fail(FailureReason::Exception, format!("The check failed unexpectedly: {e}")),
            Ok(passed) => passed,
        };

        Ok(ValidationResult {
            is_up_to_date,
            failure: run.log.take_failure(),
        })
    }

    fn post_telemetry(
        &self,
        log: &CheckLog<'_>,
        started: Instant,
        configuration_count: usize,
        acceleration: Option<(AccelerationResult, usize)>,
        check_number: u64,
        ignore_kinds: &IgnoreKinds,
    ) {
        let (acceleration_result, copy_count) =
            acceleration.unwrap_or((AccelerationResult::DisabledNotCandidate, 0));
        let fail_reason = log.failure().map(|failure| failure.reason);
        self.telemetry.post_event(&CheckTelemetryEvent {
            is_up_to_date: fail_reason.is_none() && configuration_count > 0,
            fail_reason,
            duration: started.elapsed(),
            file_count: log.file_count(),
            configuration_count,
            acceleration_result,
            copy_count,
            ignore_kinds_count: ignore_kinds.len(),
            log_level: log.level(),
            check_number,
        });
    }
}

fn ignore_kinds_from(global_properties: &HashMap<String, String>) -> IgnoreKinds {
    global_properties
        .get(IgnoreKinds::GLOBAL_PROPERTY)
        .map(|value| IgnoreKinds::parse(value))
        .unwrap_or_default()
}

/// Mutable state of one check.
struct CheckRun<'a, 'w> {
    log: CheckLog<'w>,
    timestamps: Box<dyn FileTimestamps>,
    cancel: &'a CancellationToken,
    ignore_kinds: &'a IgnoreKinds,
    copy_items: Arc<CopyItemAggregator>,
    critical_tasks_active: bool,
    is_validation: bool,
    checked_files: Vec<PathBuf>,
}

impl CheckRun<'_, '_> {
    fn timestamp(&mut self, path: &Path) -> CheckResult<Option<DateTime<Utc>>> {
        if self.cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }
        self.log.count_file();
        self.checked_files.push(path.to_path_buf());
        Ok(self.timestamps.get_timestamp_utc(path))
    }

    fn check_all(
        &mut self,
        input: &UpToDateCheckConfiguredInput,
        last_checked_at: &HashMap<ProjectConfiguration, DateTime<Utc>>,
        aggregator: &mut FileSystemOperationAggregator,
    ) -> CheckResult<bool> {
        if input.implicit_inputs.is_empty() {
            return Ok(self.log.fail(
                FailureReason::Exception,
                "No project configurations are active, not up-to-date.",
            ));
        }

        for state in &input.implicit_inputs {
            let configuration = state.configuration.to_string();
            if input.implicit_inputs.len() > 1 {
                self.log.info(format!("Checking configuration '{configuration}':"));
            }
            let indent = self.log.indent();

            let (acceleration_enabled, referenced_items) = self.acceleration_for(state);
            let mut operations = aggregator.for_configuration(acceleration_enabled);
            let last_checked = last_checked_at.get(&state.configuration).copied();

            let passed = self.check_configuration(state, last_checked, &mut operations, &referenced_items);
            self.log.unindent(indent);

            if !passed? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn acceleration_for(&mut self, state: &ImplicitConfiguredInput) -> (bool, Vec<CopyItem>) {
        if self.is_validation || state.is_build_acceleration_enabled != Some(true) {
            return (false, Vec::new());
        }
        let Some(target_path) = &state.target_path else {
            self.log
                .info("Build acceleration is disabled because the project has no target path to gather copy data for.");
            return (false, Vec::new());
        };

        let gathered = self.copy_items.try_gather_copy_items_for_project(target_path);
        if gathered.is_complete {
            (true, gathered.items)
        } else {
            let missing: Vec<String> = gathered
                .incomplete_projects
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            self.log.info(format!(
                "Build acceleration is disabled because copy data is incomplete for: {}",
                missing.join(", ")
            ));
            (false, Vec::new())
        }
    }

    fn check_configuration(
        &mut self,
        state: &ImplicitConfiguredInput,
        last_checked: Option<DateTime<Utc>>,
        operations: &mut ConfiguredFileSystemOperations<'_>,
        referenced_items: &[CopyItem],
    ) -> CheckResult<bool> {
        if !self.check_global_conditions(state, last_checked, operations)? {
            return Ok(false);
        }

        if !self.check_inputs_and_outputs(state, &SetName::default_set(), last_checked)? {
            return Ok(false);
        }
        for set in state.set_names.iter() {
            if !self.check_inputs_and_outputs(state, set, last_checked)? {
                return Ok(false);
            }
        }

        if !self.check_markers(state)? {
            return Ok(false);
        }
        if !self.check_copy_to_output_directory_files(state, operations, referenced_items)? {
            return Ok(false);
        }
        self.check_copied_output_files(state, operations)
    }

    fn check_global_conditions(
        &mut self,
        state: &ImplicitConfiguredInput,
        last_checked: Option<DateTime<Utc>>,
        operations: &mut ConfiguredFileSystemOperations<'_>,
    ) -> CheckResult<bool> {
        if self.critical_tasks_active {
            return Ok(self
                .log
                .fail(FailureReason::CriticalTasks, "Critical build tasks are running, not up-to-date."));
        }

        if state.is_disabled {
            return Ok(self.log.fail(
                FailureReason::Disabled,
                "The 'DisableFastUpToDateCheck' property is 'true', not up-to-date.",
            ));
        }

        if last_checked.is_none() && !state.was_state_restored {
            return Ok(self.log.fail(
                FailureReason::FirstRun,
                "The up-to-date check has not yet run for this project, not up-to-date.",
            ));
        }

        // With acceleration these are handled as copies in the copy stage.
        if !operations.is_acceleration_enabled() && !self.is_validation {
            if let Some((_, item)) = state.copy_always_items().first() {
                let base = state.project_directory.clone().unwrap_or_default();
                let source = resolve_path(&base, &item.path);
                if let Some(output_directory) = &state.output_directory {
                    let destination = output_directory.join(item.destination_relative_path());
                    let _ = operations.add_copy(&source, &destination)?;
                }
                return Ok(self.log.fail(
                    FailureReason::CopyAlwaysItemExists,
                    format!(
                        "Item '{}' has CopyToOutputDirectory set to 'Always', not up-to-date.",
                        source.display()
                    ),
                ));
            }
        }

        Ok(true)
    }

    fn check_inputs_and_outputs(
        &mut self,
        state: &ImplicitConfiguredInput,
        set: &SetName,
        last_checked: Option<DateTime<Utc>>,
    ) -> CheckResult<bool> {
        let outputs = self.collect_outputs(state, set);
        if outputs.is_empty() {
            self.log.verbose(format!("No build outputs defined in set '{set}'."));
            return Ok(true);
        }

        self.log.info(format!("Comparing timestamps of inputs and outputs in set '{set}':"));
        let indent = self.log.indent();
        let result = self.compare_inputs_and_outputs(state, set, &outputs, last_checked);
        self.log.unindent(indent);
        result
    }

    fn compare_inputs_and_outputs(
        &mut self,
        state: &ImplicitConfiguredInput,
        set: &SetName,
        outputs: &[PathBuf],
        last_checked: Option<DateTime<Utc>>,
    ) -> CheckResult<bool> {
        let mut earliest: Option<(DateTime<Utc>, &Path)> = None;
        for output in outputs {
            let Some(time) = self.timestamp(output)? else {
                return Ok(self.log.fail(
                    FailureReason::OutputNotFound,
                    format!("Output '{}' does not exist, not up-to-date.", output.display()),
                ));
            };
            self.log.verbose_file("Output", output, Some(time));
            if earliest.is_none_or(|(e, _)| time < e) {
                earliest = Some((time, output.as_path()));
            }
        }
        let Some((earliest_time, earliest_path)) = earliest else {
            return Ok(true);
        };

        if set.is_default() {
            let structural_changes = [
                state.last_items_changed_at_utc,
                state.last_additional_dependent_files_changed_at_utc,
            ];
            if let Some(changed_at) = structural_changes.into_iter().flatten().max() {
                if changed_at > earliest_time {
                    return Ok(self.log.fail(
                        FailureReason::ProjectItemsChangedSinceEarliestOutput,
                        format!(
                            "The set of project items was changed more recently ({}) than the earliest output '{}' ({}), not up-to-date.",
                            format_time(changed_at),
                            earliest_path.display(),
                            format_time(earliest_time)
                        ),
                    ));
                }
            }
        }

        let mut latest: Option<(DateTime<Utc>, PathBuf)> = None;
        for (input, required) in self.collect_inputs(state, set) {
            match self.timestamp(&input)? {
                Some(time) => {
                    self.log.verbose_file("Input", &input, Some(time));
                    if latest.as_ref().is_none_or(|(l, _)| time > *l) {
                        latest = Some((time, input));
                    }
                }
                None if required => {
                    return Ok(self.log.fail(
                        FailureReason::InputNotFound,
                        format!("Input '{}' does not exist and is required, not up-to-date.", input.display()),
                    ));
                }
                None => {
                    self.log
                        .verbose(format!("Optional input '{}' does not exist, ignoring.", input.display()));
                }
            }
        }

        let Some((latest_time, latest_path)) = latest else {
            self.log.verbose("No inputs found.");
            return Ok(true);
        };

        if latest_time > earliest_time {
            return Ok(self.log.fail(
                FailureReason::InputNewerThanEarliestOutput,
                format!(
                    "Input '{}' is newer ({}) than earliest output '{}' ({}), not up-to-date.",
                    latest_path.display(),
                    format_time(latest_time),
                    earliest_path.display(),
                    format_time(earliest_time)
                ),
            ));
        }

        if let Some(last_checked) = last_checked {
            if latest_time > last_checked {
                return Ok(self.log.fail(
                    FailureReason::InputModifiedSinceLastCheck,
                    format!(
                        "Input '{}' ({}) has been modified since the last up-to-date check ({}), not up-to-date.",
                        latest_path.display(),
                        format_time(latest_time),
                        format_time(last_checked)
                    ),
                ));
            }
        }

        self.log.info(format!(
            "Latest input '{}' is older than earliest output '{}'.",
            latest_path.display(),
            earliest_path.display()
        ));
        Ok(true)
    }

    fn collect_outputs(&self, state: &ImplicitConfiguredInput, set: &SetName) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        [
            state.up_to_date_check_output_items.as_ref(),
            state.up_to_date_check_built_items.as_ref(),
        ]
        .into_iter()
        .flat_map(|items| ImplicitConfiguredInput::set_items(items, set))
        .filter(|item| !self.ignore_kinds.ignores(&item.kind))
        .map(|item| item.path)
        .filter(|path| seen.insert(PathKey::new(path)))
        .collect()
    }

    /// Inputs of `set` with whether each is required.
    fn collect_inputs(&self, state: &ImplicitConfiguredInput, set: &SetName) -> Vec<(PathBuf, bool)> {
        let mut inputs: Vec<(PathBuf, bool)> = Vec::new();

        if set.is_default() {
            let base = state.project_directory.clone().unwrap_or_default();
            inputs.extend(state.project_full_path.iter().cloned().map(|p| (p, true)));
            inputs.extend(state.newest_import_input.iter().cloned().map(|p| (p, true)));
            inputs.extend(
                state
                    .additional_dependent_file_times
                    .keys()
                    .cloned()
                    .map(|p| (p, false)),
            );
            for (item_type, items) in state.input_source_items_by_item_type.iter() {
                if is_non_compilation_item_type(item_type) {
                    continue;
                }
                inputs.extend(items.iter().map(|item| (resolve_path(&base, &item.path), true)));
            }
            inputs.extend(
                state
                    .resolved_analyzer_reference_paths
                    .iter()
                    .cloned()
                    .map(|p| (p, true)),
            );
            inputs.extend(
                state
                    .resolved_compilation_reference_paths
                    .iter()
                    .cloned()
                    .map(|p| (p, true)),
            );
        }

        inputs.extend(
            ImplicitConfiguredInput::set_items(&state.up_to_date_check_input_items, set)
                .into_iter()
                .filter(|item| !self.ignore_kinds.ignores(&item.kind))
                .map(|item| (item.path, true)),
        );

        let mut seen = HashSet::new();
        inputs.retain(|(path, _)| seen.insert(PathKey::new(path)));
        inputs
    }

    fn check_markers(&mut self, state: &ImplicitConfiguredInput) -> CheckResult<bool> {
        let Some(output_marker) = &state.copy_up_to_date_marker else {
            self.log.verbose("No output marker exists, skipping marker check.");
            return Ok(true);
        };
        if state.copy_reference_inputs.is_empty() {
            self.log.verbose("No input markers exist, skipping marker check.");
            return Ok(true);
        }

        let Some(output_time) = self.timestamp(output_marker)? else {
            self.log.info(format!(
                "Output marker '{}' does not exist, skipping marker check.",
                output_marker.display()
            ));
            return Ok(true);
        };

        let mut latest: Option<(DateTime<Utc>, &Path)> = None;
        for marker in state.copy_reference_inputs.iter() {
            match self.timestamp(marker)? {
                Some(time) => {
                    if latest.is_none_or(|(l, _)| time > l) {
                        latest = Some((time, marker.as_path()));
                    }
                }
                None => self
                    .log
                    .verbose(format!("Input marker '{}' does not exist.", marker.display())),
            }
        }

        match latest {
            Some((input_time, input_marker)) if input_time > output_time => Ok(self.log.fail(
                FailureReason::InputMarkerNewerThanOutputMarker,
                format!(
                    "Input marker '{}' is newer ({}) than output marker '{}' ({}), not up-to-date.",
                    input_marker.display(),
                    format_time(input_time),
                    output_marker.display(),
                    format_time(output_time)
                ),
            )),
            _ => Ok(true),
        }
    }

    fn check_copy_to_output_directory_files(
        &mut self,
        state: &ImplicitConfiguredInput,
        operations: &mut ConfiguredFileSystemOperations<'_>,
        referenced_items: &[CopyItem],
    ) -> CheckResult<bool> {
        let base = state.project_directory.clone().unwrap_or_default();
        let mut items: Vec<CopyItem> = state
            .source_items_with_copy_type(CopyType::PreserveNewest)
            .into_iter()
            .map(|(_, item)| CopyItem::from_input_item(&base, item))
            .collect();
        if operations.is_acceleration_enabled() {
            items.extend(
                state
                    .copy_always_items()
                    .into_iter()
                    .map(|(_, item)| CopyItem::from_input_item(&base, item)),
            );
            items.extend(referenced_items.iter().cloned());
        }

        if items.is_empty() {
            return Ok(true);
        }
        let Some(output_directory) = &state.output_directory else {
            self.log.info("No output directory is defined, skipping copy-to-output-directory checks.");
            return Ok(true);
        };

        self.log.info(format!("Checking {} copy-to-output-directory items:", items.len()));
        let indent = self.log.indent();
        let result = self.compare_copy_items(&items, output_directory, operations);
        self.log.unindent(indent);
        result
    }

    fn compare_copy_items(
        &mut self,
        items: &[CopyItem],
        output_directory: &Path,
        operations: &mut ConfiguredFileSystemOperations<'_>,
    ) -> CheckResult<bool> {
        for item in items {
            let source = &item.source_path;
            let destination = output_directory.join(&item.relative_target_path);

            let Some(source_time) = self.timestamp(source)? else {
                return Ok(self.log.fail(
                    FailureReason::CopyToOutputDirectorySourceNotFound,
                    format!("Source '{}' does not exist, not up-to-date.", source.display()),
                ));
            };
            self.log.verbose_file("Source", source, Some(source_time));

            if item.copy_type == CopyType::Always {
                let _ = operations.add_copy(source, &destination)?;
                continue;
            }

            match self.timestamp(&destination)? {
                None => {
                    if !operations.add_copy(source, &destination)? {
                        return Ok(self.log.fail(
                            FailureReason::CopyToOutputDirectoryDestinationNotFound,
                            format!("Destination '{}' does not exist, not up-to-date.", destination.display()),
                        ));
                    }
                    self.log
                        .verbose(format!("Destination '{}' is missing, copy scheduled.", destination.display()));
                }
                Some(destination_time) if destination_time < source_time => {
                    if !operations.add_copy(source, &destination)? {
                        return Ok(self.log.fail(
                            FailureReason::CopyToOutputDirectorySourceNewer,
                            format!(
                                "Source '{}' ({}) is newer than destination '{}' ({}), not up-to-date.",
                                source.display(),
                                format_time(source_time),
                                destination.display(),
                                format_time(destination_time)
                            ),
                        ));
                    }
                    self.log
                        .verbose(format!("Destination '{}' is stale, copy scheduled.", destination.display()));
                }
                Some(destination_time) => self.log.verbose_file("Destination", &destination, Some(destination_time)),
            }
        }
        Ok(true)
    }

    fn check_copied_output_files(
        &mut self,
        state: &ImplicitConfiguredInput,
        operations: &mut ConfiguredFileSystemOperations<'_>,
    ) -> CheckResult<bool> {
        if state.copied_output_files.is_empty() {
            return Ok(true);
        }

        self.log.info("Checking copied output files:");
        let indent = self.log.indent();
        let result = self.compare_copied_output_files(state, operations);
        self.log.unindent(indent);
        result
    }

    fn compare_copied_output_files(
        &mut self,
        state: &ImplicitConfiguredInput,
        operations: &mut ConfiguredFileSystemOperations<'_>,
    ) -> CheckResult<bool> {
        for (destination, source) in state.copied_output_files.iter() {
            let Some(source_time) = self.timestamp(source)? else {
                return Ok(self.log.fail(
                    FailureReason::CopySourceNotFound,
                    format!("Source '{}' does not exist, not up-to-date.", source.display()),
                ));
            };

            match self.timestamp(destination)? {
                None => {
                    if !operations.add_copy(source, destination)? {
                        return Ok(self.log.fail(
                            FailureReason::CopyDestinationNotFound,
                            format!("Destination '{}' does not exist, not up-to-date.", destination.display()),
                        ));
                    }
                }
                Some(destination_time) if destination_time < source_time => {
                    if !operations.add_copy(source, destination)? {
                        return Ok(self.log.fail(
                            FailureReason::CopySourceNewer,
                            format!(
                                "Source '{}' ({}) is newer than destination '{}' ({}), not up-to-date.",
                                source.display(),
                                format_time(source_time),
                                destination.display(),
                                format_time(destination_time)
                            ),
                        ));
                    }
                }
                Some(destination_time) => {
                    self.log.verbose_file("Copied output", destination, Some(destination_time));
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_action_parsing() {
        assert_eq!("Build".parse::<BuildAction>().unwrap(), BuildAction::Build);
        assert_eq!("rebuild".parse::<BuildAction>().unwrap(), BuildAction::Rebuild);
        assert!("deploy".parse::<BuildAction>().is_err());
        assert_eq!(BuildAction::Clean.to_string(), "clean");
    }

    #[test]
    fn test_ignore_kinds_from_global_properties() {
        let mut properties = HashMap::new();
        assert!(ignore_kinds_from(&properties).is_empty());
        let _ = properties.insert(IgnoreKinds::GLOBAL_PROPERTY.to_string(), "Docs;;Tests".to_string());
        assert_eq!(ignore_kinds_from(&properties).len(), 2);
    }

    #[test]
    fn test_critical_task_guard_counts() {
        let active = Arc::new(AtomicUsize::new(1));
        let guard = CriticalTaskGuard {
            active: Arc::clone(&active),
        };
        drop(guard);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
