//! Structured telemetry posted after every check

use crate::check_log::LogLevel;
use crate::failure::FailureReason;
use crate::file_system_operations::AccelerationResult;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// One up-to-date check, as reported to telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckTelemetryEvent {
    /// Whether the project was up to date
    pub is_up_to_date: bool,
    /// Reason when not up to date
    pub fail_reason: Option<FailureReason>,
    /// Wall-clock time spent in the check
    pub duration: Duration,
    /// Files whose timestamps were consulted
    pub file_count: usize,
    /// Implicitly active configurations checked
    pub configuration_count: usize,
    /// Copy acceleration outcome
    pub acceleration_result: AccelerationResult,
    /// Files copied by acceleration
    pub copy_count: usize,
    /// Kinds excluded by `FastUpToDateCheckIgnoresKinds`
    pub ignore_kinds_count: usize,
    /// Verbosity of the diagnostic log
    pub log_level: LogLevel,
    /// Sequence number of the check within the session
    pub check_number: u64,
}

/// Sink for check telemetry.
pub trait TelemetryService: Send + Sync {
    /// Record one check.
    fn post_event(&self, event: &CheckTelemetryEvent);
}

/// Emits telemetry as structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetryService for TracingTelemetry {
    fn post_event(&self, event: &CheckTelemetryEvent) {
        info!(
            target: "convenient_uptodate::telemetry",
            up_to_date = event.is_up_to_date,
            fail_reason = event.fail_reason.map(FailureReason::as_str),
            duration_ms = event.duration.as_millis() as u64,
            file_count = event.file_count,
            configuration_count = event.configuration_count,
            acceleration = ?event.acceleration_result,
            copy_count = event.copy_count,
            ignore_kinds_count = event.ignore_kinds_count,
            log_level = %event.log_level,
            check_number = event.check_number,
            "up-to-date check completed"
        );
    }
}

/// Keeps every posted event in memory.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<CheckTelemetryEvent>>,
}

impl RecordingTelemetry {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events posted so far.
    #[must_use]
    pub fn events(&self) -> Vec<CheckTelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl TelemetryService for RecordingTelemetry {
    fn post_event(&self, event: &CheckTelemetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
    }
}
