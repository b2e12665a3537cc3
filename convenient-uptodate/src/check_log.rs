//! Human-readable diagnostic log written during a check
//!
//! The log goes to a writer supplied by the caller (a build output pane, a
//! terminal) and is filtered by [`LogLevel`]. Every line is mirrored to
//! `tracing` at debug level regardless of the configured verbosity.

use crate::failure::{CheckFailure, FailureReason};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// How much of the check is written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Nothing
    None,
    /// Only the final decision and failure reasons
    #[default]
    Minimal,
    /// Stage summaries
    Info,
    /// Every file considered
    Verbose,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "minimal" => Ok(Self::Minimal),
            "info" => Ok(Self::Info),
            "verbose" => Ok(Self::Verbose),
            other => Err(format!("Unknown log level '{other}'")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Info => "info",
            Self::Verbose => "verbose",
        };
        f.write_str(name)
    }
}

/// Format a timestamp the way the log prints it.
#[must_use]
pub fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Indentation-structured log for one check.
pub struct CheckLog<'w> {
    writer: &'w mut dyn Write,
    level: LogLevel,
    project_name: String,
    indent: Cell<usize>,
    failure: Option<CheckFailure>,
    file_count: usize,
}

impl<'w> CheckLog<'w> {
    /// Create a log writing to `writer` at `level` for the project named `project_name`.
    pub fn new(writer: &'w mut dyn Write, level: LogLevel, project_name: impl Into<String>) -> Self {
        Self {
            writer,
            level,
            project_name: project_name.into(),
            indent: Cell::new(0),
            failure: None,
            file_count: 0,
        }
    }

    /// Configured verbosity.
    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Whether verbose lines are written.
    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.level >= LogLevel::Verbose
    }

    /// Write a line at minimal level.
    pub fn minimal(&mut self, message: impl AsRef<str>) {
        self.write(LogLevel::Minimal, message.as_ref());
    }

    /// Write a line at info level.
    pub fn info(&mut self, message: impl AsRef<str>) {
        self.write(LogLevel::Info, message.as_ref());
    }

    /// Write a line at verbose level.
    pub fn verbose(&mut self, message: impl AsRef<str>) {
        self.write(LogLevel::Verbose, message.as_ref());
    }

    /// Increase indentation; the returned guard must be passed back to [`CheckLog::unindent`].
    pub fn indent(&self) -> Indent {
        let depth = self.indent.get();
        self.indent.set(depth + 1);
        Indent { restore: depth }
    }

    /// Restore the indentation recorded by `indent`.
    pub fn unindent(&self, indent: Indent) {
        self.indent.set(indent.restore);
    }

    /// Record the failure and write it at minimal level. Returns `false`
    /// so stages can `return log.fail(...)`.
    pub fn fail(&mut self, reason: FailureReason, description: impl Into<String>) -> bool {
        let description = description.into();
        self.write(
            LogLevel::Minimal,
            &format!("Project is not up-to-date: {description}"),
        );
        self.failure = Some(CheckFailure { reason, description });
        false
    }

    /// Failure recorded by [`CheckLog::fail`], if any.
    #[must_use]
    pub fn failure(&self) -> Option<&CheckFailure> {
        self.failure.as_ref()
    }

    /// Take the recorded failure, leaving none.
    pub fn take_failure(&mut self) -> Option<CheckFailure> {
        self.failure.take()
    }

    /// Count a file whose timestamp was consulted.
    pub fn count_file(&mut self) {
        self.file_count += 1;
    }

    /// Files consulted so far.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.file_count
    }

    /// Verbose line describing one file and its timestamp.
    pub fn verbose_file(&mut self, label: &str, path: &Path, time: Option<DateTime<Utc>>) {
        if self.is_verbose() {
            let time = time.map_or_else(|| "missing".to_string(), format_time);
            self.verbose(format!("{label} '{}' ({time})", path.display()));
        }
    }

    fn write(&mut self, level: LogLevel, message: &str) {
        let indent = "    ".repeat(self.indent.get());
        debug!(target: "convenient_uptodate::log", "{}{}", indent, message);

        if level > self.level || self.level == LogLevel::None {
            return;
        }
        if let Err(e) = writeln!(
            self.writer,
            "FastUpToDate: {indent}{message} ({})",
            self.project_name
        ) {
            warn!("Failed to write up-to-date log: {}", e);
        }
    }
}

/// Indentation token returned by [`CheckLog::indent`].
#[must_use = "pass the indent back to CheckLog::unindent"]
#[derive(Debug)]
pub struct Indent {
    restore: usize,
}
