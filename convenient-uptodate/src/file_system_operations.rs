//! Copy acceleration
//!
//! When a configuration opts into build acceleration, copy-only differences
//! found by the checker are recorded here instead of failing the check. After
//! every configuration passes, the pending copies are applied directly and the
//! build is skipped.

use crate::check_log::CheckLog;
use crate::error::{CheckError, CheckResult};
use crate::names::PathKey;
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How acceleration figured in a check, for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccelerationResult {
    /// Enabled, and files were copied instead of building
    EnabledAccelerated,
    /// Enabled, but nothing needed copying
    EnabledNotAccelerated,
    /// Disabled, but enabling it would have avoided a build
    DisabledCandidate,
    /// Disabled, and it would not have helped
    DisabledNotCandidate,
}

/// A pending copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOperation {
    /// Absolute source path
    pub source: PathBuf,
    /// Absolute destination path
    pub destination: PathBuf,
}

/// Pending copies across all configurations of one check.
#[derive(Debug, Default)]
pub struct FileSystemOperationAggregator {
    copies: Vec<CopyOperation>,
    destinations: HashSet<PathKey>,
    any_enabled: bool,
    is_candidate: bool,
}

impl FileSystemOperationAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations view for one configuration.
    ///
    /// `acceleration_enabled` is the configuration's
    /// `AccelerateBuildsInVisualStudio` value, already combined with whether
    /// the transitive copy data is complete.
    pub fn for_configuration(&mut self, acceleration_enabled: bool) -> ConfiguredFileSystemOperations<'_> {
        self.any_enabled |= acceleration_enabled;
        ConfiguredFileSystemOperations {
            aggregator: self,
            is_acceleration_enabled: acceleration_enabled,
        }
    }

    /// Record a copy from `source` to `destination`.
    ///
    /// A destination already recorded, compared case-insensitively and
    /// regardless of separator style, is kept with its first source.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::InvalidCopy`] when either path is relative or both are the same.
    pub fn add_copy(&mut self, source: &Path, destination: &Path) -> CheckResult<()> {
        let invalid = |reason| CheckError::InvalidCopy {
            source_path: source.to_path_buf(),
            destination: destination.to_path_buf(),
            reason,
        };
        if !source.is_absolute() {
            return Err(invalid("source path must be absolute"));
        }
        if !destination.is_absolute() {
            return Err(invalid("destination path must be absolute"));
        }
        if source == destination {
            return Err(invalid("source and destination are the same file"));
        }

        if self.destinations.insert(PathKey::new(destination)) {
            self.copies.push(CopyOperation {
                source: source.to_path_buf(),
                destination: destination.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Whether any copy is pending.
    #[must_use]
    pub fn has_pending_copies(&self) -> bool {
        !self.copies.is_empty()
    }

    /// Telemetry classification after applying `copy_count` copies.
    #[must_use]
    pub fn acceleration_result(&self, copy_count: usize) -> AccelerationResult {
        match (self.any_enabled, copy_count > 0, self.is_candidate) {
            (true, true, _) => AccelerationResult::EnabledAccelerated,
            (true, false, _) => AccelerationResult::EnabledNotAccelerated,
            (false, _, true) => AccelerationResult::DisabledCandidate,
            (false, _, false) => AccelerationResult::DisabledNotCandidate,
        }
    }

    /// Perform every pending copy.
    ///
    /// Files whose destination already has the source's size and last-write
    /// time are skipped. Each copied destination gets the source's last-write
    /// time. The first I/O error stops the apply; copies made before it stay.
    /// Returns whether every copy succeeded and how many files were copied.
    pub fn try_apply_file_system_operations(&mut self, log: &mut CheckLog<'_>) -> (bool, usize) {
        let mut copied = 0;
        let copies = std::mem::take(&mut self.copies);
        self.destinations.clear();

        if copies.is_empty() {
            return (true, 0);
        }

        log.info(format!("Copying {} files to accelerate build:", copies.len()));
        let indent = log.indent();

        for copy in &copies {
            match copy_if_changed(&copy.source, &copy.destination) {
                Ok(true) => {
                    copied += 1;
                    log.info(format!(
                        "From '{}' to '{}'.",
                        copy.source.display(),
                        copy.destination.display()
                    ));
                }
                Ok(false) => {
                    log.verbose(format!(
                        "Skipping '{}', destination is identical.",
                        copy.source.display()
                    ));
                }
                Err(e) => {
                    warn!(
                        "Accelerated copy from {} to {} failed: {}",
                        copy.source.display(),
                        copy.destination.display(),
                        e
                    );
                    log.unindent(indent);
                    log.minimal(format!(
                        "Failed to copy '{}' to '{}': {}",
                        copy.source.display(),
                        copy.destination.display(),
                        e
                    ));
                    return (false, copied);
                }
            }
        }

        log.unindent(indent);
        debug!("Accelerated {} of {} copies", copied, copies.len());
        (true, copied)
    }
}

fn copy_if_changed(source: &Path, destination: &Path) -> std::io::Result<bool> {
    let source_metadata = std::fs::metadata(source)?;
    let source_time = FileTime::from_last_modification_time(&source_metadata);

    if let Ok(destination_metadata) = std::fs::metadata(destination) {
        let same_size = destination_metadata.len() == source_metadata.len();
        let same_time = FileTime::from_last_modification_time(&destination_metadata) == source_time;
        if same_size && same_time {
            return Ok(false);
        }
    }

    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::copy(source, destination)?;
    filetime::set_file_mtime(destination, source_time)?;
    Ok(true)
}

/// One configuration's view of the aggregator.
pub struct ConfiguredFileSystemOperations<'a> {
    aggregator: &'a mut FileSystemOperationAggregator,
    is_acceleration_enabled: bool,
}

impl ConfiguredFileSystemOperations<'_> {
    /// Whether copies may be accelerated for this configuration.
    #[must_use]
    pub fn is_acceleration_enabled(&self) -> bool {
        self.is_acceleration_enabled
    }

    /// Record a copy if acceleration is enabled.
    ///
    /// Returns `Ok(false)` when it is not; the configuration is then counted
    /// as an acceleration candidate and the caller must fail its stage.
    ///
    /// # Errors
    ///
    /// Propagates [`FileSystemOperationAggregator::add_copy`] errors.
    pub fn add_copy(&mut self, source: &Path, destination: &Path) -> CheckResult<bool> {
        if !self.is_acceleration_enabled {
            self.aggregator.is_candidate = true;
            return Ok(false);
        }
        self.aggregator.add_copy(source, destination)?;
        Ok(true)
    }
}
