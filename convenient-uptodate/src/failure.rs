//! Reasons a project is not up to date

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured reason attached to every "not up to date" decision.
///
/// These are policy outcomes, not errors. Each one is logged and reported to
/// telemetry under the name returned by [`FailureReason::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    /// A build-critical operation is in flight
    CriticalTasks,
    /// `DisableFastUpToDateCheck` is set
    Disabled,
    /// First check in this session and nothing was restored
    FirstRun,
    /// An item is copied to the output on every build
    CopyAlwaysItemExists,
    /// An expected output is missing
    OutputNotFound,
    /// Items were added or removed after the earliest output was written
    ProjectItemsChangedSinceEarliestOutput,
    /// A required input is missing
    InputNotFound,
    /// An input is newer than the earliest output
    InputNewerThanEarliestOutput,
    /// An input changed after the last check began
    InputModifiedSinceLastCheck,
    /// A referenced project copied its output after this project's marker was written
    InputMarkerNewerThanOutputMarker,
    /// The source of a copied output is missing
    CopySourceNotFound,
    /// A copied output is missing
    CopyDestinationNotFound,
    /// A copied output is older than its source
    CopySourceNewer,
    /// The source of a copy-to-output item is missing
    CopyToOutputDirectorySourceNotFound,
    /// The destination of a copy-to-output item is missing
    CopyToOutputDirectoryDestinationNotFound,
    /// The destination of a copy-to-output item is older than its source
    CopyToOutputDirectorySourceNewer,
    /// Accelerated copies could not be applied
    AccelerationCopyFailed,
    /// The check itself failed unexpectedly
    Exception,
}

impl FailureReason {
    /// Stable name used in logs and telemetry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CriticalTasks => "CriticalTasks",
            Self::Disabled => "Disabled",
            Self::FirstRun => "FirstRun",
            Self::CopyAlwaysItemExists => "CopyAlwaysItemExists",
            Self::OutputNotFound => "OutputNotFound",
            Self::ProjectItemsChangedSinceEarliestOutput => "ProjectItemsChangedSinceEarliestOutput",
            Self::InputNotFound => "InputNotFound",
            Self::InputNewerThanEarliestOutput => "InputNewerThanEarliestOutput",
            Self::InputModifiedSinceLastCheck => "InputModifiedSinceLastCheck",
            Self::InputMarkerNewerThanOutputMarker => "InputMarkerNewerThanOutputMarker",
            Self::CopySourceNotFound => "CopySourceNotFound",
            Self::CopyDestinationNotFound => "CopyDestinationNotFound",
            Self::CopySourceNewer => "CopySourceNewer",
            Self::CopyToOutputDirectorySourceNotFound => "CopyToOutputDirectorySourceNotFound",
            Self::CopyToOutputDirectoryDestinationNotFound => "CopyToOutputDirectoryDestinationNotFound",
            Self::CopyToOutputDirectorySourceNewer => "CopyToOutputDirectorySourceNewer",
            Self::AccelerationCopyFailed => "AccelerationCopyFailed",
            Self::Exception => "Exception",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed check: reason plus the human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    /// Reason code
    pub reason: FailureReason,
    /// Explanation as written to the log
    pub description: String,
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.description)
    }
}
