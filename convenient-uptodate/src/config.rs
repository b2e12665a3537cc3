//! Host options for the up-to-date check

use crate::check_log::LogLevel;
use crate::error::CheckResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User-level options, read once per host session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpToDateCheckOptions {
    /// When false every check reports "not up to date" without looking at files
    pub enabled: bool,
    /// Verbosity of the diagnostic log
    pub log_level: LogLevel,
    /// Where item state is persisted; `None` keeps it in memory only
    pub state_dir: Option<PathBuf>,
}

impl Default for UpToDateCheckOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: LogLevel::Minimal,
            state_dir: None,
        }
    }
}

impl UpToDateCheckOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or is not valid JSON.
    pub async fn from_json_file(path: impl AsRef<Path>) -> CheckResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(serde_json::from_str(&content)?)
    }
}
