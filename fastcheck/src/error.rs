//! Errors raised while loading command inputs

use std::path::PathBuf;

/// Problems with the files handed to the command line.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Configuration {0} was given more than once")]
    DuplicateConfiguration(String),

    #[error(transparent)]
    Check(#[from] convenient_uptodate::CheckError),
}
