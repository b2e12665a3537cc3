//! fastcheck command-line interface
//!
//! - `check`: decide whether a project build can be skipped
//! - `validate`: the same decision, without side effects
//! - `gather`: show the copy items a project takes from its references

use crate::error::CliError;
use clap::{Args, Parser, Subcommand};
use convenient_uptodate::{
    BuildAction, InMemoryStatePersistence, JsonStatePersistence, LogLevel, UpToDateCheckOptions,
    UpToDateCheckStatePersistence,
};
use std::path::PathBuf;
use std::sync::Arc;

pub mod check;
pub mod gather;

/// fastcheck - skip builds whose outputs already reflect their inputs
#[derive(Parser)]
#[command(name = "fastcheck")]
#[command(about = "Fast up-to-date check for project builds")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decide whether the build can be skipped (exit code 0 when up to date)
    Check {
        #[command(flatten)]
        inputs: ProjectInputs,

        /// Build action the host is about to run: build, rebuild or clean
        #[arg(long, default_value = "build")]
        build_action: BuildAction,

        /// Semicolon-separated item kinds to ignore
        #[arg(long)]
        ignore_kinds: Option<String>,

        /// Turn the check off, as the host option would
        #[arg(long)]
        disable: bool,
    },

    /// Run the check without applying copies or advancing state
    Validate {
        #[command(flatten)]
        inputs: ProjectInputs,
    },

    /// Print the copy items gathered for a project's references
    Gather {
        /// Snapshots of every project taking part (repeatable)
        #[arg(short, long = "project", required = true)]
        projects: Vec<PathBuf>,

        /// Target path of the project to gather for
        #[arg(short, long)]
        target: PathBuf,
    },
}

/// Snapshots and options shared by `check` and `validate`.
#[derive(Args)]
pub struct ProjectInputs {
    /// Snapshot of one configuration of the checked project (repeatable)
    #[arg(short, long = "project", required = true)]
    pub projects: Vec<PathBuf>,

    /// Snapshot of a referenced project (repeatable)
    #[arg(short, long = "reference")]
    pub references: Vec<PathBuf>,

    /// Options file; flags override its values
    #[arg(long)]
    pub options: Option<PathBuf>,

    /// Directory for item state kept between runs
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Diagnostic log verbosity: none, minimal, info or verbose
    #[arg(short, long)]
    pub verbosity: Option<LogLevel>,
}

impl ProjectInputs {
    /// Options from the options file, overridden by flags.
    pub async fn load_options(&self) -> Result<UpToDateCheckOptions, CliError> {
        let mut options = match &self.options {
            Some(path) => UpToDateCheckOptions::from_json_file(path).await?,
            None => UpToDateCheckOptions::default(),
        };
        if let Some(level) = self.verbosity {
            options.log_level = level;
        }
        if let Some(state_dir) = &self.state_dir {
            options.state_dir = Some(state_dir.clone());
        }
        Ok(options)
    }
}

/// Item state store for `options`: on disk when a state directory is set.
pub fn persistence_for(options: &UpToDateCheckOptions) -> Arc<dyn UpToDateCheckStatePersistence> {
    match &options.state_dir {
        Some(dir) => Arc::new(JsonStatePersistence::new(dir)),
        None => Arc::new(InMemoryStatePersistence::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_check() {
        let cli = Cli::try_parse_from([
            "fastcheck",
            "check",
            "-p",
            "debug.json",
            "-p",
            "release.json",
            "--reference",
            "lib.json",
            "--verbosity",
            "verbose",
            "--build-action",
            "rebuild",
            "--ignore-kinds",
            "Docs;Tests",
        ])
        .unwrap();

        let Commands::Check {
            inputs,
            build_action,
            ignore_kinds,
            disable,
        } = cli.command
        else {
            panic!("expected check");
        };
        assert_eq!(inputs.projects.len(), 2);
        assert_eq!(inputs.references, vec![PathBuf::from("lib.json")]);
        assert_eq!(inputs.verbosity, Some(LogLevel::Verbose));
        assert_eq!(build_action, BuildAction::Rebuild);
        assert_eq!(ignore_kinds.as_deref(), Some("Docs;Tests"));
        assert!(!disable);
    }

    #[test]
    fn test_project_is_required() {
        assert!(Cli::try_parse_from(["fastcheck", "validate"]).is_err());
    }

    #[tokio::test]
    async fn test_flags_override_options_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{"log_level": "info", "enabled": false}"#).unwrap();

        let inputs = ProjectInputs {
            projects: vec![PathBuf::from("app.json")],
            references: Vec::new(),
            options: Some(path),
            state_dir: Some(dir.path().join("state")),
            verbosity: Some(LogLevel::Verbose),
        };
        let options = inputs.load_options().await.unwrap();
        assert!(!options.enabled);
        assert_eq!(options.log_level, LogLevel::Verbose);
        assert_eq!(options.state_dir, Some(dir.path().join("state")));
    }
}
