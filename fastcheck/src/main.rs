//! fastcheck - command-line host for the fast up-to-date check
//!
//! Loads project snapshots written as JSON, feeds them through the input
//! pipeline and asks whether the build can be skipped. The diagnostic log goes
//! to stdout; tracing output goes to stderr.

mod commands;
mod error;
mod session;

use clap::Parser;
use commands::{Cli, Commands};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fastcheck=info,convenient_uptodate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling check");
            on_interrupt.cancel();
        }
    });

    let success = match &cli.command {
        Commands::Check {
            inputs,
            build_action,
            ignore_kinds,
            disable,
        } => commands::check::execute(inputs, *build_action, ignore_kinds.as_deref(), *disable, &cancel).await?,
        Commands::Validate { inputs } => commands::check::validate(inputs, &cancel).await?,
        Commands::Gather { projects, target } => commands::gather::execute(projects, target, &cancel).await?,
    };

    Ok(if success { ExitCode::SUCCESS } else { ExitCode::from(1) })
}
