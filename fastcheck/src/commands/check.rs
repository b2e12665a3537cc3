//! Check and validate commands

use super::{persistence_for, ProjectInputs};
use crate::session::Session;
use convenient_uptodate::{BuildAction, BuildUpToDateCheck, IgnoreKinds, TracingTelemetry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the check, printing the diagnostic log to stdout.
///
/// Returns whether the project is up to date.
pub async fn execute(
    inputs: &ProjectInputs,
    build_action: BuildAction,
    ignore_kinds: Option<&str>,
    disable: bool,
    cancel: &CancellationToken,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let mut options = inputs.load_options().await?;
    if disable {
        options.enabled = false;
    }
    let persistence = persistence_for(&options);
    let session = Session::load(&inputs.projects, &inputs.references, persistence, cancel).await?;

    let mut global_properties = HashMap::new();
    if let Some(kinds) = ignore_kinds {
        let _ = global_properties.insert(IgnoreKinds::GLOBAL_PROPERTY.to_string(), kinds.to_string());
    }

    let check = BuildUpToDateCheck::new(
        session.project_name.clone(),
        options,
        Arc::clone(&session.data_source),
        Arc::clone(&session.context),
        Arc::new(TracingTelemetry),
    );
    let mut stdout = std::io::stdout();
    let result = check
        .is_up_to_date(build_action, &mut stdout, &global_properties, cancel)
        .await;
    drop(check);
    session.close().await;

    let up_to_date = result?;
    info!("Check finished: {}", if up_to_date { "up to date" } else { "build required" });
    Ok(up_to_date)
}

/// Run the side-effect-free validation and print its verdict.
pub async fn validate(
    inputs: &ProjectInputs,
    cancel: &CancellationToken,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let options = inputs.load_options().await?;
    let persistence = persistence_for(&options);
    let session = Session::load(&inputs.projects, &inputs.references, persistence, cancel).await?;

    let check = BuildUpToDateCheck::new(
        session.project_name.clone(),
        options,
        Arc::clone(&session.data_source),
        Arc::clone(&session.context),
        Arc::new(TracingTelemetry),
    );
    let result = check.validate_up_to_date(cancel).await;
    drop(check);
    let name = session.project_name.clone();
    session.close().await;

    let validation = result?;
    match &validation.failure {
        None => println!("{name}: up to date"),
        Some(failure) => println!("{name}: not up to date ({failure})"),
    }
    Ok(validation.is_up_to_date)
}
