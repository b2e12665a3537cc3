//! Gather command: copy items a project inherits from its references

use crate::session::{publish, read_snapshot};
use convenient_uptodate::{CopyItem, InMemoryStatePersistence, SolutionBuildContext};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Serialize)]
struct GatherReport<'a> {
    target: &'a Path,
    is_complete: bool,
    incomplete_projects: &'a [PathBuf],
    items: &'a [CopyItem],
}

/// Publish every project, gather for `target` and print the result as JSON.
///
/// Returns whether the gathered data is complete.
pub async fn execute(
    projects: &[PathBuf],
    target: &Path,
    cancel: &CancellationToken,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let context = SolutionBuildContext::new();
    let mut data_sources = Vec::with_capacity(projects.len());
    for path in projects {
        let snapshot = read_snapshot(path).await?;
        data_sources.push(publish(&context, vec![snapshot], Arc::new(InMemoryStatePersistence::new()), cancel).await?);
    }

    let gathered = context.copy_items().try_gather_copy_items_for_project(target);
    let report = GatherReport {
        target,
        is_complete: gathered.is_complete,
        incomplete_projects: &gathered.incomplete_projects,
        items: &gathered.items,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    for mut data_source in data_sources {
        data_source.close().await;
    }
    Ok(gathered.is_complete)
}
