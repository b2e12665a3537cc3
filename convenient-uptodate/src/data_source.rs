//! Snapshot pipeline feeding the checker
//!
//! Each configuration gets one message loop. The host posts complete project
//! snapshots; the loop diffs each against the previous one, derives the next
//! [`ImplicitConfiguredInput`] and publishes it on a `watch` channel. The
//! checker only ever reads the latest published value.

use crate::copy_items::CopyItemAggregator;
use crate::error::{CheckError, CheckResult};
use crate::input_state::{ImplicitConfiguredInput, UpToDateCheckConfiguredInput};
use crate::items::native_path;
use crate::persistence::UpToDateCheckStatePersistence;
use crate::project_data::{properties, rules, ProjectConfiguration, ProjectSnapshot, ProjectUpdate};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Latest derived state of one configuration; `None` until the first snapshot.
pub type PublishedInput = Option<Arc<ImplicitConfiguredInput>>;

const CHANNEL_BUFFER_SIZE: usize = 16;

/// Message loop for one configuration.
pub struct ConfiguredInputPipeline {
    configuration: ProjectConfiguration,
    snapshot_tx: Option<mpsc::Sender<ProjectSnapshot>>,
    state_rx: watch::Receiver<PublishedInput>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ConfiguredInputPipeline {
    /// Spawn the loop for `configuration` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn spawn(
        configuration: ProjectConfiguration,
        persistence: Arc<dyn UpToDateCheckStatePersistence>,
        copy_items: Arc<CopyItemAggregator>,
    ) -> Self {
        let (snapshot_tx, snapshot_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (state_tx, state_rx) = watch::channel(None);

        let loop_configuration = configuration.clone();
        let handle = tokio::spawn(async move {
            Self::run_message_loop(loop_configuration, snapshot_rx, state_tx, persistence, copy_items).await;
        });

        Self {
            configuration,
            snapshot_tx: Some(snapshot_tx),
            state_rx,
            task_handle: Some(handle),
        }
    }

    /// Configuration this pipeline serves.
    #[must_use]
    pub fn configuration(&self) -> &ProjectConfiguration {
        &self.configuration
    }

    /// Queue a new snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::DataSourceClosed`] when the loop has stopped.
    pub async fn post(&self, snapshot: ProjectSnapshot) -> CheckResult<()> {
        let Some(tx) = &self.snapshot_tx else {
            return Err(CheckError::DataSourceClosed(self.configuration.to_string()));
        };
        tx.send(snapshot)
            .await
            .map_err(|_| CheckError::DataSourceClosed(self.configuration.to_string()))
    }

    /// Receiver for published states.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PublishedInput> {
        self.state_rx.clone()
    }

    /// Stop accepting snapshots and wait for queued ones to be applied.
    pub async fn close(&mut self) {
        drop(self.snapshot_tx.take());
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                warn!("Pipeline for {} ended abnormally: {}", self.configuration, e);
            }
        }
    }

    async fn run_message_loop(
        configuration: ProjectConfiguration,
        mut snapshot_rx: mpsc::Receiver<ProjectSnapshot>,
        state_tx: watch::Sender<PublishedInput>,
        persistence: Arc<dyn UpToDateCheckStatePersistence>,
        copy_items: Arc<CopyItemAggregator>,
    ) {
        debug!("Input pipeline for {} started", configuration);

        let mut state = Arc::new(ImplicitConfiguredInput::empty(configuration.clone()));
        let mut previous: Option<ProjectSnapshot> = None;
        let mut restore_attempted = false;

        while let Some(mut snapshot) = snapshot_rx.recv().await {
            // Versions start at 1 and only move forward.
            let last_version = previous.as_ref().map_or(0, |p| p.version);
            if snapshot.version <= last_version {
                debug!(
                    "Dropping snapshot version {} for {} (already at {})",
                    snapshot.version, configuration, last_version
                );
                continue;
            }
            snapshot.configuration = configuration.clone();

            let project_path = snapshot
                .rule(rules::CONFIGURATION_GENERAL)
                .property(properties::PROJECT_FULL_PATH)
                .map(native_path);

            // Restored state must be in place before the first derived state is published.
            if !restore_attempted {
                restore_attempted = true;
                if let Some(project) = &project_path {
                    match persistence.restore_state(project, &configuration).await {
                        Ok(Some(restored)) => state = Arc::new(state.with_restored_state(&restored)),
                        Ok(None) => {}
                        Err(e) => warn!("Failed to restore state for {}: {}", project.display(), e),
                    }
                }
            }

            let update = ProjectUpdate::diff(previous.as_ref(), &snapshot);
            let next = Arc::new(state.update(&update, Utc::now()));

            let item_state_changed = next.item_hash != state.item_hash
                || next.last_items_changed_at_utc != state.last_items_changed_at_utc;
            if let (true, Some(project), Some(hash)) = (item_state_changed, &project_path, &next.item_hash) {
                let changed_at = next.last_items_changed_at_utc.unwrap_or(DateTime::<Utc>::default());
                if let Err(e) = persistence
                    .store_state(project, &configuration, hash, changed_at)
                    .await
                {
                    warn!("Failed to store state for {}: {}", project.display(), e);
                }
            }

            copy_items.set_project_data(next.project_copy_data());

            debug!("Applied snapshot version {} for {}", next.version, configuration);
            state = next;
            previous = Some(snapshot);

            if state_tx.send(Some(Arc::clone(&state))).is_err() {
                debug!("No subscribers left for {}", configuration);
            }
        }

        debug!("Input pipeline for {} stopped", configuration);
    }
}

/// Joins the pipelines of every implicitly active configuration.
pub struct ConfiguredInputDataSource {
    pipelines: Vec<ConfiguredInputPipeline>,
}

impl ConfiguredInputDataSource {
    /// Spawn one pipeline per configuration, in the given order.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn new(
        configurations: Vec<ProjectConfiguration>,
        persistence: Arc<dyn UpToDateCheckStatePersistence>,
        copy_items: Arc<CopyItemAggregator>,
    ) -> Self {
        info!("Starting input pipelines for {} configurations", configurations.len());
        let pipelines = configurations
            .into_iter()
            .map(|configuration| {
                ConfiguredInputPipeline::spawn(configuration, Arc::clone(&persistence), Arc::clone(&copy_items))
            })
            .collect();
        Self { pipelines }
    }

    /// Configurations in check order.
    pub fn configurations(&self) -> impl Iterator<Item = &ProjectConfiguration> {
        self.pipelines.iter().map(ConfiguredInputPipeline::configuration)
    }

    /// Route `snapshot` to the pipeline of its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::InvalidProjectData`] for an unknown configuration
    /// and [`CheckError::DataSourceClosed`] when the pipeline has stopped.
    pub async fn post(&self, snapshot: ProjectSnapshot) -> CheckResult<()> {
        let pipeline = self
            .pipelines
            .iter()
            .find(|p| *p.configuration() == snapshot.configuration)
            .ok_or_else(|| {
                CheckError::InvalidProjectData(format!(
                    "No active configuration '{}'",
                    snapshot.configuration
                ))
            })?;
        pipeline.post(snapshot).await
    }

    /// Latest joint state, or `None` while any configuration has not published.
    #[must_use]
    pub fn current(&self) -> Option<UpToDateCheckConfiguredInput> {
        let implicit_inputs = self
            .pipelines
            .iter()
            .map(|p| p.state_rx.borrow().clone())
            .collect::<Option<Vec<_>>>()?;
        Some(UpToDateCheckConfiguredInput::new(implicit_inputs))
    }

    /// Suspend until every configuration has published at least once.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::Cancelled`] when `cancel` fires first and
    /// [`CheckError::DataSourceClosed`] when a pipeline stops without publishing.
    pub async fn wait_for_initial(&self, cancel: &CancellationToken) -> CheckResult<UpToDateCheckConfiguredInput> {
        self.wait_until(cancel, |_| true).await
    }

    /// Suspend until every configuration has applied `version` or later.
    ///
    /// # Errors
    ///
    /// Same as [`ConfiguredInputDataSource::wait_for_initial`].
    pub async fn wait_for_version(
        &self,
        version: u64,
        cancel: &CancellationToken,
    ) -> CheckResult<UpToDateCheckConfiguredInput> {
        self.wait_until(cancel, |state| state.version >= version).await
    }

    async fn wait_until(
        &self,
        cancel: &CancellationToken,
        ready: impl Fn(&ImplicitConfiguredInput) -> bool,
    ) -> CheckResult<UpToDateCheckConfiguredInput> {
        let mut implicit_inputs = Vec::with_capacity(self.pipelines.len());

        for pipeline in &self.pipelines {
            let mut rx = pipeline.subscribe();
            let published = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CheckError::Cancelled),
                published = rx.wait_for(|state| state.as_deref().is_some_and(&ready)) => published
                    .map_err(|_| CheckError::DataSourceClosed(pipeline.configuration().to_string()))?
                    .clone(),
            };
            if let Some(state) = published {
                implicit_inputs.push(state);
            }
        }

        Ok(UpToDateCheckConfiguredInput::new(implicit_inputs))
    }

    /// Stop every pipeline after draining queued snapshots.
    pub async fn close(&mut self) {
        for pipeline in &mut self.pipelines {
            pipeline.close().await;
        }
    }
}
