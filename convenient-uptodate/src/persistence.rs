//! Item state persisted across sessions
//!
//! Only two values survive a restart: the hash of the project's source item
//! set and when that set last changed. On the next session the restored hash
//! is compared with the freshly computed one, which reveals items added or
//! removed while the host was closed.

use crate::error::{CheckError, CheckResult};
use crate::input_state::RestoredState;
use crate::project_data::ProjectConfiguration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Storage for per-configuration item state.
#[async_trait]
pub trait UpToDateCheckStatePersistence: Send + Sync {
    /// State recorded for `project` in `configuration`, if any.
    async fn restore_state(
        &self,
        project: &Path,
        configuration: &ProjectConfiguration,
    ) -> CheckResult<Option<RestoredState>>;

    /// Record the item hash and last-changed time for `project` in `configuration`.
    async fn store_state(
        &self,
        project: &Path,
        configuration: &ProjectConfiguration,
        item_hash: &str,
        last_items_changed_at_utc: DateTime<Utc>,
    ) -> CheckResult<()>;
}

fn state_key(project: &Path, configuration: &ProjectConfiguration) -> String {
    let dimensions: Vec<String> = configuration
        .dimensions()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    format!("{}|{}", project.display(), dimensions.join(";"))
}

/// Keeps state for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct InMemoryStatePersistence {
    states: Mutex<HashMap<String, RestoredState>>,
}

impl InMemoryStatePersistence {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RestoredState>> {
        self.states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl UpToDateCheckStatePersistence for InMemoryStatePersistence {
    async fn restore_state(
        &self,
        project: &Path,
        configuration: &ProjectConfiguration,
    ) -> CheckResult<Option<RestoredState>> {
        Ok(self.lock().get(&state_key(project, configuration)).cloned())
    }

    async fn store_state(
        &self,
        project: &Path,
        configuration: &ProjectConfiguration,
        item_hash: &str,
        last_items_changed_at_utc: DateTime<Utc>,
    ) -> CheckResult<()> {
        let _ = self.lock().insert(
            state_key(project, configuration),
            RestoredState {
                item_hash: item_hash.to_string(),
                last_items_changed_at_utc,
            },
        );
        Ok(())
    }
}

/// Persists all configurations of all projects to one JSON file.
pub struct JsonStatePersistence {
    path: PathBuf,
    // None until first loaded from disk
    states: AsyncMutex<Option<HashMap<String, RestoredState>>>,
}

impl JsonStatePersistence {
    /// File name used inside the state directory.
    pub const FILE_NAME: &'static str = "fast-up-to-date-state.json";

    /// Store state in `state_dir`, which is created on first write.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(Self::FILE_NAME),
            states: AsyncMutex::new(None),
        }
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> CheckResult<HashMap<String, RestoredState>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!("No persisted up-to-date state at {}", self.path.display());
            return Ok(HashMap::new());
        }

        let json = tokio::fs::read_to_string(&self.path).await?;
        match serde_json::from_str(&json) {
            Ok(states) => Ok(states),
            Err(e) => {
                // A corrupt file only costs one conservative build.
                warn!("Ignoring unreadable state file {}: {}", self.path.display(), e);
                Ok(HashMap::new())
            }
        }
    }

    async fn save(&self, states: &HashMap<String, RestoredState>) -> CheckResult<()> {
        let json = serde_json::to_vec_pretty(states)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&path, &json))
            .await
            .map_err(|e| CheckError::Persistence(format!("State writer failed: {e}")))?
    }
}

#[async_trait]
impl UpToDateCheckStatePersistence for JsonStatePersistence {
    async fn restore_state(
        &self,
        project: &Path,
        configuration: &ProjectConfiguration,
    ) -> CheckResult<Option<RestoredState>> {
        let mut guard = self.states.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let restored = guard
            .as_ref()
            .and_then(|states| states.get(&state_key(project, configuration)).cloned());

        if restored.is_some() {
            info!("Restored up-to-date state for {} ({})", project.display(), configuration);
        }
        Ok(restored)
    }

    async fn store_state(
        &self,
        project: &Path,
        configuration: &ProjectConfiguration,
        item_hash: &str,
        last_items_changed_at_utc: DateTime<Utc>,
    ) -> CheckResult<()> {
        let mut guard = self.states.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let states = guard.get_or_insert_with(HashMap::new);

        let _ = states.insert(
            state_key(project, configuration),
            RestoredState {
                item_hash: item_hash.to_string(),
                last_items_changed_at_utc,
            },
        );
        self.save(states).await
    }
}

/// Write-fsync-rename so a crash never leaves a truncated state file.
fn atomic_write(path: &Path, data: &[u8]) -> CheckResult<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path)
        .map_err(|e| CheckError::Persistence(format!("Failed to create temp file: {e}")))?;
    file.write_all(data)
        .map_err(|e| CheckError::Persistence(format!("Failed to write state: {e}")))?;
    file.sync_all()
        .map_err(|e| CheckError::Persistence(format!("Failed to fsync state: {e}")))?;
    drop(file);

    std::fs::rename(&temp_path, path)
        .map_err(|e| CheckError::Persistence(format!("Failed to rename state file: {e}")))?;
    Ok(())
}
