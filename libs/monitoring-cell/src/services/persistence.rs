// =====================================================================================
// SNAPSHOT PERSISTENCE
// =====================================================================================

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::{MonitoringError, PersistedState};

/// Fixed storage identifier for the single persisted snapshot.
pub const STORAGE_KEY: &str = "api-monitoring-state";

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PersistenceError> for MonitoringError {
    fn from(err: PersistenceError) -> Self {
        MonitoringError::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing was saved yet.
    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError>;
    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError>;
}

/// JSON file `<dir>/api-monitoring-state.json`, replaced atomically on save.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", STORAGE_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no monitoring snapshot found");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let state: PersistedState = serde_json::from_slice(&raw)?;
        debug!(
            path = %self.path.display(),
            connectors = state.health.len(),
            alerts = state.alerts.len(),
            calls = state.call_log.len(),
            "monitoring snapshot loaded"
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "monitoring snapshot saved");
        Ok(())
    }
}

/// Keeps the serialized snapshot in memory; used when no snapshot directory is set.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    raw: RwLock<Option<String>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        match self.raw.read().await.as_deref() {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        let raw = serde_json::to_string(state)?;
        *self.raw.write().await = Some(raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        assert!(store.load().await.unwrap().is_none());
        assert!(store.path().ends_with("api-monitoring-state.json"));
    }

    #[tokio::test]
    async fn test_file_store_saves_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("nested"));
        let state = PersistedState {
            saved_at: Some(Utc::now()),
            ..PersistedState::default()
        };

        store.save(&state).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.saved_at, state.saved_at);
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        tokio::fs::write(store.path(), b"{not json").await.unwrap();
        assert_matches!(store.load().await, Err(PersistenceError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_missing_fields_default_on_load() {
        let store = InMemorySnapshotStore::new();
        *store.raw.write().await = Some("{}".to_string());
        let state = store.load().await.unwrap().unwrap();
        assert!(state.health.is_empty());
        assert!(state.call_log.is_empty());
    }
}
