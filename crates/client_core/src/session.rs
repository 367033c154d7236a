//! On-disk cache for the remote client's session state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;

const SESSION_FILE: &str = "session.json";
const APP_DIR: &str = "item_list";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub installation_id: String,
}

impl SessionState {
    fn fresh() -> Self {
        Self {
            installation_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SESSION_FILE),
        }
    }

    /// Cache rooted at `state_dir`, falling back to the platform local data dir.
    pub fn resolve(state_dir: Option<&Path>) -> Result<Self, StoreError> {
        if let Some(dir) = state_dir {
            return Ok(Self::new(dir));
        }
        let base = dirs::data_local_dir().ok_or_else(|| {
            StoreError::Session("unable to resolve local app data dir".to_string())
        })?;
        Ok(Self::new(base.join(APP_DIR)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the cached session, replacing a missing or corrupt file with a fresh one.
    pub async fn load_or_create(&self) -> Result<SessionState, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => match serde_json::from_slice::<SessionState>(&raw) {
                Ok(state) if !state.installation_id.is_empty() => {
                    debug!(path = %self.path.display(), "session: loaded cached installation id");
                    return Ok(state);
                }
                Ok(_) => warn!(path = %self.path.display(), "session: empty installation id"),
                Err(error) => {
                    warn!(path = %self.path.display(), %error, "session: discarding corrupt cache")
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(StoreError::Session(format!(
                    "failed to read '{}': {error}",
                    self.path.display()
                )))
            }
        }

        let state = SessionState::fresh();
        self.store(&state).await?;
        Ok(state)
    }

    pub async fn store(&self, state: &SessionState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                StoreError::Session(format!(
                    "could not prepare session directory '{}': {err}",
                    parent.display()
                ))
            })?;
        }
        let raw = serde_json::to_vec_pretty(state)
            .map_err(|err| StoreError::Session(err.to_string()))?;
        tokio::fs::write(&self.path, raw).await.map_err(|err| {
            StoreError::Session(format!("failed to write '{}': {err}", self.path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_and_reuses_installation_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SessionCache::new(dir.path().join("nested"));

        let first = cache.load_or_create().await.expect("create");
        assert!(cache.path().exists());
        let second = cache.load_or_create().await.expect("reload");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn replaces_corrupt_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SessionCache::new(dir.path());
        tokio::fs::write(cache.path(), b"not json").await.expect("seed");

        let state = cache.load_or_create().await.expect("recover");
        assert!(!state.installation_id.is_empty());
        let stored: SessionState =
            serde_json::from_slice(&tokio::fs::read(cache.path()).await.expect("read"))
                .expect("valid json");
        assert_eq!(stored, state);
    }
}
