//! The state module holds the [SessionStore] trait, which persists the state of every dispute
//! the validator takes part in, keyed by challenge handle.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::Address;
use rollup_validator_solvers::bisection::ChallengeState;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::sync::RwLock;

/// The [SessionStore] trait persists [ChallengeState]s keyed by their handle.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts or replaces the state stored under `state.handle`.
    async fn save(&self, state: &ChallengeState) -> Result<()>;

    /// Loads the state stored under `handle`.
    async fn load(&self, handle: Address) -> Result<Option<ChallengeState>>;

    /// Removes the state stored under `handle`. Removing an unknown handle is not an error.
    async fn remove(&self, handle: Address) -> Result<()>;

    /// Returns the handles of all stored states.
    async fn handles(&self) -> Result<Vec<Address>>;
}

/// A [SessionStore] that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Address, ChallengeState>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, state: &ChallengeState) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(state.handle, state.clone());
        Ok(())
    }

    async fn load(&self, handle: Address) -> Result<Option<ChallengeState>> {
        Ok(self.sessions.read().await.get(&handle).cloned())
    }

    async fn remove(&self, handle: Address) -> Result<()> {
        self.sessions.write().await.remove(&handle);
        Ok(())
    }

    async fn handles(&self) -> Result<Vec<Address>> {
        Ok(self.sessions.read().await.keys().copied().collect())
    }
}

/// A [SessionStore] that keeps one pretty-printed JSON file per handle in a directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Opens the store in `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| anyhow!("Failed to create session directory {}: {}", dir.display(), e))?;
        Ok(Self { dir })
    }

    fn path_of(&self, handle: Address) -> PathBuf {
        self.dir.join(format!("{:?}.json", handle))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, state: &ChallengeState) -> Result<()> {
        let path = self.path_of(state.handle);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_vec_pretty(state)?;

        // Write then rename, so a crash never leaves a truncated session behind.
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::trace!(target: "dispute-registry", "Persisted challenge {:?} to {}", state.handle, path.display());
        Ok(())
    }

    async fn load(&self, handle: Address) -> Result<Option<ChallengeState>> {
        match tokio::fs::read(self.path_of(handle)).await {
            Ok(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, handle: Address) -> Result<()> {
        match tokio::fs::remove_file(self.path_of(handle)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn handles(&self) -> Result<Vec<Address>> {
        let mut handles = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<Address>().ok())
            {
                Some(handle) => handles.push(handle),
                None => {
                    tracing::warn!(target: "dispute-registry", "Ignoring unexpected file {} in session directory", path.display());
                }
            }
        }
        Ok(handles)
    }
}
