//! JSON file storage.

use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::traits::{PersistedDocument, STATE_VERSION};
use super::{StateStorage, StorageError, StorageResult};
use crate::store::PersistedState;

/// Default file name for the persisted document.
pub const DEFAULT_FILE_NAME: &str = "helios-storage.json";

/// Stores the persisted slices as one JSON document on the local filesystem.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at `<dir>/helios-storage.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(DEFAULT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_FILE_NAME.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStorage for JsonFileStorage {
    async fn load(&self) -> StorageResult<Option<PersistedState>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let document: PersistedDocument = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Corrupt(format!("{}: {e}", self.path.display())))?;

        if document.version > STATE_VERSION {
            return Err(StorageError::UnsupportedVersion {
                found: document.version,
                supported: STATE_VERSION,
            });
        }

        debug!("Loaded state from {}", self.path.display());
        Ok(Some(document.state))
    }

    async fn save(&self, state: &PersistedState) -> StorageResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(&PersistedDocument::new(state.clone()))?;
        let temp = self.temp_path();
        fs::write(&temp, &body).await?;
        fs::rename(&temp, &self.path).await?;
        debug!("Wrote {} bytes to {}", body.len(), self.path.display());
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
