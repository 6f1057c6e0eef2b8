//! JSON persistence in the `.storage/` directory
//!
//! Every file is wrapped in a versioned envelope:
//!
//! ```json
//! { "version": 1, "minor_version": 1, "key": "core.config_entries", "data": { ... } }
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Versioned storage envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

/// Handle on `<config_dir>/.storage/`
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Load a storage file, `None` if it does not exist yet
    pub async fn load<T>(&self, key: &str) -> StorageResult<Option<StorageFile<T>>>
    where
        T: DeserializeOwned,
    {
        let path = self.file_path(key);
        if !path.exists() {
            debug!("Storage file not found: {}", key);
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let storage_file: StorageFile<T> = serde_json::from_str(&content)?;

        debug!(
            "Loaded storage file: {} (v{}.{})",
            key, storage_file.version, storage_file.minor_version
        );
        Ok(Some(storage_file))
    }

    /// Save a storage file, writing to a temp file and renaming it into place
    pub async fn save<T>(&self, storage_file: &StorageFile<T>) -> StorageResult<()>
    where
        T: Serialize,
    {
        if !self.storage_dir.exists() {
            fs::create_dir_all(&self.storage_dir).await?;
        }

        let path = self.file_path(&storage_file.key);
        let temp_path = self.file_path(&format!("{}.tmp", storage_file.key));

        let content = serde_json::to_string_pretty(storage_file)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!("Saved storage file: {}", storage_file.key);
        Ok(())
    }
}
