use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::atomic::write_private_file;
use super::errors::StorageError;
use super::models::CertificateRecord;

/// Persistence for the single certificate metadata record
#[async_trait]
pub trait CertificateRecordStore: Send + Sync {
    /// Whether a record has been saved before. A missing record is not an error.
    async fn exists(&self) -> Result<bool, StorageError>;

    async fn load(&self) -> Result<CertificateRecord, StorageError>;

    /// Replace the stored record. Readers see either the old or the new record.
    async fn save(&self, record: &CertificateRecord) -> Result<(), StorageError>;
}

/// Stores the record as pretty-printed JSON in a file readable only by its owner
pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CertificateRecordStore for FileRecordStore {
    async fn exists(&self) -> Result<bool, StorageError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn load(&self) -> Result<CertificateRecord, StorageError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        CertificateRecord::from_json(&content).map_err(|e| {
            StorageError::Parse(format!("{}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, record: &CertificateRecord) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_private_file(&path, &json))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;

        debug!("Saved certificate record to {}", self.path.display());
        Ok(())
    }
}
