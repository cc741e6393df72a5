use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

/// Errors of an [`ObjectStorage`] upload.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The key would escape the storage root or is empty.
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    /// Writing the object failed.
    #[error("failed to write object")]
    Io(#[from] io::Error),
}

/// Stores uploaded files by key.
#[async_trait]
pub trait ObjectStorage: Send + Sync + fmt::Debug {
    async fn upload(
        &self,
        key: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> Result<(), StorageError>;
}

/// Writes objects below a root directory, one file per key.
#[derive(Debug)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

        if key.is_empty() || key.ends_with('/') || !is_plain {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for FsStorage {
    async fn upload(
        &self,
        key: &str,
        _content_type: Option<&str>,
        data: Bytes,
    ) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, &data).await?;
        reel_log::trace!(key, size = data.len(), "stored object");
        Ok(())
    }
}

/// Drops every upload.
#[derive(Debug, Default)]
pub struct DiscardStorage;

#[async_trait]
impl ObjectStorage for DiscardStorage {
    async fn upload(
        &self,
        key: &str,
        _content_type: Option<&str>,
        data: Bytes,
    ) -> Result<(), StorageError> {
        reel_log::trace!(key, size = data.len(), "discarding object");
        Ok(())
    }
}
