use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use super::BlobError;

/// Flat, write-once key/value storage for blob files
///
/// Implementations never overwrite: [`BlobBackend::write_new`] on an existing
/// name fails with [`BlobError::AlreadyExists`].
#[async_trait]
pub trait BlobBackend: Send + Sync + Debug {
    /// Every file name in the store, in no particular order
    async fn list(&self) -> Result<Vec<String>, BlobError>;

    async fn read(&self, name: &str) -> Result<Vec<u8>, BlobError>;

    async fn write_new(&self, name: &str, data: &[u8]) -> Result<(), BlobError>;

    /// Remove a file. Removing a missing file is not an error.
    async fn delete(&self, name: &str) -> Result<(), BlobError>;

    async fn exists(&self, name: &str) -> Result<bool, BlobError>;
}

/// Blobs as plain files in one directory
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Open (creating if needed) the blob directory at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        tracing::debug!("LocalBackend::open at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[async_trait]
impl BlobBackend for LocalBackend {
    async fn list(&self) -> Result<Vec<String>, BlobError> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        match tokio::fs::read(self.path(name)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_new(&self, name: &str, data: &[u8]) -> Result<(), BlobError> {
        let path = self.path(name);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BlobError::AlreadyExists(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let written = match file.write_all(data).await {
            Ok(()) => file.sync_all().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => Ok(()),
            Err(e) => {
                drop(file);
                Err(remove_partial(&path, e).await)
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<(), BlobError> {
        match tokio::fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, BlobError> {
        Ok(tokio::fs::try_exists(self.path(name)).await?)
    }
}

/// Delete a file whose write failed half way, so no truncated blob is
/// left for the next load to find
async fn remove_partial(path: &Path, error: std::io::Error) -> BlobError {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::error!("cannot remove partial blob {:?}: {}", path, e);
    }
    error.into()
}

/// Blobs held in memory, for tests and throwaway stores
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn list(&self) -> Result<Vec<String>, BlobError> {
        Ok(self.files.lock().keys().cloned().collect())
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        self.files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(name.to_string()))
    }

    async fn write_new(&self, name: &str, data: &[u8]) -> Result<(), BlobError> {
        let mut files = self.files.lock();
        if files.contains_key(name) {
            return Err(BlobError::AlreadyExists(name.to_string()));
        }
        files.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), BlobError> {
        self.files.lock().remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, BlobError> {
        Ok(self.files.lock().contains_key(name))
    }
}
