//! The blob directory
//!
//! Every node version and every index snapshot is one immutable file. A
//! [`BlobStore`] wraps a [`BlobBackend`] (a local directory or memory) and
//! speaks in terms of sealed [`Entry`]s and parsed [`BlobBody`]s. The
//! naming scheme lives in [`codec`].

mod backend;
pub mod codec;

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

pub use backend::{BlobBackend, LocalBackend, MemoryBackend};
pub use codec::{BlobBody, BlobHeader, MAX_FILE_NAME_LEN, OVERFLOW_SUFFIX};

use crate::config::{BackendConfig, StoreConfig};
use crate::crypto::SessionError;
use crate::entry::Entry;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("blob i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("blob already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid blob name: {0}")]
    InvalidName(String),
    #[error("overflowed blob name without continuation: {0}")]
    MissingOverflow(String),
    #[error("blob name timestamp does not match its payload: {0}")]
    TimestampMismatch(String),
    #[error("malformed blob: {0}")]
    Malformed(String),
    #[error("entry is missing '{0}'")]
    IncompleteEntry(&'static str),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Handle on the blob directory
#[derive(Debug, Clone)]
pub struct BlobStore {
    backend: Arc<dyn BlobBackend>,
}

impl Deref for BlobStore {
    type Target = Arc<dyn BlobBackend>;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl BlobStore {
    pub fn new(backend: Arc<dyn BlobBackend>) -> Self {
        Self { backend }
    }

    /// A store over a local directory, created if missing
    pub async fn local(path: impl AsRef<Path>) -> Result<Self, BlobError> {
        Ok(Self::new(Arc::new(LocalBackend::open(path).await?)))
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub async fn from_config(config: &StoreConfig) -> Result<Self, BlobError> {
        match config.backend {
            BackendConfig::Local => Self::local(&config.data_dir).await,
            BackendConfig::Memory => Ok(Self::memory()),
        }
    }

    /// Blob file names, sorted, skipping anything containing `.`
    /// (reserved for bookkeeping files)
    pub async fn blob_names(&self) -> Result<Vec<String>, BlobError> {
        let mut names: Vec<String> = self
            .backend
            .list()
            .await?
            .into_iter()
            .filter(|name| !name.contains('.'))
            .collect();
        names.sort();
        Ok(names)
    }

    pub async fn read_body(&self, name: &str) -> Result<BlobBody, BlobError> {
        BlobBody::parse(&self.backend.read(name).await?)
    }

    /// Write a sealed entry (see [`codec::encrypt_entry`]) as a new blob,
    /// returning its file name
    pub async fn write_entry(&self, entry: &Entry) -> Result<String, BlobError> {
        let name = entry
            .encrypted_name()
            .ok_or(BlobError::IncompleteEntry("encryptedName"))?;
        if name.contains('.') || name.contains('/') {
            return Err(BlobError::InvalidName(name.to_string()));
        }
        let body = BlobBody {
            encrypted_content: entry.encrypted_content().map(str::to_string),
            extra_name: entry.extra_name().map(str::to_string),
        };
        self.backend.write_new(name, &body.to_bytes()).await?;
        tracing::debug!("BlobStore::write_entry wrote {}", name);
        Ok(name.to_string())
    }
}
