//! Shared test utilities for store integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use store::blobs::{BlobBackend, BlobError, BlobStore, LocalBackend};
use store::config::StoreConfig;
use store::crypto::Session;
use store::entry::{Entry, NodeType};
use store::internal_fs::InternalFs;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Set up a test environment with a freshly initialized store on disk
pub async fn setup_test_env() -> (InternalFs, BlobStore, Arc<Session>, TempDir) {
    setup_with_config(|_| {}).await
}

/// Like [`setup_test_env`], letting the caller adjust the config first
pub async fn setup_with_config(
    adjust: impl FnOnce(&mut StoreConfig),
) -> (InternalFs, BlobStore, Arc<Session>, TempDir) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let mut config = StoreConfig::with_data_dir(temp_dir.path().join("data"));
    adjust(&mut config);

    let session = Arc::new(Session::generate().unwrap());
    let blobs = BlobStore::local(&config.data_dir).await.unwrap();

    let mut fs = InternalFs::new(blobs.clone(), session.clone(), config);
    fs.init().await.unwrap();

    (fs, blobs, session, temp_dir)
}

/// Load the same blob directory again, as a new process would
pub async fn reopen(fs: &InternalFs, session: &Arc<Session>) -> InternalFs {
    let mut reopened = InternalFs::new(fs.blobs().clone(), session.clone(), fs.config().clone());
    reopened.init().await.unwrap();
    reopened
}

/// Create a text file with `content` at `path`, adding missing directories
pub async fn write_text(fs: &mut InternalFs, path: &str, content: &str) -> Entry {
    fs.make(path, NodeType::Text, Some(content.to_string()))
        .await
        .unwrap()
}

pub async fn make_dir(fs: &mut InternalFs, path: &str) -> Entry {
    fs.make(path, NodeType::Dir, None).await.unwrap()
}

/// Blob file names currently on disk
pub fn blob_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|item| item.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Index snapshot blobs carry the root type digit
pub fn snapshot_files(dir: &Path) -> Vec<String> {
    blob_files(dir)
        .into_iter()
        .filter(|name| name.starts_with('0'))
        .collect()
}

/// Move the named blobs from `from` into `to`
pub fn move_blobs(names: &[String], from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for name in names {
        std::fs::rename(from.join(name), to.join(name)).unwrap();
    }
}

/// A local backend that can be told to refuse index snapshot writes
#[derive(Debug)]
pub struct FaultyBackend {
    inner: LocalBackend,
    fail_snapshots: AtomicBool,
}

impl FaultyBackend {
    pub async fn open(root: impl AsRef<Path>) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalBackend::open(root).await.unwrap(),
            fail_snapshots: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> PathBuf {
        self.inner.root().to_path_buf()
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobBackend for FaultyBackend {
    async fn list(&self) -> Result<Vec<String>, BlobError> {
        self.inner.list().await
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        self.inner.read(name).await
    }

    async fn write_new(&self, name: &str, data: &[u8]) -> Result<(), BlobError> {
        if self.fail_snapshots.load(Ordering::SeqCst) && name.starts_with('0') {
            return Err(BlobError::Io(std::io::Error::other("injected write failure")));
        }
        self.inner.write_new(name, data).await
    }

    async fn delete(&self, name: &str) -> Result<(), BlobError> {
        self.inner.delete(name).await
    }

    async fn exists(&self, name: &str) -> Result<bool, BlobError> {
        self.inner.exists(name).await
    }
}

/// A store whose snapshot writes can be made to fail
pub async fn setup_faulty_env() -> (InternalFs, Arc<FaultyBackend>, TempDir) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig::with_data_dir(temp_dir.path().join("data"));
    let backend = FaultyBackend::open(&config.data_dir).await;
    let session = Arc::new(Session::generate().unwrap());

    let mut fs = InternalFs::new(BlobStore::new(backend.clone()), session, config);
    fs.init().await.unwrap();

    (fs, backend, temp_dir)
}
