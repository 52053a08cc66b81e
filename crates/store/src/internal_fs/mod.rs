//! The storage orchestrator
//!
//! [`InternalFs`] drives every mutation through the same protocol:
//!
//! 1. seal the entry and write a new blob (never overwriting)
//! 2. mutate the tree, keeping the [`Undo`] record
//! 3. write a fresh index snapshot
//!
//! If step 3 fails the tree mutations are undone and the blobs written in
//! step 1 are deleted, so a failed operation leaves nothing referenced and
//! nothing dangling. A [`SaveScope`] stretches step 3 over several
//! operations.

mod ops;
mod path;
mod scope;

use std::sync::Arc;

pub use ops::RemoveOptions;
pub use path::{has_wildcard, normalize, split_last};
pub use scope::SaveScope;

use crate::blobs::{codec, BlobError, BlobStore};
use crate::config::{ConfigError, StoreConfig};
use crate::crypto::{random_string, KeyProvider, Timestamp, ID_LENGTH};
use crate::entry::{Entry, EntryError, NodeType};
use crate::tree::{SnapshotRef, Tree, TreeError, TreeStatus, Undo, Version, TRASH_ID};

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("path already exists: {0}")]
    AlreadyExists(String),
    #[error("entry already has an id: {0}")]
    EntryHasId(String),
    #[error("entry is missing '{0}'")]
    IncompleteEntry(&'static str),
    #[error("intermediate directories do not exist: {0}")]
    MissingIntermediate(String),
    #[error("blob name collision: {0}")]
    NameCollision(String),
    #[error("name is too long ({0} characters)")]
    NameTooLong(usize),
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("cannot move '{from}' to '{to}': destination is inside source")]
    MoveIntoSelf { from: String, to: String },
    #[error("wildcards cannot be combined with versions: {0}")]
    WildcardWithVersions(String),
    #[error("reserved node cannot be changed: {0}")]
    ReservedNode(String),
    #[error("no such version: {0}")]
    InvalidVersion(Timestamp),
    #[error("no versions named for {0}")]
    NoVersions(String),
    #[error("tree is not loaded")]
    NotLoaded,
    #[error("tree is broken, refusing to change it")]
    TreeBroken,
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),
    #[error("blob error: {0}")]
    Blob(#[from] BlobError),
    #[error("entry error: {0}")]
    Entry(#[from] EntryError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Tree mutations and blobs awaiting a snapshot
#[derive(Debug, Default)]
pub(crate) struct Pending {
    undo: Vec<Undo>,
    written: Vec<String>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.undo.is_empty() && self.written.is_empty()
    }

    fn extend(&mut self, other: Pending) {
        self.undo.extend(other.undo);
        self.written.extend(other.written);
    }
}

#[derive(Debug)]
pub struct InternalFs {
    tree: Tree,
    config: StoreConfig,
    working_node: String,
    // changes not yet covered by a snapshot
    dirty: bool,
    scope: Option<Pending>,
}

impl InternalFs {
    pub fn new(blobs: BlobStore, keys: Arc<dyn KeyProvider>, config: StoreConfig) -> Self {
        let tree = Tree::new(blobs, keys);
        let working_node = tree.root_id().to_string();
        Self {
            tree,
            config,
            working_node,
            dirty: false,
            scope: None,
        }
    }

    /// Open the store described by `config` and load it
    pub async fn open(config: StoreConfig, keys: Arc<dyn KeyProvider>) -> Result<Self, FsError> {
        config.validate()?;
        let blobs = BlobStore::from_config(&config).await?;
        let mut fs = Self::new(blobs, keys, config);
        fs.init().await?;
        Ok(fs)
    }

    /// Load the tree. When loading had to recover anything, a fresh
    /// snapshot is written right away so the next load is clean.
    /// Calling it again once loaded does nothing.
    pub async fn init(&mut self) -> Result<(), FsError> {
        if self.tree.status() == TreeStatus::Loaded {
            return Ok(());
        }
        match self.tree.load().await {
            Ok(()) => {}
            Err(TreeError::Broken(reason)) => {
                tracing::error!("InternalFs::init: {}", reason);
                return Err(FsError::TreeBroken);
            }
            Err(e) => return Err(e.into()),
        }
        self.working_node = self.tree.root_id().to_string();

        if self.tree.is_stale() {
            tracing::info!(
                "InternalFs::init: checkpointing after {} alert(s) and {} warning(s)",
                self.tree.alerts().len(),
                self.tree.warnings().len()
            );
            self.save_tree().await?;
        }
        Ok(())
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn blobs(&self) -> &BlobStore {
        self.tree.blobs()
    }

    fn keys(&self) -> &dyn KeyProvider {
        self.tree.keys().as_ref()
    }

    /// Whether there are changes no snapshot covers yet
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn ensure_writable(&self) -> Result<(), FsError> {
        match self.tree.status() {
            TreeStatus::Loaded => Ok(()),
            TreeStatus::Broken => Err(FsError::TreeBroken),
            TreeStatus::Unloaded => Err(FsError::NotLoaded),
        }
    }

    fn validate_name(&self, name: &str) -> Result<(), FsError> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(FsError::InvalidName(name.to_string()));
        }
        let chars = name.chars().count();
        if chars > self.config.max_segment_len {
            return Err(FsError::NameTooLong(chars));
        }
        Ok(())
    }

    /// Fail unless `parent` is a container without a child called `name`
    /// (other than `except`)
    fn check_slot(&self, parent: &str, name: &str, except: Option<&str>) -> Result<(), FsError> {
        let node = self
            .tree
            .find_by_id(parent)
            .ok_or_else(|| FsError::PathNotFound(parent.to_string()))?;
        let parent_path = self.tree.path_of(parent).unwrap_or_default();
        if !node.kind().is_container() {
            return Err(FsError::NotADirectory(parent_path));
        }
        if let Some(existing) = self.tree.child_by_name(parent, name) {
            if Some(existing.id()) != except {
                return Err(FsError::AlreadyExists(path::join(&parent_path, name)));
            }
        }
        Ok(())
    }

    async fn write_blob(&self, sealed: &Entry) -> Result<String, FsError> {
        match self.blobs().write_entry(sealed).await {
            Ok(name) => Ok(name),
            Err(BlobError::AlreadyExists(name)) => Err(FsError::NameCollision(name)),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a node under `parent` from an entry without an id
    pub async fn add(&mut self, parent: &str, entry: Entry) -> Result<Entry, FsError> {
        self.ensure_writable()?;
        if let Some(id) = entry.id() {
            return Err(FsError::EntryHasId(id.to_string()));
        }
        let kind = entry.kind().ok_or(FsError::IncompleteEntry("type"))?;
        if kind == NodeType::Root {
            return Err(FsError::ReservedNode("root".to_string()));
        }
        let name = entry.name().ok_or(FsError::IncompleteEntry("name"))?;
        self.validate_name(name)?;
        self.check_slot(parent, name, None)?;

        let mut entry = entry;
        entry.set_id(self.tree.new_id());
        entry.set_parent(Some(parent.to_string()));
        if kind.is_container() {
            entry.set_content(None);
        }
        let sealed = codec::encrypt_entry(&entry, self.keys())?;
        let file_name = self.write_blob(&sealed).await?;
        let version = Version {
            file_name: file_name.clone(),
            ts: sealed.ts().unwrap_or_default(),
            name: sealed.name().unwrap_or_default().to_string(),
            parent: Some(parent.to_string()),
        };

        let id = sealed.id().unwrap_or_default().to_string();
        let undo = match self.tree.insert(&id, kind, parent, version) {
            Ok(undo) => undo,
            Err(e) => {
                self.discard_blob(&file_name).await;
                return Err(e.into());
            }
        };
        tracing::debug!("InternalFs::add {}", self.tree.path_of(&id).unwrap_or_default());

        self.settle(Pending {
            undo: vec![undo],
            written: vec![file_name],
        })
        .await?;
        Ok(sealed)
    }

    /// Write a new version of a node.
    ///
    /// `name` and `parent` in the entry rename or move the node. Without
    /// `content`, a file keeps its current content only when the entry
    /// sets `preserveContent`.
    pub async fn update(&mut self, id: &str, entry: Entry) -> Result<Entry, FsError> {
        self.ensure_writable()?;
        let node = self
            .tree
            .find_by_id(id)
            .ok_or_else(|| FsError::PathNotFound(id.to_string()))?;
        if node.is_reserved() {
            return Err(FsError::ReservedNode(node.name().to_string()));
        }
        let kind = node.kind();
        let current_parent = node.parent().map(str::to_string);
        let name = entry.name().unwrap_or(node.name()).to_string();
        let parent = entry
            .parent()
            .map(str::to_string)
            .or_else(|| current_parent.clone())
            .ok_or_else(|| FsError::ReservedNode(id.to_string()))?;
        let latest_file = node.latest().map(|version| version.file_name.clone());

        self.validate_name(&name)?;
        if current_parent.as_deref() != Some(parent.as_str())
            && self.tree.is_within(&parent, TRASH_ID)
        {
            return Err(FsError::ReservedNode(
                self.tree.path_of(&parent).unwrap_or_default(),
            ));
        }
        if self.tree.is_within(&parent, id) {
            return Err(FsError::MoveIntoSelf {
                from: self.tree.path_of(id).unwrap_or_default(),
                to: self.tree.path_of(&parent).unwrap_or_default(),
            });
        }
        self.check_slot(&parent, &name, Some(id))?;

        let content = match entry.content() {
            Some(content) if kind.is_file() => Some(content.to_string()),
            None if kind.is_file() && entry.preserve_content() => match latest_file {
                Some(file_name) => self.read_content(&file_name).await?,
                None => None,
            },
            _ => None,
        };

        let mut next = Entry::new(kind).with_name(name).with_parent(parent.clone());
        next.set_id(id);
        next.set_content(content);
        let sealed = codec::encrypt_entry(&next, self.keys())?;
        let file_name = self.write_blob(&sealed).await?;
        let version = Version {
            file_name: file_name.clone(),
            ts: sealed.ts().unwrap_or_default(),
            name: sealed.name().unwrap_or_default().to_string(),
            parent: Some(parent.clone()),
        };

        let undo = match self.tree.add_version(id, version, Some(&parent)) {
            Ok(undo) => undo,
            Err(e) => {
                self.discard_blob(&file_name).await;
                return Err(e.into());
            }
        };
        tracing::debug!("InternalFs::update {}", self.tree.path_of(id).unwrap_or_default());

        self.settle(Pending {
            undo: vec![undo],
            written: vec![file_name],
        })
        .await?;
        Ok(sealed)
    }

    /// Decrypted content of a version blob
    pub(crate) async fn read_content(&self, file_name: &str) -> Result<Option<String>, FsError> {
        let body = self.blobs().read_body(file_name).await?;
        match body.encrypted_content {
            Some(encrypted) => Ok(Some(codec::decrypt_content(&encrypted, self.keys())?)),
            None => Ok(None),
        }
    }

    /// Serialize the tree into a new index snapshot blob and apply the
    /// retention policy. Returns the snapshot's file name.
    pub async fn save_tree(&mut self) -> Result<String, FsError> {
        let index = self.tree.to_index().encode()?;
        let mut entry = Entry::new(NodeType::Root)
            .with_name(random_string(ID_LENGTH))
            .with_content(index);
        entry.set_id(self.tree.root_id());
        let sealed = codec::encrypt_entry(&entry, self.keys())?;
        let file_name = self.write_blob(&sealed).await?;

        self.tree.record_snapshot(SnapshotRef {
            ts: sealed.ts().unwrap_or_default(),
            file_name: file_name.clone(),
        });
        self.dirty = false;
        tracing::debug!("InternalFs::save_tree wrote {}", file_name);

        self.apply_retention().await;
        Ok(file_name)
    }

    async fn apply_retention(&mut self) {
        let Some(limit) = self.config.retention.limit() else {
            return;
        };
        let expired: Vec<String> = self
            .tree
            .snapshots()
            .iter()
            .skip(limit)
            .map(|snapshot| snapshot.file_name.clone())
            .collect();
        for file_name in expired {
            match self.blobs().delete(&file_name).await {
                Ok(()) => {
                    tracing::debug!("InternalFs::apply_retention deleted {}", file_name);
                    self.tree.forget_snapshot(&file_name);
                }
                Err(e) => tracing::warn!("cannot delete old snapshot {}: {}", file_name, e),
            }
        }
    }

    /// Snapshot the changes of one operation, or park them in the open
    /// scope. On snapshot failure the changes are rolled back.
    async fn settle(&mut self, pending: Pending) -> Result<(), FsError> {
        if let Some(scope) = self.scope.as_mut() {
            scope.extend(pending);
            self.dirty = true;
            return Ok(());
        }
        let was_dirty = self.dirty;
        self.dirty = true;
        match self.save_tree().await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("InternalFs: snapshot failed, rolling back: {}", e);
                self.rollback(pending).await;
                self.dirty = was_dirty;
                Err(e)
            }
        }
    }

    pub(crate) async fn rollback(&mut self, pending: Pending) {
        for undo in pending.undo.into_iter().rev() {
            if let Err(e) = self.tree.undo(undo) {
                tracing::error!("InternalFs::rollback: cannot undo: {}", e);
            }
        }
        for file_name in pending.written {
            self.discard_blob(&file_name).await;
        }
    }

    async fn discard_blob(&self, file_name: &str) {
        match self.blobs().delete(file_name).await {
            Ok(()) => tracing::debug!("InternalFs: deleted unreferenced blob {}", file_name),
            Err(e) => tracing::error!("InternalFs: cannot delete blob {}: {}", file_name, e),
        }
    }
}
