use glob::Pattern;

use crate::blobs::codec;
use crate::crypto::Timestamp;
use crate::entry::{Entry, NodeType};
use crate::tree::{RemovedEntry, TreeError, TRASH_ID};

use super::path::{has_wildcard, split_last};
use super::{FsError, InternalFs, Pending};

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Target path; the last segment may be a glob pattern
    pub path: String,
    /// Remove only these versions of the target
    pub versions: Option<Vec<Timestamp>>,
}

impl RemoveOptions {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            versions: None,
        }
    }

    pub fn with_versions(mut self, versions: Vec<Timestamp>) -> Self {
        self.versions = Some(versions);
        self
    }
}

impl InternalFs {
    /// Soft delete into the trash, all targets in one snapshot
    pub async fn remove(&mut self, options: RemoveOptions) -> Result<Vec<RemovedEntry>, FsError> {
        self.ensure_writable()?;
        let normalized = self.normalize_path(&options.path)?;
        if options.versions.as_ref().is_some_and(Vec::is_empty) {
            return Err(FsError::NoVersions(normalized));
        }
        let targets = self.remove_targets(&normalized, options.versions.is_some())?;

        let mut pending = Pending::default();
        let mut removed = Vec::with_capacity(targets.len());
        for id in targets {
            match self.tree.remove(&id, options.versions.as_deref()) {
                Ok((entry, undo)) => {
                    removed.push(entry);
                    pending.undo.push(undo);
                }
                Err(e) => {
                    self.rollback(pending).await;
                    return Err(match e {
                        TreeError::InvalidVersion { ts, .. } => FsError::InvalidVersion(ts),
                        TreeError::Reserved(id) => FsError::ReservedNode(id),
                        e => e.into(),
                    });
                }
            }
        }
        tracing::debug!("InternalFs::remove: {} target(s) under {}", removed.len(), normalized);

        self.settle(pending).await?;
        Ok(removed)
    }

    fn remove_targets(&self, normalized: &str, with_versions: bool) -> Result<Vec<String>, FsError> {
        let (parent_path, last) = split_last(normalized);
        let Some(last) = last else {
            return Err(FsError::ReservedNode("/".to_string()));
        };

        // a literal name wins over reading it as a pattern
        if let Some(node) = self.tree.resolve(normalized) {
            if node.is_reserved() {
                return Err(FsError::ReservedNode(normalized.to_string()));
            }
            return Ok(vec![node.id().to_string()]);
        }
        if !has_wildcard(&last) {
            return Err(FsError::PathNotFound(normalized.to_string()));
        }

        if with_versions {
            return Err(FsError::WildcardWithVersions(normalized.to_string()));
        }
        let pattern =
            Pattern::new(&last).map_err(|e| FsError::InvalidName(format!("{}: {}", last, e)))?;
        let parent = self
            .tree
            .resolve(&parent_path)
            .ok_or_else(|| FsError::PathNotFound(parent_path.clone()))?;
        let targets: Vec<String> = self
            .tree
            .children_of(parent.id())
            .into_iter()
            .filter(|child| child.id() != TRASH_ID)
            .filter(|child| pattern.matches(child.name()))
            .map(|child| child.id().to_string())
            .collect();
        if targets.is_empty() {
            return Err(FsError::PathNotFound(normalized.to_string()));
        }
        Ok(targets)
    }

    /// Create `path`, adding any missing intermediate directories.
    /// Content is ignored for directories.
    pub async fn make(
        &mut self,
        path: &str,
        kind: NodeType,
        content: Option<String>,
    ) -> Result<Entry, FsError> {
        self.ensure_writable()?;
        let normalized = self.normalize_path(path)?;
        let (ancestor, remaining) = self.tree.resolve_partial(&normalized);
        let Some((last, intermediate)) = remaining.split_last() else {
            return Err(FsError::AlreadyExists(normalized));
        };

        let mut scope = self.begin();
        let mut parent = ancestor;
        for segment in intermediate {
            match scope.add(&parent, Entry::new(NodeType::Dir).with_name(segment.as_str())).await {
                Ok(dir) => parent = dir.id().unwrap_or_default().to_string(),
                Err(e) => {
                    scope.abort().await;
                    return Err(e);
                }
            }
        }

        let mut entry = Entry::new(kind).with_name(last.as_str());
        entry.set_content(content);
        let made = match scope.add(&parent, entry).await {
            Ok(made) => made,
            Err(e) => {
                scope.abort().await;
                return Err(e);
            }
        };
        scope.commit().await?;
        Ok(made)
    }

    /// Rename, move, and/or rewrite the node at `path`.
    ///
    /// `new_path` naming an existing directory moves the node into it.
    /// Otherwise every directory above `new_path` must already exist.
    /// Moving into the trash is refused; use [`InternalFs::remove`].
    pub async fn change(
        &mut self,
        path: &str,
        new_path: Option<&str>,
        content: Option<String>,
    ) -> Result<Entry, FsError> {
        self.ensure_writable()?;
        let source = self.resolve(path)?;
        if source.is_reserved() {
            return Err(FsError::ReservedNode(self.normalize_path(path)?));
        }
        let id = source.id().to_string();
        let source_name = source.name().to_string();

        let mut entry = Entry::default();
        if let Some(new_path) = new_path {
            let normalized = self.normalize_path(new_path)?;
            let (ancestor, remaining) = self.tree.resolve_partial(&normalized);
            let (parent, name) = match remaining.as_slice() {
                [] => {
                    let target = self
                        .tree
                        .find_by_id(&ancestor)
                        .ok_or_else(|| FsError::PathNotFound(normalized.clone()))?;
                    if target.id() == id {
                        (target.parent().unwrap_or_default().to_string(), source_name)
                    } else if target.kind().is_container() {
                        (ancestor.clone(), source_name)
                    } else {
                        return Err(FsError::AlreadyExists(normalized));
                    }
                }
                [name] => (ancestor.clone(), name.clone()),
                _ => return Err(FsError::MissingIntermediate(normalized)),
            };
            entry.set_parent(Some(parent));
            entry.set_name(name);
        }
        match content {
            Some(content) => entry.set_content(Some(content)),
            None => entry.set_preserve_content(true),
        }
        self.update(&id, entry).await
    }

    /// Decrypted name and content of a node's version (latest by default)
    pub async fn entry_details(
        &self,
        id: &str,
        version: Option<Timestamp>,
    ) -> Result<Entry, FsError> {
        let node = self
            .tree
            .find_by_id(id)
            .ok_or_else(|| FsError::PathNotFound(id.to_string()))?;
        let version = match version {
            Some(ts) => node.version_at(ts).ok_or(FsError::InvalidVersion(ts))?,
            None => match node.latest() {
                Some(latest) => latest,
                None => return Ok(self.describe(node)),
            },
        };

        let body = self.blobs().read_body(&version.file_name).await?;
        let header = codec::decrypt_name(
            &version.file_name,
            body.extra_name.as_deref(),
            self.keys(),
        )?;
        let mut entry = header.to_entry();
        entry.set_kind(node.kind());
        entry.set_extra_name(body.extra_name);
        if let Some(encrypted) = body.encrypted_content {
            entry.set_content(Some(codec::decrypt_content(&encrypted, self.keys())?));
            entry.set_encrypted_content(Some(encrypted));
        }
        Ok(entry)
    }

    /// [`InternalFs::entry_details`] by path
    pub async fn cat(&self, path: &str, version: Option<Timestamp>) -> Result<Entry, FsError> {
        let id = self.resolve(path)?.id().to_string();
        self.entry_details(&id, version).await
    }

    /// Version timestamps of the node at `path`, newest first
    pub fn versions(&self, path: &str) -> Result<Vec<Timestamp>, FsError> {
        Ok(self.resolve(path)?.timestamps())
    }

    /// Whether a blob with this file name exists
    pub async fn file_exists(&self, file_name: &str) -> Result<bool, FsError> {
        Ok(self.blobs().exists(file_name).await?)
    }
}
