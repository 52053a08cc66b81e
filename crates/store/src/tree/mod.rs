//! The in-memory node graph
//!
//! A [`Tree`] is an arena of [`Node`]s keyed by id. Parent links are plain
//! ids, so the graph has no ownership cycles. The tree is rebuilt from the
//! blob directory by [`Tree::load`] and serialized back into an
//! [`IndexSnapshot`] by [`Tree::to_index`].
//!
//! Mutating methods return [`Undo`] records. The orchestrator keeps them
//! until the next snapshot write succeeds and replays them in reverse with
//! [`Tree::undo`] when it fails.

mod index;
mod load;
mod node;

use std::collections::HashMap;
use std::sync::Arc;

pub use index::{IndexNode, IndexSnapshot, INDEX_VERSION};
pub use node::{Node, Version, TRASH_ID, TRASH_NAME};

use crate::blobs::{BlobError, BlobStore};
use crate::crypto::{random_id, random_string, KeyProvider, Timestamp, ID_LENGTH};
use crate::entry::NodeType;

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("tree error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("blob error: {0}")]
    Blob(#[from] BlobError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported index version: {0}")]
    UnsupportedIndexVersion(u32),
    #[error("tree is broken: {0}")]
    Broken(String),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("reserved node cannot be changed: {0}")]
    Reserved(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("node {id} has no version {ts}")]
    InvalidVersion { id: String, ts: Timestamp },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeStatus {
    Unloaded,
    Loaded,
    Broken,
}

/// Reference to an index snapshot blob
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotRef {
    pub ts: Timestamp,
    pub file_name: String,
}

/// What `remove` took out of the live tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedEntry {
    /// Id of the node now sitting in the trash
    pub id: String,
    pub kind: NodeType,
    pub name: String,
    /// Path before removal
    pub path: String,
    /// Removed version timestamps, newest first
    pub versions: Vec<Timestamp>,
}

/// Inverse of one tree mutation
#[derive(Debug, Clone)]
pub enum Undo {
    Inserted {
        id: String,
    },
    VersionAdded {
        id: String,
        file_name: String,
        previous_parent: Option<String>,
    },
    Moved {
        id: String,
        from: String,
    },
    VersionsSplit {
        source: String,
        split: String,
    },
}

#[derive(Debug)]
pub struct Tree {
    blobs: BlobStore,
    keys: Arc<dyn KeyProvider>,
    status: TreeStatus,
    root_id: String,
    nodes: HashMap<String, Node>,
    alerts: Vec<String>,
    warnings: Vec<String>,
    // graph differs from the snapshot it was loaded from
    stale: bool,
    // newest first
    snapshots: Vec<SnapshotRef>,
}

impl Tree {
    pub fn new(blobs: BlobStore, keys: Arc<dyn KeyProvider>) -> Self {
        let mut tree = Self {
            blobs,
            keys,
            status: TreeStatus::Unloaded,
            root_id: String::new(),
            nodes: HashMap::new(),
            alerts: Vec::new(),
            warnings: Vec::new(),
            stale: false,
            snapshots: Vec::new(),
        };
        tree.reset(random_string(ID_LENGTH));
        tree
    }

    /// Drop every node and start over with just a root and the trash
    fn reset(&mut self, root_id: String) {
        self.nodes.clear();
        let mut root = Node::new(root_id.clone(), NodeType::Root, None);
        root.children.insert(TRASH_ID.to_string());
        self.nodes.insert(
            TRASH_ID.to_string(),
            Node::new(TRASH_ID, NodeType::Dir, Some(root_id.clone())),
        );
        self.nodes.insert(root_id.clone(), root);
        self.root_id = root_id;
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn keys(&self) -> &Arc<dyn KeyProvider> {
        &self.keys
    }

    pub fn status(&self) -> TreeStatus {
        self.status
    }

    /// Paths recovered by inference during load, in discovery order
    pub fn alerts(&self) -> &[String] {
        &self.alerts
    }

    /// Corruption warnings collected during load
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Whether loading placed, moved or dropped anything, so that the
    /// newest snapshot no longer describes the graph. Cleared by
    /// [`Tree::record_snapshot`].
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Known index snapshots, newest first
    pub fn snapshots(&self) -> &[SnapshotRef] {
        &self.snapshots
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn root(&self) -> &Node {
        // the root is never removed from the arena
        &self.nodes[&self.root_id]
    }

    pub fn trash(&self) -> &Node {
        &self.nodes[TRASH_ID]
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // root and trash are always present
        self.nodes.len() <= 2
    }

    /// A random id not used by any node
    pub fn new_id(&self) -> String {
        loop {
            let id = random_id();
            if !self.nodes.contains_key(&id) {
                return id;
            }
        }
    }

    /// Timestamps of a node's versions, newest first
    pub fn versions(&self, id: &str) -> Result<Vec<Timestamp>, TreeError> {
        Ok(self.node(id)?.timestamps())
    }

    fn node(&self, id: &str) -> Result<&Node, TreeError> {
        self.nodes
            .get(id)
            .ok_or_else(|| TreeError::NodeNotFound(id.to_string()))
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, TreeError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| TreeError::NodeNotFound(id.to_string()))
    }

    /* Paths */

    /// Absolute path of a node, `/` for the root
    pub fn path_of(&self, id: &str) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = self.nodes.get(id)?;
        while let Some(parent) = current.parent() {
            segments.push(current.name());
            current = self.nodes.get(parent)?;
        }
        segments.reverse();
        Some(format!("/{}", segments.join("/")))
    }

    pub fn child_by_name(&self, parent: &str, name: &str) -> Option<&Node> {
        let parent = self.nodes.get(parent)?;
        parent
            .children()
            .filter_map(|child| self.nodes.get(child))
            .find(|child| child.name() == name)
    }

    /// Children of a container sorted by name
    pub fn children_of(&self, id: &str) -> Vec<&Node> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        let mut children: Vec<&Node> = node
            .children()
            .filter_map(|child| self.nodes.get(child))
            .collect();
        children.sort_by(|a, b| a.name().cmp(b.name()));
        children
    }

    /// Whether `id` is `ancestor` or lives below it
    pub fn is_within(&self, id: &str, ancestor: &str) -> bool {
        let mut current = Some(id);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id).and_then(|node| node.parent());
        }
        false
    }

    /// Resolve an absolute, normalized path
    pub fn resolve(&self, path: &str) -> Option<&Node> {
        let (node, remaining) = self.resolve_partial(path);
        if remaining.is_empty() {
            self.nodes.get(&node)
        } else {
            None
        }
    }

    /// Walk an absolute path as far as it exists. Returns the id of the
    /// deepest existing node and the segments below it that do not exist.
    pub fn resolve_partial(&self, path: &str) -> (String, Vec<String>) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = self.root_id.clone();
        for (i, segment) in segments.iter().enumerate() {
            match self.child_by_name(&current, segment) {
                Some(child) => current = child.id().to_string(),
                None => {
                    return (
                        current,
                        segments[i..].iter().map(|s| s.to_string()).collect(),
                    )
                }
            }
        }
        (current, Vec::new())
    }

    /* Mutations */

    /// Link a new node carrying its first version under `parent`
    pub fn insert(
        &mut self,
        id: &str,
        kind: NodeType,
        parent: &str,
        version: Version,
    ) -> Result<Undo, TreeError> {
        if self.nodes.contains_key(id) {
            return Err(TreeError::Default(anyhow::anyhow!("duplicate node id {}", id)));
        }
        if !self.node(parent)?.kind().is_container() {
            return Err(TreeError::NotADirectory(parent.to_string()));
        }
        let mut node = Node::new(id, kind, Some(parent.to_string()));
        node.insert_version(version);
        self.nodes.insert(id.to_string(), node);
        self.node_mut(parent)?.children.insert(id.to_string());
        Ok(Undo::Inserted { id: id.to_string() })
    }

    /// Append a version to a node and move it under `parent` if that differs
    pub fn add_version(
        &mut self,
        id: &str,
        version: Version,
        parent: Option<&str>,
    ) -> Result<Undo, TreeError> {
        let node = self.node(id)?;
        if node.is_reserved() {
            return Err(TreeError::Reserved(id.to_string()));
        }
        let previous_parent = node.parent.clone();
        let file_name = version.file_name.clone();
        if let Some(parent) = parent {
            if previous_parent.as_deref() != Some(parent) {
                self.relink(id, parent)?;
            }
        }
        self.node_mut(id)?.insert_version(version);
        Ok(Undo::VersionAdded {
            id: id.to_string(),
            file_name,
            previous_parent,
        })
    }

    /// Soft delete: move a node into the trash, or, when `versions` names a
    /// strict subset of its versions, move just those into a new trash node
    pub fn remove(
        &mut self,
        id: &str,
        versions: Option<&[Timestamp]>,
    ) -> Result<(RemovedEntry, Undo), TreeError> {
        let node = self.node(id)?;
        if node.is_reserved() {
            return Err(TreeError::Reserved(id.to_string()));
        }
        let path = self.path_of(id).unwrap_or_default();

        let whole = match versions {
            None => true,
            Some([]) => {
                return Err(TreeError::Default(anyhow::anyhow!(
                    "no versions of {} named for removal",
                    id
                )))
            }
            Some(timestamps) => {
                for ts in timestamps {
                    if node.version_at(*ts).is_none() {
                        return Err(TreeError::InvalidVersion {
                            id: id.to_string(),
                            ts: *ts,
                        });
                    }
                }
                node.versions()
                    .iter()
                    .all(|version| timestamps.contains(&version.ts))
            }
        };

        if whole {
            let from = node.parent.clone().unwrap_or_else(|| self.root_id.clone());
            let removed = RemovedEntry {
                id: id.to_string(),
                kind: node.kind(),
                name: node.name().to_string(),
                path,
                versions: node.timestamps(),
            };
            self.relink(id, TRASH_ID)?;
            tracing::debug!("Tree::remove moved {} to trash", removed.path);
            return Ok((
                removed,
                Undo::Moved {
                    id: id.to_string(),
                    from,
                },
            ));
        }

        let timestamps = versions.unwrap_or_default();
        let kind = node.kind();
        let split_id = self.new_id();
        let taken = self.node_mut(id)?.take_versions(timestamps);
        let mut split = Node::new(split_id.clone(), kind, Some(TRASH_ID.to_string()));
        for version in taken {
            split.insert_version(version);
        }
        let removed = RemovedEntry {
            id: split_id.clone(),
            kind,
            name: split.name().to_string(),
            path,
            versions: split.timestamps(),
        };
        self.nodes.insert(split_id.clone(), split);
        self.node_mut(TRASH_ID)?.children.insert(split_id.clone());
        tracing::debug!(
            "Tree::remove moved {} version(s) of {} to trash",
            removed.versions.len(),
            removed.path
        );
        Ok((
            removed,
            Undo::VersionsSplit {
                source: id.to_string(),
                split: split_id,
            },
        ))
    }

    /// Revert one mutation. Undo records must be replayed newest first.
    pub fn undo(&mut self, undo: Undo) -> Result<(), TreeError> {
        match undo {
            Undo::Inserted { id } => {
                self.detach(&id)?;
                self.nodes.remove(&id);
            }
            Undo::VersionAdded {
                id,
                file_name,
                previous_parent,
            } => {
                self.node_mut(&id)?.take_version(&file_name);
                if let Some(parent) = previous_parent {
                    if self.node(&id)?.parent() != Some(parent.as_str()) {
                        self.relink(&id, &parent)?;
                    }
                }
            }
            Undo::Moved { id, from } => self.relink(&id, &from)?,
            Undo::VersionsSplit { source, split } => {
                self.detach(&split)?;
                let split = self
                    .nodes
                    .remove(&split)
                    .ok_or(TreeError::NodeNotFound(split))?;
                let node = self.node_mut(&source)?;
                for version in split.versions().iter().cloned() {
                    node.insert_version(version);
                }
            }
        }
        Ok(())
    }

    fn detach(&mut self, id: &str) -> Result<(), TreeError> {
        if let Some(parent) = self.node(id)?.parent.clone() {
            if let Some(parent) = self.nodes.get_mut(&parent) {
                parent.children.remove(id);
            }
        }
        Ok(())
    }

    fn relink(&mut self, id: &str, parent: &str) -> Result<(), TreeError> {
        if !self.node(parent)?.kind().is_container() {
            return Err(TreeError::NotADirectory(parent.to_string()));
        }
        self.detach(id)?;
        self.node_mut(id)?.parent = Some(parent.to_string());
        self.node_mut(parent)?.children.insert(id.to_string());
        Ok(())
    }

    /* Snapshots */

    /// The graph in index form
    pub fn to_index(&self) -> IndexSnapshot {
        IndexSnapshot::new(self.index_node(&self.root_id))
    }

    fn index_node(&self, id: &str) -> IndexNode {
        let node = &self.nodes[id];
        IndexNode {
            id: node.id().to_string(),
            kind: node.kind(),
            files: node
                .versions()
                .iter()
                .map(|version| version.file_name.clone())
                .collect(),
            children: node
                .children()
                .filter(|child| self.nodes.contains_key(*child))
                .map(|child| self.index_node(child))
                .collect(),
        }
    }

    pub fn record_snapshot(&mut self, snapshot: SnapshotRef) {
        let at = self.snapshots.partition_point(|known| known > &snapshot);
        self.snapshots.insert(at, snapshot);
        self.stale = false;
    }

    pub fn forget_snapshot(&mut self, file_name: &str) {
        self.snapshots.retain(|known| known.file_name != file_name);
    }
}

#[cfg(test)]
mod test {
    use crate::crypto::Session;

    use super::*;

    fn tree() -> Tree {
        Tree::new(BlobStore::memory(), Arc::new(Session::generate().unwrap()))
    }

    fn version(file: &str, micros: u64, name: &str) -> Version {
        Version {
            file_name: file.to_string(),
            ts: Timestamp::from_micros(micros),
            name: name.to_string(),
            parent: None,
        }
    }

    #[test]
    fn test_fresh_tree_has_root_and_trash() {
        let tree = tree();
        assert_eq!(tree.status(), TreeStatus::Unloaded);
        assert_eq!(tree.root().child_count(), 1);
        assert_eq!(tree.path_of(TRASH_ID).unwrap(), "/.trash");
        assert_eq!(tree.path_of(tree.root_id()).unwrap(), "/");
        assert!(tree.is_empty());
    }

    #[test]
    fn test_insert_and_resolve() {
        let mut tree = tree();
        let root = tree.root_id().to_string();
        tree.insert("Aaaa", NodeType::Dir, &root, version("1a", 1, "docs"))
            .unwrap();
        tree.insert("Bbbb", NodeType::Text, "Aaaa", version("3b", 2, "note"))
            .unwrap();

        assert_eq!(tree.path_of("Bbbb").unwrap(), "/docs/note");
        assert_eq!(tree.resolve("/docs/note").unwrap().id(), "Bbbb");
        assert!(tree.resolve("/docs/missing").is_none());

        let (ancestor, remaining) = tree.resolve_partial("/docs/a/b");
        assert_eq!(ancestor, "Aaaa");
        assert_eq!(remaining, vec!["a".to_string(), "b".to_string()]);

        assert!(matches!(
            tree.insert("Cccc", NodeType::Text, "Bbbb", version("3c", 3, "x")),
            Err(TreeError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_remove_and_undo() {
        let mut tree = tree();
        let root = tree.root_id().to_string();
        tree.insert("Aaaa", NodeType::Dir, &root, version("1a", 1, "docs"))
            .unwrap();

        let (removed, undo) = tree.remove("Aaaa", None).unwrap();
        assert_eq!(removed.path, "/docs");
        assert_eq!(tree.path_of("Aaaa").unwrap(), "/.trash/docs");

        tree.undo(undo).unwrap();
        assert_eq!(tree.path_of("Aaaa").unwrap(), "/docs");

        assert!(matches!(
            tree.remove(TRASH_ID, None),
            Err(TreeError::Reserved(_))
        ));
    }

    #[test]
    fn test_remove_some_versions() {
        let mut tree = tree();
        let root = tree.root_id().to_string();
        tree.insert("Aaaa", NodeType::Text, &root, version("3a", 1, "note"))
            .unwrap();
        tree.add_version("Aaaa", version("3b", 2, "note"), None)
            .unwrap();
        tree.add_version("Aaaa", version("3c", 3, "note"), None)
            .unwrap();

        let old = [Timestamp::from_micros(1)];
        let (removed, undo) = tree.remove("Aaaa", Some(&old[..])).unwrap();
        assert_ne!(removed.id, "Aaaa");
        assert_eq!(removed.versions, old.to_vec());
        assert_eq!(tree.versions("Aaaa").unwrap().len(), 2);
        assert_eq!(tree.trash().child_count(), 1);

        tree.undo(undo).unwrap();
        assert_eq!(tree.versions("Aaaa").unwrap().len(), 3);
        assert_eq!(tree.trash().child_count(), 0);

        assert!(matches!(
            tree.remove("Aaaa", Some(&[Timestamp::from_micros(9)][..])),
            Err(TreeError::InvalidVersion { .. })
        ));
        assert!(tree.remove("Aaaa", Some(&[][..])).is_err());
        assert_eq!(tree.trash().child_count(), 0);
    }

    #[test]
    fn test_add_version_relocates() {
        let mut tree = tree();
        let root = tree.root_id().to_string();
        tree.insert("Aaaa", NodeType::Dir, &root, version("1a", 1, "a"))
            .unwrap();
        tree.insert("Bbbb", NodeType::Text, &root, version("3b", 2, "b"))
            .unwrap();

        let undo = tree
            .add_version("Bbbb", version("3c", 3, "c"), Some("Aaaa"))
            .unwrap();
        assert_eq!(tree.path_of("Bbbb").unwrap(), "/a/c");

        tree.undo(undo).unwrap();
        assert_eq!(tree.path_of("Bbbb").unwrap(), "/b");
    }

    #[test]
    fn test_index_lists_versions_oldest_first() {
        let mut tree = tree();
        let root = tree.root_id().to_string();
        tree.insert("Aaaa", NodeType::Text, &root, version("3a", 1, "a"))
            .unwrap();
        tree.add_version("Aaaa", version("3b", 2, "a"), None)
            .unwrap();

        let index = tree.to_index();
        assert_eq!(index.root.id, root);
        let node = index
            .root
            .children
            .iter()
            .find(|child| child.id == "Aaaa")
            .unwrap();
        assert_eq!(node.files, vec!["3a".to_string(), "3b".to_string()]);
    }
}
