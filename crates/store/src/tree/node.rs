use std::collections::BTreeSet;

use crate::blobs::BlobHeader;
use crate::crypto::Timestamp;
use crate::entry::NodeType;

/// Fixed id of the trash node; longer than any generated id
pub const TRASH_ID: &str = "tRaSh";

/// Name under which the trash node appears below the root
pub const TRASH_NAME: &str = ".trash";

/// One historical blob of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub file_name: String,
    pub ts: Timestamp,
    /// Node name recorded in this blob
    pub name: String,
    /// Parent id recorded in this blob
    pub parent: Option<String>,
}

impl Version {
    /// Sort key: timestamp, then file name
    fn key(&self) -> (Timestamp, &str) {
        (self.ts, self.file_name.as_str())
    }
}

impl From<BlobHeader> for Version {
    fn from(header: BlobHeader) -> Self {
        Self {
            file_name: header.file_name,
            ts: header.ts,
            name: header.name,
            parent: header.parent,
        }
    }
}

/// A tree element, owned by the [`Tree`](super::Tree) arena
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    id: String,
    kind: NodeType,
    pub(super) parent: Option<String>,
    pub(super) children: BTreeSet<String>,
    // oldest first
    versions: Vec<Version>,
}

impl Node {
    pub(super) fn new(id: impl Into<String>, kind: NodeType, parent: Option<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            parent,
            children: BTreeSet::new(),
            versions: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> NodeType {
        self.kind
    }

    /// Name from the latest version; reserved nodes have fixed names
    pub fn name(&self) -> &str {
        match self.versions.last() {
            Some(version) => &version.name,
            None if self.id == TRASH_ID => TRASH_NAME,
            None => "",
        }
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(String::as_str)
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_reserved(&self) -> bool {
        self.kind == NodeType::Root || self.id == TRASH_ID
    }

    /// Versions, oldest first
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn latest(&self) -> Option<&Version> {
        self.versions.last()
    }

    pub fn version_at(&self, ts: Timestamp) -> Option<&Version> {
        self.versions.iter().find(|version| version.ts == ts)
    }

    /// Timestamps, newest first
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.versions.iter().rev().map(|version| version.ts).collect()
    }

    pub(super) fn insert_version(&mut self, version: Version) {
        if self
            .versions
            .iter()
            .any(|existing| existing.file_name == version.file_name)
        {
            return;
        }
        let at = self
            .versions
            .partition_point(|existing| existing.key() < version.key());
        self.versions.insert(at, version);
    }

    pub(super) fn take_version(&mut self, file_name: &str) -> Option<Version> {
        let at = self
            .versions
            .iter()
            .position(|version| version.file_name == file_name)?;
        Some(self.versions.remove(at))
    }

    pub(super) fn take_versions(&mut self, timestamps: &[Timestamp]) -> Vec<Version> {
        let (taken, kept) = std::mem::take(&mut self.versions)
            .into_iter()
            .partition(|version| timestamps.contains(&version.ts));
        self.versions = kept;
        taken
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn version(file: &str, micros: u64, name: &str) -> Version {
        Version {
            file_name: file.to_string(),
            ts: Timestamp::from_micros(micros),
            name: name.to_string(),
            parent: None,
        }
    }

    #[test]
    fn test_versions_stay_sorted() {
        let mut node = Node::new("Ab3x", NodeType::Text, None);
        node.insert_version(version("3c", 30, "third"));
        node.insert_version(version("1a", 10, "first"));
        node.insert_version(version("2b", 20, "second"));
        node.insert_version(version("2b", 20, "second"));

        assert_eq!(node.versions().len(), 3);
        assert_eq!(node.name(), "third");
        assert_eq!(
            node.timestamps(),
            vec![
                Timestamp::from_micros(30),
                Timestamp::from_micros(20),
                Timestamp::from_micros(10)
            ]
        );
    }

    #[test]
    fn test_ties_break_by_file_name() {
        let mut node = Node::new("Ab3x", NodeType::Text, None);
        node.insert_version(version("2z", 10, "z"));
        node.insert_version(version("2a", 10, "a"));
        assert_eq!(node.name(), "z");
    }

    #[test]
    fn test_take_versions() {
        let mut node = Node::new("Ab3x", NodeType::Text, None);
        node.insert_version(version("1a", 10, "a"));
        node.insert_version(version("2b", 20, "b"));
        node.insert_version(version("3c", 30, "c"));

        let taken = node.take_versions(&[Timestamp::from_micros(30)]);
        assert_eq!(taken.len(), 1);
        assert_eq!(node.name(), "b");
        assert!(node.take_version("1a").is_some());
        assert!(node.take_version("1a").is_none());
    }

    #[test]
    fn test_reserved_names() {
        assert_eq!(Node::new(TRASH_ID, NodeType::Dir, None).name(), TRASH_NAME);
        let root = Node::new("Root", NodeType::Root, None);
        assert_eq!(root.name(), "");
        assert!(root.is_reserved());
    }
}
