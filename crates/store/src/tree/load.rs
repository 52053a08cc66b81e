//! Rebuilding the tree from the blob directory
//!
//! The newest readable index snapshot is a checkpoint and the blob
//! directory is the log. Whatever the checkpoint does not account for is
//! replayed on top of it: new versions of known nodes are appended, unknown
//! nodes are reattached where their recorded parent still exists, and
//! anything that cannot be placed is parked in the trash. Every node placed
//! by inference is reported through [`Tree::alerts`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::blobs::{codec, BlobHeader, OVERFLOW_SUFFIX};
use crate::crypto::{random_string, Timestamp, BLAKE3_HASH_SIZE, ID_LENGTH};
use crate::entry::NodeType;

use super::{
    IndexNode, IndexSnapshot, Node, SnapshotRef, Tree, TreeError, TreeStatus, Version, TRASH_ID,
};

/// All unreferenced blobs of one node id
#[derive(Debug)]
struct Orphan {
    id: String,
    kind: NodeType,
    name: String,
    parent: Option<String>,
    first_ts: Timestamp,
    // oldest first
    versions: Vec<Version>,
}

impl Orphan {
    fn latest_file(&self) -> Option<&str> {
        self.versions.last().map(|version| version.file_name.as_str())
    }
}

fn sort_key(header: &BlobHeader) -> (Timestamp, &str) {
    (header.ts, header.file_name.as_str())
}

/// Group headers by node id, ordered by each group's oldest timestamp
fn group_by_id(headers: Vec<BlobHeader>) -> Vec<Orphan> {
    let mut by_id: BTreeMap<String, Vec<BlobHeader>> = BTreeMap::new();
    for header in headers {
        by_id.entry(header.id.clone()).or_default().push(header);
    }
    let mut groups: Vec<Orphan> = by_id
        .into_iter()
        .filter_map(|(id, mut headers)| {
            headers.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
            let first_ts = headers.first()?.ts;
            let latest = headers.last()?.clone();
            Some(Orphan {
                id,
                kind: latest.kind,
                name: latest.name,
                parent: latest.parent,
                first_ts,
                versions: headers.into_iter().map(Version::from).collect(),
            })
        })
        .collect();
    groups.sort_by(|a, b| (a.first_ts, &a.id).cmp(&(b.first_ts, &b.id)));
    groups
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

impl Tree {
    /// Scan the blob directory and rebuild the graph.
    ///
    /// A no-op once loaded. An empty directory yields a fresh tree. When
    /// nothing at all can be decrypted the tree becomes
    /// [`TreeStatus::Broken`] and [`TreeError::Broken`] is returned.
    pub async fn load(&mut self) -> Result<(), TreeError> {
        match self.status {
            TreeStatus::Loaded => return Ok(()),
            TreeStatus::Broken => {
                return Err(TreeError::Broken("tree failed to load".to_string()))
            }
            TreeStatus::Unloaded => {}
        }
        self.alerts.clear();
        self.warnings.clear();
        self.snapshots.clear();
        self.stale = false;

        let names = self.blobs.blob_names().await?;
        tracing::debug!("Tree::load: {} blob(s) on disk", names.len());
        if names.is_empty() {
            tracing::info!("Tree::load: empty store, starting fresh");
            self.status = TreeStatus::Loaded;
            return Ok(());
        }

        let mut snapshots = Vec::new();
        let mut contents = Vec::new();
        for name in &names {
            match self.scan(name).await {
                Ok(header) if header.kind == NodeType::Root => snapshots.push(header),
                Ok(header) => contents.push(header),
                Err(e) => self.warn(format!("cannot read blob {}: {}", name, e)),
            }
        }

        snapshots.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
        self.snapshots = snapshots
            .iter()
            .map(|header| SnapshotRef {
                ts: header.ts,
                file_name: header.file_name.clone(),
            })
            .collect();

        let mut authoritative = None;
        for header in &snapshots {
            match self.read_index(header).await {
                Ok(index) => {
                    tracing::debug!(
                        "Tree::load: using index snapshot {} from {}",
                        header.file_name,
                        header.ts
                    );
                    authoritative = Some(index);
                    break;
                }
                Err(e) => {
                    self.stale = true;
                    self.warn(format!(
                        "cannot read index snapshot {}: {}",
                        header.file_name, e
                    ))
                }
            }
        }

        match authoritative {
            Some(index) => {
                let mut unbound: HashMap<String, BlobHeader> = contents
                    .into_iter()
                    .map(|header| (header.file_name.clone(), header))
                    .collect();
                self.build_from_index(index, &mut unbound);
                self.reconcile(unbound.into_values().collect()).await;
            }
            None if contents.is_empty() => {
                self.status = TreeStatus::Broken;
                tracing::warn!(
                    "Tree::load: none of {} blob(s) could be read, tree is broken",
                    names.len()
                );
                return Err(TreeError::Broken(
                    "no index snapshot or content blob could be read".to_string(),
                ));
            }
            None => {
                self.warn(format!(
                    "no readable index snapshot, rebuilding {} blob(s) by inference",
                    contents.len()
                ));
                self.rebuild_flat(contents);
            }
        }

        self.status = TreeStatus::Loaded;
        tracing::info!(
            "Tree::load: {} node(s), {} alert(s), {} warning(s)",
            self.nodes.len(),
            self.alerts.len(),
            self.warnings.len()
        );
        Ok(())
    }

    fn warn(&mut self, warning: String) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }

    fn alert(&mut self, path: String) {
        tracing::info!("recovered {}", path);
        self.stale = true;
        self.alerts.push(path);
    }

    /// A warning about something the next snapshot will leave out
    fn drop_warn(&mut self, warning: String) {
        self.stale = true;
        self.warn(warning);
    }

    async fn scan(&self, name: &str) -> Result<BlobHeader, TreeError> {
        let extra = if name.ends_with(OVERFLOW_SUFFIX) {
            self.blobs.read_body(name).await?.extra_name
        } else {
            None
        };
        Ok(codec::decrypt_name(
            name,
            extra.as_deref(),
            self.keys.as_ref(),
        )?)
    }

    async fn read_index(&self, header: &BlobHeader) -> Result<IndexSnapshot, TreeError> {
        let body = self.blobs.read_body(&header.file_name).await?;
        let encrypted = body
            .encrypted_content
            .ok_or_else(|| anyhow::anyhow!("index snapshot has no content"))?;
        let json = codec::decrypt_content(&encrypted, self.keys.as_ref())?;
        IndexSnapshot::decode(&json)
    }

    /* Checkpoint */

    fn build_from_index(
        &mut self,
        index: IndexSnapshot,
        unbound: &mut HashMap<String, BlobHeader>,
    ) {
        let root_id = index.root.id.clone();
        self.reset(root_id.clone());
        for child in index.root.children {
            self.bind(child, &root_id, unbound);
        }
    }

    fn bind(
        &mut self,
        entry: IndexNode,
        parent: &str,
        unbound: &mut HashMap<String, BlobHeader>,
    ) {
        if entry.id == TRASH_ID {
            if parent == self.root_id {
                for child in entry.children {
                    self.bind(child, TRASH_ID, unbound);
                }
            }
            return;
        }
        if entry.kind == NodeType::Root || self.nodes.contains_key(&entry.id) {
            self.drop_warn(format!("index lists node {} twice, skipping", entry.id));
            return;
        }

        let mut node = Node::new(entry.id.clone(), entry.kind, Some(parent.to_string()));
        for file in &entry.files {
            match unbound.remove(file) {
                Some(header) => node.insert_version(header.into()),
                None => self.drop_warn(format!(
                    "blob {} of node {} is missing",
                    file, entry.id
                )),
            }
        }
        if node.versions().is_empty() {
            // its children stay unbound and come back as orphans
            self.drop_warn(format!(
                "node {} has no readable version, dropping it",
                entry.id
            ));
            return;
        }

        let id = entry.id;
        self.nodes.insert(id.clone(), node);
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.insert(id.clone());
        }
        for child in entry.children {
            self.bind(child, &id, unbound);
        }
    }

    /* Lost index */

    /// Place every node found in the content blobs directly under the root
    fn rebuild_flat(&mut self, contents: Vec<BlobHeader>) {
        let groups = group_by_id(contents);

        // reuse the old root id when the blobs agree on one
        let ids: HashSet<&str> = groups.iter().map(|group| group.id.as_str()).collect();
        let roots: HashSet<&str> = groups
            .iter()
            .filter_map(|group| group.parent.as_deref())
            .filter(|parent| !ids.contains(parent) && *parent != TRASH_ID)
            .collect();
        let root_id = match roots.into_iter().collect::<Vec<_>>().as_slice() {
            [only] => only.to_string(),
            _ => loop {
                let candidate = random_string(ID_LENGTH);
                if !ids.contains(candidate.as_str()) {
                    break candidate;
                }
            },
        };
        self.reset(root_id.clone());

        for group in groups {
            let id = group.id.clone();
            self.attach_orphan(group, &root_id);
            if let Some(path) = self.path_of(&id) {
                self.alert(path);
            }
        }
    }

    /* Replay */

    async fn reconcile(&mut self, orphans: Vec<BlobHeader>) {
        if orphans.is_empty() {
            return;
        }
        tracing::info!(
            "Tree::reconcile: {} blob(s) not in the index snapshot",
            orphans.len()
        );

        let mut pending = VecDeque::new();
        for group in group_by_id(orphans) {
            if self.nodes.contains_key(&group.id) {
                self.replay(group);
            } else {
                pending.push_back(group);
            }
        }

        // orphan dirs merged into an existing same-name dir
        let mut alias: HashMap<String, String> = HashMap::new();
        let mut stalled = 0;
        while let Some(orphan) = pending.pop_front() {
            let parent = orphan
                .parent
                .as_ref()
                .map(|parent| alias.get(parent).unwrap_or(parent).clone());

            let placeable = parent.as_ref().is_some_and(|parent| {
                self.nodes
                    .get(parent)
                    .is_some_and(|node| node.kind().is_container())
            });
            if let (true, Some(parent)) = (placeable, parent.as_ref()) {
                self.adopt(orphan, parent, &mut alias).await;
                stalled = 0;
                continue;
            }

            let waiting = parent
                .as_ref()
                .is_some_and(|parent| pending.iter().any(|other| &other.id == parent));
            if waiting && stalled <= pending.len() {
                pending.push_back(orphan);
                stalled += 1;
                continue;
            }

            let id = orphan.id.clone();
            self.attach_orphan(orphan, TRASH_ID);
            if let Some(path) = self.path_of(&id) {
                self.alert(path);
            }
            stalled = 0;
        }
    }

    /// Unreferenced versions of a node the index already knows
    fn replay(&mut self, group: Orphan) {
        let Some(node) = self.nodes.get(&group.id) else {
            return;
        };
        if node.is_reserved() {
            self.warn(format!("blob claims reserved node {}", group.id));
            return;
        }
        let newer = node
            .latest()
            .map_or(true, |latest| group.versions.last().is_some_and(|v| v.ts > latest.ts));
        let current_parent = node.parent.clone();

        let id = group.id.clone();
        if let Some(node) = self.nodes.get_mut(&id) {
            for version in group.versions {
                node.insert_version(version);
            }
        }

        if newer {
            let moved_to = group.parent.filter(|parent| {
                Some(parent) != current_parent.as_ref()
                    && self
                        .nodes
                        .get(parent)
                        .is_some_and(|node| node.kind().is_container())
                    && !self.is_within(parent, &id)
            });
            let target = moved_to.clone().or(current_parent);
            if let Some(target) = target {
                if target != TRASH_ID && self.name_taken(&target, &group.name, &id) {
                    let would_be = self
                        .path_of(&target)
                        .map(|path| join_path(&path, &group.name))
                        .unwrap_or_else(|| group.name.clone());
                    tracing::debug!("Tree::reconcile: {} clashes with a sibling", would_be);
                    if let Err(e) = self.relink(&id, TRASH_ID) {
                        self.warn(format!("cannot move {} to the trash: {}", id, e));
                    }
                    self.alert(would_be);
                    return;
                }
            }
            if let Some(parent) = moved_to {
                if let Err(e) = self.relink(&id, &parent) {
                    self.warn(format!("cannot move {} to {}: {}", id, parent, e));
                }
            }
        }
        if let Some(path) = self.path_of(&id) {
            self.alert(path);
        }
    }

    /// Whether a child of `parent` other than `id` is called `name`
    fn name_taken(&self, parent: &str, name: &str, id: &str) -> bool {
        self.nodes.get(parent).is_some_and(|parent| {
            parent
                .children()
                .filter(|child| *child != id)
                .filter_map(|child| self.nodes.get(child))
                .any(|child| child.name() == name)
        })
    }

    /// A node the index has never seen whose parent exists
    async fn adopt(&mut self, orphan: Orphan, parent: &str, alias: &mut HashMap<String, String>) {
        let sibling = self
            .child_by_name(parent, &orphan.name)
            .map(|node| (node.id().to_string(), node.kind()));

        let Some((sibling, sibling_kind)) = sibling else {
            let id = orphan.id.clone();
            self.attach_orphan(orphan, parent);
            if let Some(path) = self.path_of(&id) {
                self.alert(path);
            }
            return;
        };

        if orphan.kind.is_container() && sibling_kind.is_container() {
            tracing::debug!(
                "Tree::reconcile: merging dir {} into {}",
                orphan.id,
                sibling
            );
            alias.insert(orphan.id.clone(), sibling);
            self.attach_orphan(orphan, TRASH_ID);
            return;
        }

        if orphan.kind.is_file() && sibling_kind.is_file() && self.same_content(&orphan, &sibling).await
        {
            tracing::debug!(
                "Tree::reconcile: folding {} into identical {}",
                orphan.id,
                sibling
            );
            alias.insert(orphan.id.clone(), sibling.clone());
            if let Some(node) = self.nodes.get_mut(&sibling) {
                for version in orphan.versions {
                    node.insert_version(version);
                }
            }
            return;
        }

        let would_be = self
            .path_of(parent)
            .map(|path| join_path(&path, &orphan.name))
            .unwrap_or_else(|| orphan.name.clone());
        self.attach_orphan(orphan, TRASH_ID);
        self.alert(would_be);
    }

    async fn same_content(&mut self, orphan: &Orphan, sibling: &str) -> bool {
        let Some(theirs) = self
            .nodes
            .get(sibling)
            .and_then(|node| node.latest())
            .map(|version| version.file_name.clone())
        else {
            return false;
        };
        let Some(ours) = orphan.latest_file() else {
            return false;
        };
        match (self.content_hash(ours).await, self.content_hash(&theirs).await) {
            (Ok(a), Ok(b)) => a == b,
            (Err(e), _) | (_, Err(e)) => {
                self.warn(format!("cannot compare {} with {}: {}", ours, theirs, e));
                false
            }
        }
    }

    async fn content_hash(&self, file_name: &str) -> Result<Option<[u8; BLAKE3_HASH_SIZE]>, TreeError> {
        let body = self.blobs.read_body(file_name).await?;
        match body.encrypted_content {
            Some(encrypted) => Ok(Some(codec::content_hash(
                &encrypted,
                self.keys.as_ref(),
            )?)),
            None => Ok(None),
        }
    }

    fn attach_orphan(&mut self, orphan: Orphan, parent: &str) {
        let mut node = Node::new(orphan.id.clone(), orphan.kind, Some(parent.to_string()));
        for version in orphan.versions {
            node.insert_version(version);
        }
        self.nodes.insert(orphan.id.clone(), node);
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.insert(orphan.id);
        }
    }
}
