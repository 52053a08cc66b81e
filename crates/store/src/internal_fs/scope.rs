use std::ops::{Deref, DerefMut};

use super::{FsError, InternalFs, Pending};

/// A batch of operations sharing one index snapshot
///
/// Obtained from [`InternalFs::begin`]. Operations run through the scope
/// (it derefs to [`InternalFs`]) write their blobs as usual but defer the
/// snapshot to [`SaveScope::commit`]. A failed commit rolls back every
/// change made in the scope. Dropping the scope without committing leaves
/// its changes in the tree, to be saved by the next snapshot.
///
/// Beginning a scope inside another one yields a nested scope whose
/// `commit` and `abort` are no-ops; the outermost scope decides.
#[derive(Debug)]
pub struct SaveScope<'a> {
    fs: &'a mut InternalFs,
    owner: bool,
    finished: bool,
}

impl InternalFs {
    pub fn begin(&mut self) -> SaveScope<'_> {
        let owner = self.scope.is_none();
        if owner {
            self.scope = Some(Pending::default());
        }
        SaveScope {
            fs: self,
            owner,
            finished: false,
        }
    }
}

impl SaveScope<'_> {
    /// Write one snapshot covering every change of the scope. Returns the
    /// snapshot file name, or `None` when nothing changed.
    pub async fn commit(mut self) -> Result<Option<String>, FsError> {
        self.finished = true;
        if !self.owner {
            return Ok(None);
        }
        let pending = self.fs.scope.take().unwrap_or_default();
        if pending.is_empty() {
            return Ok(None);
        }
        match self.fs.save_tree().await {
            Ok(file_name) => {
                tracing::debug!(
                    "SaveScope::commit: {} change(s) in {}",
                    pending.undo.len(),
                    file_name
                );
                Ok(Some(file_name))
            }
            Err(e) => {
                tracing::warn!("SaveScope::commit failed, rolling back: {}", e);
                self.fs.rollback(pending).await;
                Err(e)
            }
        }
    }

    /// Undo every change of the scope and delete its blobs
    pub async fn abort(mut self) {
        self.finished = true;
        if !self.owner {
            return;
        }
        if let Some(pending) = self.fs.scope.take() {
            self.fs.rollback(pending).await;
        }
    }
}

impl Deref for SaveScope<'_> {
    type Target = InternalFs;
    fn deref(&self) -> &Self::Target {
        self.fs
    }
}

impl DerefMut for SaveScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.fs
    }
}

impl Drop for SaveScope<'_> {
    fn drop(&mut self) {
        if self.finished || !self.owner {
            return;
        }
        if let Some(pending) = self.fs.scope.take() {
            if !pending.is_empty() {
                tracing::warn!(
                    "SaveScope dropped with {} uncommitted change(s); they will be saved with the next snapshot",
                    pending.undo.len()
                );
            }
        }
    }
}
