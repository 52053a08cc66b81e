/**
 * Blob directory access.
 *  Write-once files behind a pluggable backend,
 *  and the encrypted naming scheme that lets a
 *  blob describe itself without an index.
 */
pub mod blobs;
/**
 * Store configuration, loaded from TOML.
 */
pub mod config;
/**
 * Cryptographic collaborator.
 *  - Symmetric encryption with an integrity header
 *  - Key-holding sessions behind the KeyProvider trait
 *  - Node ids, timestamps and timestamp scrambling
 */
pub mod crypto;
/**
 * The attribute envelope passed between the tree
 *  and the orchestrator.
 */
pub mod entry;
/**
 * The storage orchestrator.
 *  Add, update, remove and snapshot, with
 *  rollback of failed operations and batched
 *  snapshot scopes.
 */
pub mod internal_fs;
/**
 * The in-memory node graph and the load and
 *  reconcile algorithm that rebuilds it from the
 *  blob directory.
 */
pub mod tree;

pub mod prelude {
    pub use crate::blobs::{BlobBackend, BlobStore};
    pub use crate::config::{RetentionPolicy, StoreConfig};
    pub use crate::crypto::{KeyProvider, Secret, Session, Timestamp};
    pub use crate::entry::{Entry, EntryField, NodeType};
    pub use crate::internal_fs::{FsError, InternalFs, RemoveOptions, SaveScope};
    pub use crate::tree::{RemovedEntry, Tree, TreeStatus};
}
