//! The object store boundary.
//!
//! Everything above the storage layer talks to the store through this trait
//! and never touches git2 directly. Reference operations take full ref names
//! (`refs/heads/...`, `refs/remotes/...`).

use std::io::{self, Read, Write};

use crate::storage::commit::CommitInfo;
use crate::storage::error::ShelveResult;
use crate::storage::fsck::IntegrityReport;
use crate::storage::remote::TransferControl;
use crate::storage::types::{CommitId, ContentHash, TreeEntry, TreeId};

/// Content-addressed object storage with CAS references and remote transfer.
///
/// Object writes are immutable and safe under any concurrency; reference
/// updates are linearizable per ref.
pub trait ObjectStore: Send + Sync {
    /// A name for this store as seen by remotes it pushes to.
    fn locator(&self) -> String;

    fn write_blob(&self, data: &[u8]) -> ShelveResult<ContentHash>;

    /// Write a blob from a producer; the sink is closed on every exit path.
    fn write_blob_streaming<F>(&self, f: F) -> ShelveResult<ContentHash>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>;

    /// Fails with `ObjectNotFound` if the hash is unknown and with
    /// `UnexpectedObjectType` if it names something other than a blob.
    fn read_blob(&self, hash: ContentHash) -> ShelveResult<Vec<u8>>;

    /// Fails like `read_blob`, before calling `f`.
    fn read_blob_streaming<T, F>(&self, hash: ContentHash, f: F) -> ShelveResult<T>
    where
        F: FnOnce(&mut dyn Read) -> io::Result<T>;

    fn has_blob(&self, hash: ContentHash) -> ShelveResult<bool>;

    fn list_tree(&self, tree: TreeId, path: Option<&str>) -> ShelveResult<Vec<TreeEntry>>;

    fn make_tree(&self, entries: &[TreeEntry]) -> ShelveResult<TreeId>;

    fn make_commit(&self, tree: TreeId, parent: Option<CommitId>, message: &str) -> ShelveResult<CommitId>;

    fn read_commit(&self, id: CommitId) -> ShelveResult<CommitInfo>;

    /// First-parent history, newest first.
    fn history(&self, start: CommitId, limit: Option<usize>) -> ShelveResult<Vec<CommitInfo>>;

    /// Fails with `RefNotFound` if the ref is absent.
    fn resolve_ref(&self, refname: &str) -> ShelveResult<CommitId>;

    /// Fails with `RefConflict` if the ref already exists.
    fn create_ref(&self, refname: &str, target: CommitId) -> ShelveResult<()>;

    /// Fails with `RefConflict` if the ref's current value is not `expected`
    /// (`None` meaning "absent").
    fn cas_update_ref(&self, refname: &str, expected: Option<CommitId>, new: CommitId) -> ShelveResult<()>;

    fn find_refs(&self, glob: &str) -> ShelveResult<Vec<(String, CommitId)>>;

    /// Download the objects reachable from the remote's `refname`.
    ///
    /// Returns the fetched head, or `None` when the remote does not have
    /// `refname`. A returned head is always present locally.
    fn fetch_pack(&self, remote: &str, refname: &str, control: &TransferControl) -> ShelveResult<Option<CommitId>>;

    /// The head the remote advertises for `refname`, `None` if absent.
    ///
    /// The default goes through `fetch_pack`, so the objects come along.
    fn ls_remote_heads(&self, remote: &str, refname: &str, control: &TransferControl) -> ShelveResult<Option<CommitId>> {
        self.fetch_pack(remote, refname, control)
    }

    fn send_pack(
        &self,
        remote: &str,
        local_ref: &str,
        remote_ref: &str,
        control: &TransferControl,
    ) -> ShelveResult<()>;

    fn check_integrity(&self) -> ShelveResult<IntegrityReport>;
}
