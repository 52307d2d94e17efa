//!   Core Git repository wrapper.
//!
//!  This wraps `git2::Repository` with thread-safe access and implements the
//!  [`ObjectStore`] primitives on top of the per-concern modules (blob, tree,
//!  commit, refs, remote, fsck).

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::storage::blob;
use crate::storage::commit::{self, CommitBuilder, CommitInfo};
use crate::storage::error::{ShelveError, ShelveResult};
use crate::storage::fsck::{self, IntegrityReport};
use crate::storage::refs::RefManager;
use crate::storage::remote::{self, TransferControl};
use crate::storage::store::ObjectStore;
use crate::storage::tree;
use crate::storage::types::{CommitId, ContentHash, GitSignature, TreeEntry, TreeId};

/// A git repository used as an object store.
///
/// Clone this to share across threads - it uses Arc internally. Short
/// operations share one serialized libgit2 handle. Streaming reads and
/// writes, network transfers and the integrity walk open a handle of
/// their own for the duration of the call, so caller closures and slow
/// remotes never hold the shared one. Ref updates are compare-and-swap, which keeps all
/// handles (and other processes) on the same repository consistent.
#[derive(Clone)]
pub struct GitObjectStore {
    inner: Arc<GitObjectStoreInner>,
}

struct GitObjectStoreInner {
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: RwLock<GitSignature>,
}

impl GitObjectStore {
    fn from_repository(repo: Repository, path: &Path) -> Self {
        Self {
            inner: Arc::new(GitObjectStoreInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature: RwLock::new(GitSignature::gitshelve()),
            }),
        }
    }

    /// Open an existing repository (bare or not).
    pub fn open(path: impl AsRef<Path>) -> ShelveResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).map_err(|_| ShelveError::NotInitialized(path.to_path_buf()))?;
        Ok(Self::from_repository(repo, path))
    }

    /// Initialize a new bare repository.
    pub fn init(path: impl AsRef<Path>) -> ShelveResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init_bare(path)?;
        debug!(path = %path.display(), "initialized bare store");
        Ok(Self::from_repository(repo, path))
    }

    /// Open or initialize a repository.
    pub fn open_or_init(path: impl AsRef<Path>) -> ShelveResult<Self> {
        let path = path.as_ref();
        if path.join("HEAD").exists() || path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Set the signature for commits.
    pub fn with_signature(self, signature: GitSignature) -> Self {
        *self.inner.signature.write() = signature;
        self
    }

    /// Execute a function with exclusive access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> ShelveResult<T>
    where
        F: FnOnce(&Repository) -> ShelveResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    /// Execute a function on a freshly opened handle of its own.
    fn with_dedicated_repo<F, T>(&self, f: F) -> ShelveResult<T>
    where
        F: FnOnce(&Repository) -> ShelveResult<T>,
    {
        let repo = Repository::open(&self.inner.path)?;
        f(&repo)
    }
}

impl std::fmt::Debug for GitObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitObjectStore")
            .field("path", &self.inner.path)
            .finish()
    }
}

impl ObjectStore for GitObjectStore {
    fn locator(&self) -> String {
        self.inner.path.display().to_string()
    }

    fn write_blob(&self, data: &[u8]) -> ShelveResult<ContentHash> {
        self.with_repo(|repo| blob::write_blob(repo, data))
    }

    fn write_blob_streaming<F>(&self, f: F) -> ShelveResult<ContentHash>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        self.with_dedicated_repo(|repo| blob::write_blob_streaming(repo, f))
    }

    fn read_blob(&self, hash: ContentHash) -> ShelveResult<Vec<u8>> {
        self.with_repo(|repo| blob::read_blob(repo, hash))
    }

    fn read_blob_streaming<T, F>(&self, hash: ContentHash, f: F) -> ShelveResult<T>
    where
        F: FnOnce(&mut dyn Read) -> io::Result<T>,
    {
        self.with_dedicated_repo(|repo| blob::read_blob_streaming(repo, hash, f))
    }

    fn has_blob(&self, hash: ContentHash) -> ShelveResult<bool> {
        self.with_repo(|repo| blob::blob_exists(repo, hash))
    }

    fn list_tree(&self, tree: TreeId, path: Option<&str>) -> ShelveResult<Vec<TreeEntry>> {
        self.with_repo(|repo| tree::list_tree(repo, tree, path))
    }

    fn make_tree(&self, entries: &[TreeEntry]) -> ShelveResult<TreeId> {
        self.with_repo(|repo| tree::make_tree(repo, entries))
    }

    fn make_commit(&self, tree: TreeId, parent: Option<CommitId>, message: &str) -> ShelveResult<CommitId> {
        let signature = self.inner.signature.read().clone();
        self.with_repo(|repo| {
            CommitBuilder::new(repo)
                .tree(tree)
                .parent(parent)
                .message(message)
                .signature(signature)
                .commit()
        })
    }

    fn read_commit(&self, id: CommitId) -> ShelveResult<CommitInfo> {
        self.with_repo(|repo| commit::get_commit(repo, id))
    }

    fn history(&self, start: CommitId, limit: Option<usize>) -> ShelveResult<Vec<CommitInfo>> {
        self.with_repo(|repo| {
            let iter = commit::history(repo, start)?;
            match limit {
                Some(n) => iter.take(n).collect(),
                None => iter.collect(),
            }
        })
    }

    fn resolve_ref(&self, refname: &str) -> ShelveResult<CommitId> {
        self.with_repo(|repo| RefManager::resolve(repo, refname))
    }

    fn create_ref(&self, refname: &str, target: CommitId) -> ShelveResult<()> {
        self.with_repo(|repo| RefManager::create(repo, refname, target))
    }

    fn cas_update_ref(&self, refname: &str, expected: Option<CommitId>, new: CommitId) -> ShelveResult<()> {
        self.with_repo(|repo| RefManager::compare_and_swap(repo, refname, expected, new))
    }

    fn find_refs(&self, glob: &str) -> ShelveResult<Vec<(String, CommitId)>> {
        self.with_repo(|repo| RefManager::find(repo, glob))
    }

    fn fetch_pack(&self, remote: &str, refname: &str, control: &TransferControl) -> ShelveResult<Option<CommitId>> {
        debug!(remote, refname, "fetch-pack");
        self.with_dedicated_repo(|repo| remote::fetch_pack(repo, remote, refname, control))
    }

    fn send_pack(
        &self,
        remote: &str,
        local_ref: &str,
        remote_ref: &str,
        control: &TransferControl,
    ) -> ShelveResult<()> {
        debug!(remote, local_ref, remote_ref, "send-pack");
        self.with_dedicated_repo(|repo| remote::send_pack(repo, remote, local_ref, remote_ref, control))
    }

    fn check_integrity(&self) -> ShelveResult<IntegrityReport> {
        self.with_dedicated_repo(fsck::check_integrity)
    }
}
