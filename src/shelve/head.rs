//! Branch head resolution and compare-and-swap advance.

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::storage::{BranchName, CommitId, CommitMessage, ObjectStore, ShelveError, ShelveResult, TreeEntry};

/// Name of the root entry that keeps the bootstrap commit non-empty.
pub const PLACEHOLDER_ENTRY: &str = "_shelve";

/// Tracks the head commit of one branch.
///
/// The cached head is only a guess for the next expected value. It is set
/// after a successful CAS and dropped on conflict; the store stays the
/// source of truth.
#[derive(Debug)]
pub struct HeadTracker {
    branch: BranchName,
    cached: Mutex<Option<CommitId>>,
}

impl HeadTracker {
    pub fn new(branch: BranchName) -> Self {
        Self {
            branch,
            cached: Mutex::new(None),
        }
    }

    pub fn branch(&self) -> &BranchName {
        &self.branch
    }

    /// Last head this tracker advanced to, if any.
    pub fn cached(&self) -> Option<CommitId> {
        *self.cached.lock()
    }

    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    /// The cached head, or the store's head when nothing is cached.
    pub fn current<S: ObjectStore>(&self, store: &S) -> ShelveResult<CommitId> {
        match self.cached() {
            Some(head) => Ok(head),
            None => self.resolve(store),
        }
    }

    /// Read the branch from the store, creating it if absent.
    pub fn resolve<S: ObjectStore>(&self, store: &S) -> ShelveResult<CommitId> {
        match store.resolve_ref(&self.branch.as_ref_path()) {
            Ok(head) => Ok(head),
            Err(ShelveError::RefNotFound(_)) => self.bootstrap(store),
            Err(e) => Err(e),
        }
    }

    /// Move the branch from `expected` to `new`.
    ///
    /// `expected == None` requires the branch to be absent. Fails with
    /// `RefConflict` when the branch is anywhere else.
    pub fn advance<S: ObjectStore>(&self, store: &S, expected: Option<CommitId>, new: CommitId) -> ShelveResult<()> {
        let refname = self.branch.as_ref_path();
        if let Err(e) = store.cas_update_ref(&refname, expected, new) {
            self.invalidate();
            return Err(e);
        }
        *self.cached.lock() = Some(new);
        debug!(branch = %self.branch, head = %new.short(), "advanced head");
        Ok(())
    }

    fn bootstrap<S: ObjectStore>(&self, store: &S) -> ShelveResult<CommitId> {
        let refname = self.branch.as_ref_path();

        let start = match self.mirror_seed(store)? {
            Some((mirror, head)) => {
                info!(branch = %self.branch, mirror = %mirror, head = %head.short(), "seeding branch from mirror");
                head
            }
            None => self.placeholder_commit(store)?,
        };

        match store.create_ref(&refname, start) {
            Ok(()) => {
                info!(branch = %self.branch, head = %start.short(), "created branch");
                Ok(start)
            }
            // someone else created it first; theirs wins
            Err(ShelveError::RefConflict { .. }) => {
                debug!(branch = %self.branch, "branch appeared during bootstrap");
                store.resolve_ref(&refname)
            }
            Err(e) => Err(e),
        }
    }

    /// An already fetched remote mirror of this branch, if there is one.
    fn mirror_seed<S: ObjectStore>(&self, store: &S) -> ShelveResult<Option<(String, CommitId)>> {
        let glob = format!("refs/remotes/*/{}", self.branch);
        let suffix = format!("/{}", self.branch);
        Ok(store
            .find_refs(&glob)?
            .into_iter()
            .find(|(name, _)| name.ends_with(&suffix)))
    }

    fn placeholder_commit<S: ObjectStore>(&self, store: &S) -> ShelveResult<CommitId> {
        let blob = store.write_blob(format!("Created {} branch\n", self.branch).as_bytes())?;
        let tree = store.make_tree(&[TreeEntry::blob(PLACEHOLDER_ENTRY, blob)])?;
        store.make_commit(tree, None, &CommitMessage::created_branch(self.branch.as_str()))
    }
}
