//!  Branch and reference management.
//!
//!  Git refs are pointers to commits. The shelve branch ref is the only
//!  mutable state in a store, so every write to it goes through a
//!  compare-and-swap. Remote mirror refs live under `refs/remotes/`.

use git2::{ErrorCode, Repository};

use crate::storage::error::{ShelveError, ShelveResult};
use crate::storage::types::CommitId;

fn conflict_or_git(refname: &str, err: git2::Error) -> ShelveError {
    match err.code() {
        ErrorCode::Modified | ErrorCode::Exists | ErrorCode::Locked | ErrorCode::NotFound => {
            ShelveError::RefConflict {
                reference: refname.to_string(),
            }
        }
        _ => ShelveError::Git(err),
    }
}

/// Manages Git references.
pub struct RefManager;

impl RefManager {
    /// Resolve a full ref name to its current commit ID.
    pub fn resolve(repo: &Repository, refname: &str) -> ShelveResult<CommitId> {
        let reference = repo.find_reference(refname).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                ShelveError::RefNotFound(refname.to_string())
            } else {
                ShelveError::Git(e)
            }
        })?;

        let commit = reference.peel_to_commit()?;
        Ok(CommitId::new(commit.id()))
    }

    /// Create a ref pointing to the given commit.
    ///
    /// Fails with `RefConflict` if the ref already exists.
    pub fn create(repo: &Repository, refname: &str, target: CommitId) -> ShelveResult<()> {
        repo.reference(refname, target.raw(), false, &format!("create at {}", target.short()))
            .map_err(|e| conflict_or_git(refname, e))?;
        Ok(())
    }

    /// Move a ref only if it still points to the expected commit.
    ///
    /// With `expected == None` the ref must not exist yet and is created.
    /// The check and the write happen atomically under the ref lock; any
    /// mismatch surfaces as `RefConflict`.
    pub fn compare_and_swap(
        repo: &Repository,
        refname: &str,
        expected: Option<CommitId>,
        new_target: CommitId,
    ) -> ShelveResult<()> {
        match expected {
            Some(old) => {
                repo.reference_matching(
                    refname,
                    new_target.raw(),
                    true,
                    old.raw(),
                    &format!("advance {} -> {}", old.short(), new_target.short()),
                )
                .map_err(|e| conflict_or_git(refname, e))?;
                Ok(())
            }
            None => Self::create(repo, refname, new_target),
        }
    }

    /// List refs matching a glob, sorted by name.
    pub fn find(repo: &Repository, glob: &str) -> ShelveResult<Vec<(String, CommitId)>> {
        let mut found = Vec::new();
        for reference in repo.references_glob(glob)? {
            let reference = reference?;
            let name = match reference.name() {
                Some(name) => name.to_string(),
                None => continue,
            };
            let commit = reference.peel_to_commit()?;
            found.push((name, CommitId::new(commit.id())));
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}
