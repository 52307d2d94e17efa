//! Network transfer against remote stores.
//!
//! Remotes are addressed by URL or plain filesystem path and used
//! anonymously: nothing is written to the repository config. A fetch lands
//! the remote head in a short-lived scratch ref, reads it back and deletes
//! it again; moving the lasting refs is left to the caller, which does it
//! with a compare-and-swap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use git2::{AutotagOption, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository};

use crate::storage::error::{ShelveError, ShelveResult};
use crate::storage::types::CommitId;

const SCRATCH_NAMESPACE: &str = "refs/shelve-fetch";

/// Shared flag that aborts in-flight transfers when set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// clear a previous cancellation so the token can be reused
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Limits applied to one transfer.
///
/// The deadline is fixed when the control is created, so every step of a
/// transfer shares one time budget.
#[derive(Debug, Clone, Default)]
pub struct TransferControl {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl TransferControl {
    pub fn new(cancel: CancelToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Fails with `Cancelled` or a timed out `Transport` error once the
    /// transfer against `url` may no longer continue.
    pub fn check(&self, url: &str) -> ShelveResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ShelveError::Cancelled(url.to_string()));
        }
        if self.expired() {
            return Err(ShelveError::transport(url, "transfer timed out"));
        }
        Ok(())
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn may_continue(&self) -> bool {
        !self.cancel.is_cancelled() && !self.expired()
    }

    fn start(&self, url: &str) -> ShelveResult<Transfer> {
        self.check(url)?;
        Ok(Transfer {
            url: url.to_string(),
            control: self.clone(),
        })
    }
}

/// One running transfer: knows when it has to give up.
struct Transfer {
    url: String,
    control: TransferControl,
}

impl Transfer {
    fn callbacks<'a>(&self) -> RemoteCallbacks<'a> {
        let mut callbacks = RemoteCallbacks::new();

        let control = self.control.clone();
        callbacks.transfer_progress(move |_| control.may_continue());

        let control = self.control.clone();
        callbacks.sideband_progress(move |_| control.may_continue());

        let control = self.control.clone();
        callbacks.push_negotiation(move |_| {
            if control.may_continue() {
                Ok(())
            } else {
                Err(git2::Error::from_str("transfer aborted"))
            }
        });

        callbacks
    }

    /// translate a libgit2 failure, attributing aborts to their cause
    fn failure(&self, err: git2::Error) -> ShelveError {
        match self.control.check(&self.url) {
            Err(abort) => abort,
            Ok(()) => ShelveError::transport(&self.url, err.message()),
        }
    }
}

/// scratch ref unique to this process and thread
fn scratch_ref(url: &str) -> String {
    let thread: String = format!("{:?}", std::thread::current().id())
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let name: String = url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}/{}-{}/{}", SCRATCH_NAMESPACE, std::process::id(), thread, name)
}

/// download every object reachable from the remote's `refname`
///
/// returns the head the remote advertised for `refname`, or `None` when
/// the remote does not have it (an empty remote included). The head is
/// routed through a scratch ref so that it only becomes visible once its
/// objects are local.
pub fn fetch_pack(
    repo: &Repository,
    url: &str,
    refname: &str,
    control: &TransferControl,
) -> ShelveResult<Option<CommitId>> {
    let transfer = control.start(url)?;
    let mut remote = repo
        .remote_anonymous(url)
        .map_err(|e| transfer.failure(e))?;

    let scratch = scratch_ref(url);
    let refspec = format!("+{}:{}", refname, scratch);

    let mut options = FetchOptions::new();
    options
        .remote_callbacks(transfer.callbacks())
        .update_fetchhead(false)
        .download_tags(AutotagOption::None);

    remote
        .fetch(&[refspec.as_str()], Some(&mut options), None)
        .map_err(|e| transfer.failure(e))?;

    let mut reference = match repo.find_reference(&scratch) {
        Ok(reference) => reference,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let head = reference.target().map(CommitId::new);
    reference.delete()?;

    match head {
        Some(head) => Ok(Some(head)),
        None => Err(ShelveError::Internal(format!("{} fetched as a symbolic ref", refname))),
    }
}

/// send `local_ref` and its objects, updating `remote_ref` on the remote
///
/// the update is not forced; a rejection by the remote surfaces as
/// `RefConflict` on the remote ref.
pub fn send_pack(
    repo: &Repository,
    url: &str,
    local_ref: &str,
    remote_ref: &str,
    control: &TransferControl,
) -> ShelveResult<()> {
    let transfer = control.start(url)?;
    let mut remote = repo
        .remote_anonymous(url)
        .map_err(|e| transfer.failure(e))?;

    let refspec = format!("{}:{}", local_ref, remote_ref);
    let mut rejection: Option<String> = None;
    {
        let mut callbacks = transfer.callbacks();
        callbacks.push_update_reference(|refname, status| {
            if let Some(message) = status {
                rejection = Some(format!("{} ({})", refname, message));
            }
            Ok(())
        });

        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        remote
            .push(&[refspec.as_str()], Some(&mut options))
            .map_err(|e| transfer.failure(e))?;
    }

    match rejection {
        Some(reference) => Err(ShelveError::RefConflict { reference }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::blob::{blob_exists, write_blob};
    use crate::storage::commit::CommitBuilder;
    use crate::storage::refs::RefManager;
    use crate::storage::tree::make_tree;
    use crate::storage::types::{ContentHash, TreeEntry};
    use tempfile::TempDir;

    fn bare() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    fn commit_blob(repo: &Repository, content: &[u8], refname: &str) -> CommitId {
        let blob = write_blob(repo, content).unwrap();
        let tree = make_tree(repo, &[TreeEntry::blob("file", blob)]).unwrap();
        let commit = CommitBuilder::new(repo).tree(tree).message("test").commit().unwrap();
        RefManager::create(repo, refname, commit).unwrap();
        commit
    }

    fn no_local_refs(repo: &Repository) -> bool {
        repo.references_glob("refs/*").unwrap().next().is_none()
    }

    #[test]
    fn test_fetch_from_remote_without_refs() {
        let (remote_dir, _remote) = bare();
        let (_local_dir, local) = bare();
        let url = remote_dir.path().to_str().unwrap();

        let head = fetch_pack(&local, url, "refs/heads/shelve", &TransferControl::default()).unwrap();
        assert_eq!(head, None);
        assert!(no_local_refs(&local));
    }

    #[test]
    fn test_fetch_missing_branch() {
        let (remote_dir, remote) = bare();
        let (_local_dir, local) = bare();
        let url = remote_dir.path().to_str().unwrap();
        commit_blob(&remote, b"elsewhere", "refs/heads/other");

        let head = fetch_pack(&local, url, "refs/heads/shelve", &TransferControl::default()).unwrap();
        assert_eq!(head, None);
        assert!(no_local_refs(&local));
    }

    #[test]
    fn test_fetch_brings_objects_and_head() {
        let (remote_dir, remote) = bare();
        let (_local_dir, local) = bare();
        let url = remote_dir.path().to_str().unwrap();

        let commit = commit_blob(&remote, b"remote data", "refs/heads/shelve");
        let blob = ContentHash::new(git2::Oid::hash_object(git2::ObjectType::Blob, b"remote data").unwrap());
        assert!(!blob_exists(&local, blob).unwrap());

        let head = fetch_pack(&local, url, "refs/heads/shelve", &TransferControl::default()).unwrap();
        assert_eq!(head, Some(commit));
        assert!(blob_exists(&local, blob).unwrap());
        assert!(local.find_commit(commit.raw()).is_ok());
        // the scratch ref is gone again
        assert!(no_local_refs(&local));
    }

    #[test]
    fn test_send_pack() {
        let (remote_dir, remote) = bare();
        let (_local_dir, local) = bare();
        let url = remote_dir.path().to_str().unwrap();

        let commit = commit_blob(&local, b"local data", "refs/heads/shelve");
        send_pack(
            &local,
            url,
            "refs/heads/shelve",
            "refs/remotes/me/shelve",
            &TransferControl::default(),
        )
        .unwrap();

        assert_eq!(RefManager::resolve(&remote, "refs/remotes/me/shelve").unwrap(), commit);
        assert!(remote.find_commit(commit.raw()).is_ok());
    }

    #[test]
    fn test_cancelled_before_start() {
        let (remote_dir, _remote) = bare();
        let (_local_dir, local) = bare();
        let url = remote_dir.path().to_str().unwrap();

        let token = CancelToken::new();
        token.cancel();
        let control = TransferControl::new(token.clone(), None);

        let result = fetch_pack(&local, url, "refs/heads/shelve", &control);
        assert!(matches!(result, Err(ShelveError::Cancelled(_))));

        token.reset();
        assert!(!control.cancel_token().is_cancelled());
    }

    #[test]
    fn test_expired_deadline_is_timeout() {
        let (remote_dir, remote) = bare();
        let (_local_dir, local) = bare();
        let url = remote_dir.path().to_str().unwrap();
        let commit = commit_blob(&local, b"late", "refs/heads/shelve");
        commit_blob(&remote, b"remote", "refs/heads/shelve");

        let control = TransferControl::new(CancelToken::new(), Some(Duration::from_millis(20)));
        std::thread::sleep(Duration::from_millis(50));

        let fetched = fetch_pack(&local, url, "refs/heads/shelve", &control);
        assert!(matches!(
            fetched,
            Err(ShelveError::Transport { ref message, .. }) if message == "transfer timed out"
        ));
        let sent = send_pack(&local, url, "refs/heads/shelve", "refs/remotes/me/shelve", &control);
        assert!(matches!(sent, Err(ShelveError::Transport { .. })));
        assert!(remote.find_commit(commit.raw()).is_err());
    }

    #[test]
    fn test_generous_deadline_lets_transfer_finish() {
        let (remote_dir, remote) = bare();
        let (_local_dir, local) = bare();
        let url = remote_dir.path().to_str().unwrap();
        let commit = commit_blob(&remote, b"in time", "refs/heads/shelve");

        let control = TransferControl::new(CancelToken::new(), Some(Duration::from_secs(60)));
        assert_eq!(fetch_pack(&local, url, "refs/heads/shelve", &control).unwrap(), Some(commit));
    }

    #[test]
    fn test_unreachable_remote_is_transport_error() {
        let (_local_dir, local) = bare();
        let missing = TempDir::new().unwrap();
        let url = missing.path().join("does-not-exist.git");

        let result = fetch_pack(
            &local,
            url.to_str().unwrap(),
            "refs/heads/shelve",
            &TransferControl::default(),
        );
        assert!(matches!(result, Err(ShelveError::Transport { .. })));
    }
}
