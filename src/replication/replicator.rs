//! Replication of a shelve across remote stores.
//!
//! Fetching keeps one mirror ref per remote
//! (`refs/remotes/<sanitized endpoint>/<branch>`). Pushing always fetches
//! from the same remote first, then sends the local branch into the
//! remote's `refs/remotes/<sanitized identity>/<branch>`. Remotes are
//! independent: one failing remote is logged and reported, the others still
//! run.

use std::io::{self, Read};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::replication::endpoint::{sanitize, RemoteEndpoint};
use crate::shelve::{ContentShelve, ShelveConfig};
use crate::storage::{
    CancelToken, CommitId, ContentHash, GitObjectStore, ObjectStore, ShelveError, ShelveResult, TransferControl,
};

/// Per-remote outcome of [`Replicator::fetch`].
#[derive(Debug, Default)]
pub struct FetchReport {
    /// `Ok(None)` when the remote does not have the branch.
    pub results: Vec<(RemoteEndpoint, ShelveResult<Option<CommitId>>)>,
}

impl FetchReport {
    pub fn is_ok(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&RemoteEndpoint, &ShelveError)> {
        self.results.iter().filter_map(|(remote, r)| r.as_ref().err().map(|e| (remote, e)))
    }
}

/// Per-remote outcome of [`Replicator::push`].
///
/// A remote whose fetch failed carries that fetch error and was not pushed.
#[derive(Debug, Default)]
pub struct PushReport {
    pub results: Vec<(RemoteEndpoint, ShelveResult<()>)>,
}

impl PushReport {
    pub fn is_ok(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&RemoteEndpoint, &ShelveError)> {
        self.results.iter().filter_map(|(remote, r)| r.as_ref().err().map(|e| (remote, e)))
    }
}

/// A content shelve plus a set of remotes it synchronizes with.
///
/// The remote set must not be changed while a fetch or push is running on
/// another thread; `add_remote` takes a write lock and waits for it.
pub struct Replicator<S: ObjectStore> {
    shelve: ContentShelve<S>,
    remotes: RwLock<Vec<RemoteEndpoint>>,
    identity: String,
    cancel: CancelToken,
    timeout: Option<Duration>,
}

impl Replicator<GitObjectStore> {
    /// Open the shelve and remote set named by a configuration.
    pub fn open(config: &ShelveConfig) -> ShelveResult<Self> {
        let mut replicator = Self::new(ContentShelve::open(config)?);
        if let Some(identity) = &config.identity {
            replicator = replicator.with_identity(identity.as_str());
        }
        replicator.timeout = config.timeout();
        for remote in &config.remotes {
            replicator.add_remote(remote.as_str())?;
        }
        Ok(replicator)
    }
}

impl<S: ObjectStore> Replicator<S> {
    pub fn new(shelve: ContentShelve<S>) -> Self {
        let identity = shelve.store().locator();
        Self {
            shelve,
            remotes: RwLock::new(Vec::new()),
            identity,
            cancel: CancelToken::new(),
            timeout: None,
        }
    }

    /// Name this store pushes under on remotes.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Time budget of each single fetch or push against one remote.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Share a cancellation token with the caller.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts transfers in flight.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn shelve(&self) -> &ContentShelve<S> {
        &self.shelve
    }

    pub fn put(&self, data: &[u8]) -> ShelveResult<ContentHash> {
        self.shelve.put(data)
    }

    /// Add a remote. Returns `false` if it was already present.
    pub fn add_remote(&self, endpoint: impl Into<String>) -> ShelveResult<bool> {
        let endpoint = RemoteEndpoint::new(endpoint)?;
        let mut remotes = self.remotes.write();
        if remotes.contains(&endpoint) {
            return Ok(false);
        }
        debug!(remote = %endpoint, "added remote");
        remotes.push(endpoint);
        Ok(true)
    }

    pub fn remotes(&self) -> Vec<RemoteEndpoint> {
        self.remotes.read().clone()
    }

    /// Fetch from every remote in order.
    pub fn fetch(&self) -> FetchReport {
        let mut report = FetchReport::default();
        for remote in self.remotes() {
            let result = self.fetch_from(&remote);
            if let Err(e) = &result {
                warn!(remote = %remote, error = %e, "fetch failed");
            }
            report.results.push((remote, result));
        }
        report
    }

    /// Fetch the branch from one remote and move its mirror ref.
    ///
    /// Returns the remote head, or `None` if the remote lacks the branch.
    /// The mirror only moves to heads whose objects arrived.
    pub fn fetch_from(&self, remote: &RemoteEndpoint) -> ShelveResult<Option<CommitId>> {
        let store = self.shelve.store();
        let branch_ref = self.shelve.branch().as_ref_path();

        let head = match store.fetch_pack(remote.as_str(), &branch_ref, &self.control())? {
            Some(head) => head,
            None => {
                debug!(remote = %remote, branch = %self.shelve.branch(), "remote has no branch yet");
                return Ok(None);
            }
        };

        let mirror = remote.mirror_ref(self.shelve.branch());
        let current = match store.resolve_ref(&mirror) {
            Ok(id) => Some(id),
            Err(ShelveError::RefNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if current != Some(head) {
            store.cas_update_ref(&mirror, current, head)?;
        }

        info!(remote = %remote, head = %head.short(), mirror = %mirror, "fetched");
        Ok(Some(head))
    }

    /// For every remote: fetch from it, then push to it.
    pub fn push(&self) -> PushReport {
        let mut report = PushReport::default();
        for remote in self.remotes() {
            if let Err(e) = self.fetch_from(&remote) {
                warn!(remote = %remote, error = %e, "fetch before push failed, skipping push");
                report.results.push((remote, Err(e)));
                continue;
            }
            let result = self.push_to(&remote);
            if let Err(e) = &result {
                warn!(remote = %remote, error = %e, "push failed");
            }
            report.results.push((remote, result));
        }
        report
    }

    /// Send the local branch to one remote without forcing.
    pub fn push_to(&self, remote: &RemoteEndpoint) -> ShelveResult<()> {
        let branch = self.shelve.branch();
        let head = self.shelve.head()?;
        let remote_ref = format!("refs/remotes/{}/{}", sanitize(&self.identity), branch);

        self.shelve
            .store()
            .send_pack(remote.as_str(), &branch.as_ref_path(), &remote_ref, &self.control())?;

        info!(remote = %remote, head = %head.short(), remote_ref = %remote_ref, "pushed");
        Ok(())
    }

    /// Read a blob, fetching once from all remotes if it is not local.
    pub fn get(&self, hash: ContentHash, allow_fetch: bool) -> ShelveResult<Vec<u8>> {
        self.get_with(hash, allow_fetch, |source| {
            let mut data = Vec::new();
            source.read_to_end(&mut data)?;
            Ok(data)
        })
    }

    /// Stream a blob through `f`, fetching once if it is not local.
    ///
    /// `f` is only called once the blob is present.
    pub fn get_with<T, F>(&self, hash: ContentHash, allow_fetch: bool, mut f: F) -> ShelveResult<T>
    where
        F: FnMut(&mut dyn Read) -> io::Result<T>,
    {
        let mut fetched = false;
        loop {
            match self.shelve.get_with(hash, &mut f) {
                Err(ShelveError::ObjectNotFound(_)) if allow_fetch && !fetched => {
                    fetched = true;
                    debug!(hash = %hash.short(), "not found locally, fetching");
                    self.fetch();
                }
                other => return other,
            }
        }
    }

    fn control(&self) -> TransferControl {
        TransferControl::new(self.cancel.clone(), self.timeout)
    }
}
