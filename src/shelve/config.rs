//! Shelve configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::replication::RemoteEndpoint;
use crate::storage::{BranchName, GitObjectStore, GitSignature, ShelveResult};

/// Retries of the resolve/build/CAS cycle before a put gives up.
pub const DEFAULT_MAX_PUT_RETRIES: usize = 16;

/// Shelve configuration options.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShelveConfig {
    /// Locator of the backing store.
    pub store: PathBuf,
    /// Branch that holds the sharded tree.
    pub branch: String,
    /// Initialize a bare store if none exists.
    pub create_if_missing: bool,
    /// CAS retries per put.
    pub max_put_retries: usize,
    /// Author and committer of shelve commits.
    pub signature: GitSignature,
    /// Initial remote set; empty endpoints are rejected at load time.
    pub remotes: Vec<RemoteEndpoint>,
    /// Namespace this store pushes under; defaults to the store locator.
    pub identity: Option<String>,
    /// Per-transfer timeout for fetch and push, in milliseconds. `0` means
    /// no timeout.
    pub transfer_timeout_ms: Option<u64>,
}

impl Default for ShelveConfig {
    fn default() -> Self {
        Self {
            store: PathBuf::from(".gitshelve"),
            branch: BranchName::DEFAULT.to_string(),
            create_if_missing: true,
            max_put_retries: DEFAULT_MAX_PUT_RETRIES,
            signature: GitSignature::gitshelve(),
            remotes: Vec::new(),
            identity: None,
            transfer_timeout_ms: None,
        }
    }
}

impl ShelveConfig {
    /// Create a new configuration for the given store.
    pub fn new(store: impl Into<PathBuf>) -> Self {
        Self {
            store: store.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> ShelveResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn max_put_retries(mut self, value: usize) -> Self {
        self.max_put_retries = value;
        self
    }

    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Add a remote to the initial set.
    pub fn remote(mut self, endpoint: RemoteEndpoint) -> Self {
        self.remotes.push(endpoint);
        self
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Sub-millisecond remainders round up, so a non-zero timeout never
    /// becomes "no time at all".
    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        let ms = timeout.as_nanos().div_ceil(1_000_000);
        self.transfer_timeout_ms = Some(u64::try_from(ms).unwrap_or(u64::MAX));
        self
    }

    /// The validated branch name.
    pub fn branch_name(&self) -> ShelveResult<BranchName> {
        Ok(BranchName::new(self.branch.as_str())?)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.transfer_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Open the configured store, initializing it when allowed.
    pub fn open_store(&self) -> ShelveResult<GitObjectStore> {
        let store = if self.create_if_missing {
            GitObjectStore::open_or_init(&self.store)?
        } else {
            GitObjectStore::open(&self.store)?
        };
        Ok(store.with_signature(self.signature.clone()))
    }
}
