//! storage layer for gitshelve
//!
//! this module provides the object store abstraction over git. The upper
//! layers (content shelve, replicator) use the [`ObjectStore`] trait and
//! never touch git2 directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              ObjectStore  (GitObjectStore)                  │
//! │  (blobs, trees, commits, CAS refs, transfer, integrity)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │    blob     │       │    refs     │
//!  │  (shards)   │       │  (content)  │       │   (CAS)     │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               │
//!                  ┌────────────┼────────────┐
//!                  ▼            ▼            ▼
//!           ┌───────────┐ ┌───────────┐ ┌───────────┐
//!           │  commit   │ │  remote   │ │   fsck    │
//!           │ (history) │ │(transfer) │ │(integrity)│
//!           └───────────┘ └───────────┘ └───────────┘
//!  ```
//!
//! # Usage
//!
//! ```no_run
//! use gitshelve::storage::{GitObjectStore, ObjectStore, TreeEntry};
//!
//! # fn main() -> gitshelve::storage::ShelveResult<()> {
//! let store = GitObjectStore::open_or_init("./my_store.git")?;
//!
//! let hash = store.write_blob(b"hello")?;
//! let tree = store.make_tree(&[TreeEntry::blob("hello", hash)])?;
//! let commit = store.make_commit(tree, None, "first")?;
//! store.cas_update_ref("refs/heads/scratch", None, commit)?;
//!
//! assert_eq!(store.read_blob(hash)?, b"hello");
//! # Ok(())
//! # }
//! ```

mod blob;
mod commit;
mod error;
mod fsck;
mod refs;
mod remote;
mod repository;
mod store;
mod tree;
mod types;

// Re-export public API
pub use commit::{CommitInfo, CommitMessage};
pub use error::{ShelveError, ShelveResult};
pub use fsck::IntegrityReport;
pub use remote::{CancelToken, TransferControl};
pub use repository::GitObjectStore;
pub use store::ObjectStore;
pub use types::{
    BranchName, CommitId, ContentHash, EntryTarget, GitSignature, InvalidNameError, TreeEntry, TreeId,
    SHARD_PREFIX_LEN,
};
