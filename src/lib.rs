//! GitShelve - a content-addressable blob store in a Git branch
//!
//! Blobs are stored as git objects and indexed in a two-level tree, sharded
//! by the first two hex characters of their hash, on a dedicated branch.
//! Every put is one commit advanced by compare-and-swap, and stores can
//! replicate to each other with fetch and push.
//!
//! # Example
//!
//! ```no_run
//! use gitshelve::{ContentShelve, ShelveConfig};
//!
//! let shelve = ContentShelve::open(&ShelveConfig::new("./blobs.git")).unwrap();
//! let hash = shelve.put(b"some data").unwrap();
//! assert_eq!(shelve.get(hash).unwrap(), b"some data");
//!
//! let streamed = shelve
//!     .put_with(|w| {
//!         w.write_all(b"i can ")?;
//!         w.write_all(b"stream my data")
//!     })
//!     .unwrap();
//! assert!(shelve.contains(streamed).unwrap());
//! ```

pub mod replication;
pub mod shelve;
pub mod storage;

pub use replication::{FetchReport, PushReport, RemoteEndpoint, Replicator};
pub use shelve::{ContentShelve, HeadTracker, ShardedTreeBuilder, ShelveConfig};
pub use storage::{ContentHash, GitObjectStore, ObjectStore, ShelveError, ShelveResult};
