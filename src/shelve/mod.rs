//! The content shelve: sharded blob storage on a single branch.
//!
//! ```text
//!   ContentShelve ── put/get
//!      │
//!      ├── ShardedTreeBuilder   (new root = old root + one blob)
//!      └── HeadTracker          (resolve / bootstrap / CAS advance)
//! ```

mod config;
mod content;
mod head;
mod shard;

pub use config::{ShelveConfig, DEFAULT_MAX_PUT_RETRIES};
pub use content::ContentShelve;
pub use head::{HeadTracker, PLACEHOLDER_ENTRY};
pub use shard::ShardedTreeBuilder;
