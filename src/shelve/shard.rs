//! Two-level sharded tree maintenance.
//!
//! The root tree holds one sub-tree per 2-hex-character hash prefix; each
//! sub-tree names its blobs by the remaining 38 characters:
//!
//! ```text
//! root
//! ├── _shelve            (bootstrap placeholder)
//! ├── 3a/
//! │   ├── 4f0c...e1      -> blob 3a4f0c...e1
//! │   └── 9b21...07      -> blob 3a9b21...07
//! └── e3/
//!     └── 0b41...50      -> blob e30b41...50
//! ```
//!
//! Inserting rewrites exactly two trees, the touched shard and the root.
//! Every other shard is carried over by id.

use tracing::debug;

use crate::storage::{ContentHash, ObjectStore, ShelveResult, TreeEntry, TreeId};

/// Builds new root trees that add one blob to the sharded layout.
pub struct ShardedTreeBuilder<'a, S: ObjectStore> {
    store: &'a S,
}

impl<'a, S: ObjectStore> ShardedTreeBuilder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Return the id of a root tree equal to `root` plus `hash`.
    ///
    /// `root == None` starts from an empty tree. Inserting a hash that is
    /// already present yields a tree with the same entries.
    pub fn insert(&self, hash: ContentHash, root: Option<TreeId>) -> ShelveResult<TreeId> {
        let prefix = hash.prefix();
        let suffix = hash.suffix();

        let mut root_entries = match root {
            Some(id) => self.store.list_tree(id, None)?,
            None => Vec::new(),
        };

        let existing_shard = root_entries
            .iter()
            .find(|entry| entry.name == prefix)
            .and_then(TreeEntry::as_tree);

        let mut shard_entries = match existing_shard {
            Some(id) => self.store.list_tree(id, None)?,
            None => Vec::new(),
        };
        shard_entries.retain(|entry| entry.name != suffix);
        shard_entries.push(TreeEntry::blob(suffix, hash));
        let shard = self.store.make_tree(&shard_entries)?;

        root_entries.retain(|entry| entry.name != prefix);
        root_entries.push(TreeEntry::tree(prefix.as_str(), shard));
        let new_root = self.store.make_tree(&root_entries)?;

        debug!(
            hash = %hash.short(),
            shard = %prefix,
            shard_entries = shard_entries.len(),
            root_entries = root_entries.len(),
            "rewrote shard"
        );
        Ok(new_root)
    }
}
