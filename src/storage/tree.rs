//!  tree operations for the sharded layout.
//!
//! in Git, a tree is a directory. In a shelve:
//! - the root tree contains one sub-tree per shard prefix
//! - each shard sub-tree contains blob entries named by the hash suffix
//! - the very first commit carries a single marker blob at the root
//!
//! trees are immutable, so "changing" one means listing its entries and
//! writing a new tree from an edited list.

use std::path::Path;

use git2::{ErrorCode, ObjectType, Repository};

use crate::storage::error::{ShelveError, ShelveResult};
use crate::storage::types::{ContentHash, EntryTarget, TreeEntry, TreeId};

fn convert_entry(entry: &git2::TreeEntry<'_>) -> ShelveResult<TreeEntry> {
    let name = entry
        .name()
        .ok_or_else(|| ShelveError::Internal(format!("non utf-8 tree entry name for {}", entry.id())))?
        .to_string();

    let target = match entry.kind() {
        Some(ObjectType::Blob) => EntryTarget::Blob(ContentHash::new(entry.id())),
        Some(ObjectType::Tree) => EntryTarget::Tree(TreeId::new(entry.id())),
        other => {
            return Err(ShelveError::UnexpectedObjectType {
                id: entry.id().to_string(),
                expected: "blob or tree".to_string(),
                found: format!("{:?}", other),
            })
        }
    };

    Ok(TreeEntry {
        name,
        target,
        filemode: entry.filemode(),
    })
}

/// list the direct entries of a tree
///
/// with a `path`, the entries of the sub-tree at that path are listed
/// instead. A path naming nothing yields an empty list; a path naming a
/// blob yields just that entry.
pub fn list_tree(repo: &Repository, tree_id: TreeId, path: Option<&str>) -> ShelveResult<Vec<TreeEntry>> {
    let tree = repo.find_tree(tree_id.raw()).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            ShelveError::ObjectNotFound(tree_id.to_string())
        } else {
            ShelveError::Git(e)
        }
    })?;

    let path = match path {
        Some(p) if !p.is_empty() => p,
        _ => return tree.iter().map(|entry| convert_entry(&entry)).collect(),
    };

    let entry = match tree.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ShelveError::Git(e)),
    };

    match entry.kind() {
        Some(ObjectType::Tree) => {
            let sub = repo.find_tree(entry.id())?;
            sub.iter().map(|entry| convert_entry(&entry)).collect()
        }
        _ => Ok(vec![convert_entry(&entry)?]),
    }
}

/// build a tree object from a list of entries
///
/// entries with a repeated name keep the last occurrence.
pub fn make_tree(repo: &Repository, entries: &[TreeEntry]) -> ShelveResult<TreeId> {
    let mut builder = repo.treebuilder(None)?;
    for entry in entries {
        builder.insert(&entry.name, entry.oid(), entry.filemode)?;
    }
    let oid = builder.write()?;
    Ok(TreeId::new(oid))
}
