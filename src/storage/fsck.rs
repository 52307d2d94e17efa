//! Object graph consistency check.
//!
//! Walks everything reachable from every reference and compares it with the
//! contents of the object database:
//! - a *broken* link is an object referenced by a commit or tree (or a ref)
//!   that the database does not have
//! - a *dangling* object is stored but reachable from no reference

use std::collections::HashSet;

use git2::{ErrorCode, ObjectType, Oid, Repository};
use serde::Serialize;

use crate::storage::error::ShelveResult;

/// result of an integrity check
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    /// distinct objects in the object database
    pub objects: usize,
    /// objects reachable from some reference
    pub reachable: usize,
    pub dangling: Vec<String>,
    pub broken: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty() && self.broken.is_empty()
    }
}

fn reference_roots(repo: &Repository) -> ShelveResult<Vec<(String, Oid)>> {
    let mut roots = Vec::new();
    for reference in repo.references()? {
        let reference = reference?;
        let name = reference.name().unwrap_or("<non utf-8 ref>").to_string();
        // unborn symbolic refs point nowhere and are fine
        let resolved = match reference.resolve() {
            Ok(r) => r,
            Err(e) if e.code() == ErrorCode::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if let Some(oid) = resolved.target() {
            roots.push((name, oid));
        }
    }
    Ok(roots)
}

/// run the check over the whole repository
pub fn check_integrity(repo: &Repository) -> ShelveResult<IntegrityReport> {
    let mut reachable: HashSet<Oid> = HashSet::new();
    let mut broken = Vec::new();

    let mut stack: Vec<(Oid, String)> = reference_roots(repo)?
        .into_iter()
        .map(|(name, oid)| (oid, name))
        .collect();

    while let Some((oid, referrer)) = stack.pop() {
        if reachable.contains(&oid) {
            continue;
        }

        let object = match repo.find_object(oid, None) {
            Ok(object) => object,
            Err(e) if e.code() == ErrorCode::NotFound => {
                broken.push(format!("missing {} (referenced by {})", oid, referrer));
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        reachable.insert(oid);

        let from = oid.to_string();
        match object.kind() {
            Some(ObjectType::Commit) => {
                if let Some(commit) = object.as_commit() {
                    stack.push((commit.tree_id(), from.clone()));
                    for parent in commit.parent_ids() {
                        stack.push((parent, from.clone()));
                    }
                }
            }
            Some(ObjectType::Tree) => {
                if let Some(tree) = object.as_tree() {
                    for entry in tree.iter() {
                        // gitlinks point into other repositories
                        if entry.kind() == Some(ObjectType::Commit) {
                            continue;
                        }
                        stack.push((entry.id(), from.clone()));
                    }
                }
            }
            Some(ObjectType::Tag) => {
                if let Some(tag) = object.as_tag() {
                    stack.push((tag.target_id(), from));
                }
            }
            _ => {}
        }
    }

    let mut stored: HashSet<Oid> = HashSet::new();
    repo.odb()?.foreach(|oid| {
        stored.insert(*oid);
        true
    })?;

    let mut dangling: Vec<String> = stored
        .iter()
        .filter(|oid| !reachable.contains(*oid))
        .map(|oid| oid.to_string())
        .collect();
    dangling.sort();
    broken.sort();

    Ok(IntegrityReport {
        objects: stored.len(),
        reachable: reachable.len(),
        dangling,
        broken,
    })
}
