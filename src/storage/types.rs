//! core type-safe wrappers around git primitives for the storage layer.

use std::fmt;
use std::fmt::Formatter;

use git2::{FileMode, Oid};
use serde::{Deserialize, Serialize};

use crate::storage::error::{ShelveError, ShelveResult};

/// Number of hex characters used to pick a shard sub-tree.
pub const SHARD_PREFIX_LEN: usize = 2;

fn parse_oid(hex: &str, what: &str) -> ShelveResult<Oid> {
    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ShelveError::InvalidArgument(format!(
            "{} must be 40 hex characters, got {:?}",
            what, hex
        )));
    }
    Oid::from_str(hex).map_err(|e| ShelveError::InvalidArgument(e.message().to_string()))
}

/// Identifier of a stored blob, derived from its bytes.
///
/// Two puts of identical bytes always yield the same hash. The hex form
/// splits into a 2-character shard prefix and the remaining suffix, which
/// together locate the blob inside the sharded tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub(crate) Oid);

impl ContentHash {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    /// raw Oid (for internal use only)
    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse a ContentHash from its 40 character hex form
    pub fn from_hex(hex: &str) -> ShelveResult<Self> {
        parse_oid(hex, "content hash").map(Self)
    }

    /// full lowercase hex form
    pub fn to_hex(&self) -> String {
        self.0.to_string()
    }

    /// name of the shard sub-tree this hash lives in
    pub fn prefix(&self) -> String {
        self.to_hex()[..SHARD_PREFIX_LEN].to_string()
    }

    /// entry name inside the shard sub-tree
    pub fn suffix(&self) -> String {
        self.to_hex()[SHARD_PREFIX_LEN..].to_string()
    }

    /// rebuild a hash from a shard name and an entry name
    pub fn from_parts(prefix: &str, suffix: &str) -> ShelveResult<Self> {
        Self::from_hex(&format!("{}{}", prefix, suffix))
    }

    pub fn short(&self) -> String {
        self.to_hex()[..7].to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// This makes sure we don't accidentally pass a blob hash where a commit ID
/// is expected. The inner Oid is only accessible within the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse CommitId from a hex string
    pub fn from_hex(hex: &str) -> ShelveResult<Self> {
        parse_oid(hex, "commit id").map(Self)
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git tree identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTarget {
    Blob(ContentHash),
    Tree(TreeId),
}

/// One immutable row of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub target: EntryTarget,
    pub(crate) filemode: i32,
}

impl TreeEntry {
    /// a regular (non-executable) blob entry
    pub fn blob(name: impl Into<String>, hash: ContentHash) -> Self {
        Self {
            name: name.into(),
            target: EntryTarget::Blob(hash),
            filemode: FileMode::Blob.into(),
        }
    }

    /// a sub-tree entry
    pub fn tree(name: impl Into<String>, id: TreeId) -> Self {
        Self {
            name: name.into(),
            target: EntryTarget::Tree(id),
            filemode: FileMode::Tree.into(),
        }
    }

    /// the git file mode of this entry
    pub fn mode(&self) -> i32 {
        self.filemode
    }

    pub fn as_tree(&self) -> Option<TreeId> {
        match self.target {
            EntryTarget::Tree(id) => Some(id),
            EntryTarget::Blob(_) => None,
        }
    }

    pub fn as_blob(&self) -> Option<ContentHash> {
        match self.target {
            EntryTarget::Blob(hash) => Some(hash),
            EntryTarget::Tree(_) => None,
        }
    }

    pub(crate) fn oid(&self) -> Oid {
        match self.target {
            EntryTarget::Blob(hash) => hash.raw(),
            EntryTarget::Tree(id) => id.raw(),
        }
    }
}

/// A validated branch name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    /// the branch used when nothing else is configured
    pub const DEFAULT: &'static str = "shelve";

    /// create a new BranchName
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        // git is more permissive, but a branch name also ends up inside
        // mirror ref paths so we stay restrictive
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(name));
        }
        for (i, c) in name.chars().enumerate() {
            if c.is_whitespace() || c.is_control() || matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }
        Ok(Self(name))
    }

    /// get the full ref path (e.g., "refs/heads/shelve")
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    /// get the short name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BranchName {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// git signature (author/committer info)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    /// create a new signature
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// default signature for shelve commits
    pub fn gitshelve() -> Self {
        Self::new("GitShelve", "gitshelve@localhost")
    }

    /// convert to git2::Signature
    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::gitshelve()
    }
}

/// error type for invalid branch names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}
