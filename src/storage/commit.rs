//!  Commit creation and history traversal
//!
//!  commits are the atomic units of change in Git. In a shelve:
//! - each put creates exactly one commit on the branch
//! - the branch history is a linear chain of first parents
//!
//! this module handles commit creation and history walking

use chrono::{DateTime, TimeZone, Utc};
use git2::{ErrorCode, Repository, Revwalk, Sort};

use crate::storage::error::{ShelveError, ShelveResult};
use crate::storage::types::{CommitId, ContentHash, GitSignature, TreeId};

/// information about a commit
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    /// create CommitInfo from a git2::Commit
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let time = commit.time();
        let timestamp = Utc
            .timestamp_opt(time.seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: CommitId::new(commit.id()),
            tree_id: TreeId::new(commit.tree_id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("Unknown").to_string(),
            author_email: author.email().unwrap_or("unknown@unknown").to_string(),
            timestamp,
        }
    }

    /// get the first (or only) parent
    pub fn first_parent(&self) -> Option<CommitId> {
        self.parent_ids.first().copied()
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

/// builder for creating commits with a fluent interface
pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree_id: Option<TreeId>,
    parent: Option<CommitId>,
    message: String,
    signature: GitSignature,
}

impl<'a> CommitBuilder<'a> {
    /// create a new CommitBuilder
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree_id: None,
            parent: None,
            message: String::new(),
            signature: GitSignature::gitshelve(),
        }
    }

    /// set the tree for this commit
    pub fn tree(mut self, tree_id: TreeId) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    /// set the parent commit, if any
    pub fn parent(mut self, parent: Option<CommitId>) -> Self {
        self.parent = parent;
        self
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// set the author/committer signature
    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    /// create the commit and return its ID
    ///
    /// no reference is touched; the commit is unreferenced until a ref is
    /// moved onto it.
    pub fn commit(self) -> ShelveResult<CommitId> {
        let tree_id = self
            .tree_id
            .ok_or_else(|| ShelveError::Internal("commit requires a tree".to_string()))?;

        let tree = self.repo.find_tree(tree_id.raw()).map_err(|e| not_found(e, tree_id.to_string()))?;
        let sig = self.signature.to_git2_signature()?;

        let parent = match self.parent {
            Some(id) => Some(
                self.repo
                    .find_commit(id.raw())
                    .map_err(|e| not_found(e, id.to_string()))?,
            ),
            None => None,
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = self
            .repo
            .commit(None, &sig, &sig, &self.message, &tree, &parents)?;

        Ok(CommitId::new(oid))
    }
}

fn not_found(err: git2::Error, what: String) -> ShelveError {
    if err.code() == ErrorCode::NotFound {
        ShelveError::ObjectNotFound(what)
    } else {
        ShelveError::Git(err)
    }
}

/// get information about a commit
pub fn get_commit(repo: &Repository, id: CommitId) -> ShelveResult<CommitInfo> {
    let commit = repo
        .find_commit(id.raw())
        .map_err(|e| not_found(e, id.to_string()))?;

    Ok(CommitInfo::from_git2(&commit))
}

/// iterate over first-parent history starting from a commit
pub struct HistoryIterator<'repo> {
    repo: &'repo Repository,
    revwalk: Revwalk<'repo>,
}

impl<'repo> HistoryIterator<'repo> {
    /// create a new history iterator
    pub fn new(repo: &'repo Repository, start: CommitId) -> ShelveResult<Self> {
        let mut revwalk = repo.revwalk()?;
        revwalk.push(start.raw())?;
        revwalk.set_sorting(Sort::TOPOLOGICAL)?;
        revwalk.simplify_first_parent()?;

        Ok(Self { repo, revwalk })
    }
}

impl<'repo> Iterator for HistoryIterator<'repo> {
    type Item = ShelveResult<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.revwalk.next()? {
            Ok(oid) => match self.repo.find_commit(oid) {
                Ok(commit) => Some(Ok(CommitInfo::from_git2(&commit))),
                Err(e) => Some(Err(ShelveError::Git(e))),
            },
            Err(e) => Some(Err(ShelveError::Git(e))),
        }
    }
}

/// get history for a commit, newest first
pub fn history(repo: &Repository, start: CommitId) -> ShelveResult<HistoryIterator<'_>> {
    HistoryIterator::new(repo, start)
}

/// message formatting for shelve commits
pub struct CommitMessage;

impl CommitMessage {
    /// message for a commit that adds a blob to the shelve
    pub fn added(hash: &ContentHash) -> String {
        format!("[shelve] Added {}", hash)
    }

    /// message for the bootstrap commit of a fresh branch
    pub fn created_branch(branch: &str) -> String {
        format!("[shelve] Created {} branch", branch)
    }
}
