//! Storage layer error types
//!
//! All errors that can occur while talking to the object store are defined
//! here. We use `thiserror` for ergonomic error definition and better error
//! messages.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::InvalidNameError;

/// the main error type for shelve operations
#[derive(Debug, Error)]
pub enum ShelveError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// the requested object is unknown to the store
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// the specified branch/ref was not found
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// a compare-and-swap ref update was rejected
    #[error("ref conflict: {reference} was updated concurrently")]
    RefConflict { reference: String },

    /// caller supplied a malformed value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// invalid branch name
    #[error("invalid branch name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// network fetch/push failure against one remote
    #[error("transport error ({remote}): {message}")]
    Transport { remote: String, message: String },

    /// an object exists but is not of the expected kind
    #[error("unexpected object type for {id}: expected {expected}, found {found}")]
    UnexpectedObjectType {
        id: String,
        expected: String,
        found: String,
    },

    /// I/O error (filesystem level, or raised by a streaming callback)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// configuration could not be parsed
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// repo is not initialized
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// the operation was cancelled before it completed
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl ShelveError {
    pub(crate) fn transport(remote: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ShelveError::Transport {
            remote: remote.into(),
            message: err.to_string(),
        }
    }

    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ShelveError::ObjectNotFound(_) | ShelveError::RefNotFound(_)
        )
    }

    /// check if this error is a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, ShelveError::RefConflict { .. })
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(self, ShelveError::RefConflict { .. })
    }
}

/// result type alias for shelve operations
pub type ShelveResult<T> = Result<T, ShelveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = ShelveError::ObjectNotFound("e30b41f".to_string());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());
        assert!(!not_found.is_retriable());

        let conflict = ShelveError::RefConflict {
            reference: "refs/heads/shelve".to_string(),
        };
        assert!(!conflict.is_not_found());
        assert!(conflict.is_conflict());
        assert!(conflict.is_retriable());

        let transport = ShelveError::transport("/srv/other.git", "connection refused");
        assert!(!transport.is_not_found());
        assert_eq!(
            transport.to_string(),
            "transport error (/srv/other.git): connection refused"
        );
    }
}
