//! Remote endpoints and the refs named after them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::storage::{BranchName, ShelveError, ShelveResult};

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// The address of another store: a URL or a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteEndpoint(String);

impl RemoteEndpoint {
    /// Fails with `InvalidArgument` for an empty endpoint.
    pub fn new(endpoint: impl Into<String>) -> ShelveResult<Self> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(ShelveError::InvalidArgument(format!(
                "remote endpoint must not be empty (got {:?})",
                endpoint
            )));
        }
        Ok(Self(endpoint))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The endpoint reduced to a ref-safe path component.
    pub fn sanitized(&self) -> String {
        sanitize(&self.0)
    }

    /// Local ref recording the last fetched head of `branch` on this remote.
    pub fn mirror_ref(&self, branch: &BranchName) -> String {
        format!("refs/remotes/{}/{}", self.sanitized(), branch)
    }
}

impl TryFrom<String> for RemoteEndpoint {
    type Error = ShelveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RemoteEndpoint> for String {
    fn from(endpoint: RemoteEndpoint) -> Self {
        endpoint.0
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
