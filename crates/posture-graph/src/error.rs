//! Error types for the graph store client

/// Errors surfaced by a [`GraphStore`](crate::GraphStore) or one of its cursors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable, timed out, or answered with a server-side failure
    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    /// Store rejected the query text or its bind variables
    #[error("query rejected: {0}")]
    Query(String),

    /// Collection does not exist
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// Document could not be encoded or decoded at the store boundary
    #[error("malformed document: {0}")]
    Malformed(String),

    /// Invalid node reference
    #[error("invalid node reference: {0}")]
    InvalidRef(String),

    /// Client-side configuration error
    #[error("store configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Check if the failure is transient (worth retrying on a later cycle)
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
