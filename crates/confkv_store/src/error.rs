//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the link dropped mid-request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store handle has been closed.
    #[error("store connection is closed")]
    Closed,

    /// A request did not complete within the request timeout.
    #[error("store request timed out")]
    Timeout,

    /// The peer sent something that is not a valid response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The store refused the request.
    #[error("request rejected by store: {0}")]
    Rejected(String),

    /// The encoded request exceeds the transport's frame limit. Nothing was
    /// sent.
    #[error("request of {len} bytes exceeds limit of {max} bytes")]
    TooLarge {
        /// Encoded size.
        len: usize,
        /// Largest size the transport accepts.
        max: usize,
    },
}

impl StoreError {
    /// Returns true if retrying the same request later might succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout)
    }
}
