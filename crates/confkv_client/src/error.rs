//! Error types for the client.

use confkv_store::StoreError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for connection setup.
pub type ConnectResult<T> = Result<T, ConnectError>;

/// Result type for key-value and transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors raised while opening a connection.
///
/// These are fatal at startup; the client never retries them on its own.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The configuration lists no endpoints.
    #[error("no store endpoints configured")]
    NoEndpoints,

    /// TLS is enabled but a required path is not set.
    #[error("TLS enabled but no {material} path configured")]
    TlsPathMissing {
        /// Which material is missing ("certificate", "key", "trusted CA").
        material: &'static str,
    },

    /// A TLS file could not be read or held no usable material.
    #[error("failed to load TLS material from {path:?}: {reason}")]
    TlsMaterial {
        /// Offending file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The TLS client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// An endpoint refused or failed the connection.
    #[error("endpoint {endpoint} unreachable: {reason}")]
    Unreachable {
        /// Endpoint address.
        endpoint: String,
        /// What went wrong.
        reason: String,
    },

    /// A connection was established but the peer did not answer as a store.
    #[error("handshake with {endpoint} failed: {reason}")]
    Handshake {
        /// Endpoint address.
        endpoint: String,
        /// What went wrong.
        reason: String,
    },

    /// No endpoint could be reached within the dial timeout.
    #[error("no endpoint reachable within {0:?}")]
    DialTimeout(Duration),
}

/// Errors surfaced by key-value operations and transactions.
///
/// Commit conflicts never appear here directly; they are retried inside the
/// engine and only show up as [`TxnError::RetriesExhausted`].
#[derive(Error, Debug)]
pub enum TxnError {
    /// The store failed or could not be reached.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The call context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The call context's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Every allowed attempt ended in a commit conflict.
    #[error("transaction gave up after {attempts} conflicting attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The transaction handle was used after its attempt ended.
    #[error("transaction handle is no longer active")]
    TransactionClosed,

    /// The operation aborted the transaction.
    #[error("transaction aborted: {0}")]
    Aborted(String),
}

impl TxnError {
    /// Creates an abort error carrying a reason.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }

    /// Returns true for cancellation and deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TxnError::Cancelled | TxnError::DeadlineExceeded)
    }

    /// Returns true if the caller may reasonably run the whole transaction
    /// again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            TxnError::Store(e) => e.is_transient(),
            TxnError::RetriesExhausted { .. } => true,
            _ => false,
        }
    }
}
