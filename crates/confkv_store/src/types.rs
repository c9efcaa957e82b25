//! Value types shared by every store implementation and the wire protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Store revision.
///
/// The store keeps one global revision that grows by one per applied
/// mutation. Each key remembers the global revision of its last
/// modification. A key that does not exist has revision [`Revision::ZERO`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// Revision of an absent key.
    pub const ZERO: Revision = Revision(0);

    /// Creates a new revision.
    #[must_use]
    pub const fn new(rev: u64) -> Self {
        Self(rev)
    }

    /// Returns the raw revision value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next revision.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rev:{}", self.0)
    }
}

/// A key read from the store together with its modification revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// The key.
    pub key: Vec<u8>,
    /// The stored bytes.
    pub value: Vec<u8>,
    /// Global revision at which this key was last written.
    pub mod_revision: Revision,
}

/// Predicate asserting that a key has not changed since it was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compare {
    /// The key to check.
    pub key: Vec<u8>,
    /// Expected modification revision; [`Revision::ZERO`] means "absent".
    pub mod_revision: Revision,
}

impl Compare {
    /// Creates a new compare predicate.
    pub fn new(key: impl Into<Vec<u8>>, mod_revision: Revision) -> Self {
        Self {
            key: key.into(),
            mod_revision,
        }
    }
}

/// A single mutation inside a transaction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Store `value` under `key`.
    Put {
        /// Target key.
        key: Vec<u8>,
        /// New value.
        value: Vec<u8>,
    },
    /// Remove `key`. Removing an absent key is a no-op.
    Delete {
        /// Target key.
        key: Vec<u8>,
    },
}

impl WriteOp {
    /// Creates a put.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        WriteOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a delete.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        WriteOp::Delete { key: key.into() }
    }

    /// Returns the key this write targets.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// An atomic compare-then-write request.
///
/// The store evaluates every compare; only if all of them hold are the
/// writes applied, all under one new revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnRequest {
    /// Predicates that must all hold.
    pub compares: Vec<Compare>,
    /// Writes applied if the predicates hold.
    pub writes: Vec<WriteOp>,
}

impl TxnRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a compare predicate.
    #[must_use]
    pub fn compare(mut self, compare: Compare) -> Self {
        self.compares.push(compare);
        self
    }

    /// Adds a write.
    #[must_use]
    pub fn write(mut self, write: WriteOp) -> Self {
        self.writes.push(write);
        self
    }

    /// Returns true if the request carries neither compares nor writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compares.is_empty() && self.writes.is_empty()
    }
}

/// Outcome of a [`TxnRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnResponse {
    /// Whether every compare held and the writes were applied.
    pub succeeded: bool,
    /// Global store revision after the request was evaluated.
    pub revision: Revision,
}
