//! Store trait definition.

use crate::error::StoreResult;
use crate::types::{KeyValue, Revision, TxnRequest, TxnResponse};
use async_trait::async_trait;

/// A linearizable, revisioned key-value store.
///
/// Stores are **opaque byte stores**: keys and values are never interpreted.
/// The transaction layer relies only on the guarantees listed here.
///
/// # Invariants
///
/// - Every read observes the effect of every write that completed before it
///   started.
/// - Each applied mutation bumps the global revision by exactly one, and
///   the touched keys take that revision as their `mod_revision`.
/// - [`txn`](KvStore::txn) is all-or-nothing: when `succeeded` is false no
///   write in the request took effect.
/// - Implementations must be `Send + Sync`; a single handle is shared by
///   every concurrent transaction attempt.
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - single-process store
/// - `confkv_client::Connection` - network client for a remote store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads a key.
    ///
    /// Returns `None` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn get(&self, key: &[u8]) -> StoreResult<Option<KeyValue>>;

    /// Writes a key, returning the revision of the write.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn put(&self, key: &[u8], value: Vec<u8>) -> StoreResult<Revision>;

    /// Deletes a key, returning the store revision afterwards.
    ///
    /// Deleting an absent key succeeds and leaves the revision unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn delete(&self, key: &[u8]) -> StoreResult<Revision>;

    /// Atomically applies `request.writes` if every compare holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached. A failed compare is
    /// not an error; it is reported through [`TxnResponse::succeeded`].
    async fn txn(&self, request: TxnRequest) -> StoreResult<TxnResponse>;

    /// Returns the current global revision.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn current_revision(&self) -> StoreResult<Revision>;
}
