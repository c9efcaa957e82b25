//! In-memory store.

use crate::error::StoreResult;
use crate::store::KvStore;
use crate::types::{KeyValue, Revision, TxnRequest, TxnResponse, WriteOp};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    mod_revision: Revision,
}

#[derive(Debug, Default)]
struct State {
    revision: Revision,
    entries: BTreeMap<Vec<u8>, Entry>,
}

impl State {
    fn mod_revision(&self, key: &[u8]) -> Revision {
        self.entries
            .get(key)
            .map(|e| e.mod_revision)
            .unwrap_or(Revision::ZERO)
    }

    /// Applies `writes` under a single new revision.
    ///
    /// The revision is only consumed if at least one write changes state.
    fn apply(&mut self, writes: Vec<WriteOp>) -> Revision {
        let changes = writes.iter().any(|w| match w {
            WriteOp::Put { .. } => true,
            WriteOp::Delete { key } => self.entries.contains_key(key.as_slice()),
        });
        if !changes {
            return self.revision;
        }

        let rev = self.revision.next();
        for write in writes {
            match write {
                WriteOp::Put { key, value } => {
                    self.entries.insert(
                        key,
                        Entry {
                            value,
                            mod_revision: rev,
                        },
                    );
                }
                WriteOp::Delete { key } => {
                    self.entries.remove(&key);
                }
            }
        }
        self.revision = rev;
        rev
    }
}

/// A linearizable store held entirely in memory.
///
/// Suitable for:
/// - Unit and integration tests
/// - Backing the reference store server
/// - Services that run the transaction layer in a single process
///
/// # Thread Safety
///
/// Every operation takes the internal lock for its full duration, so
/// operations are linearizable. A store can be shared across tasks via
/// `Arc`.
///
/// # Example
///
/// ```rust
/// use confkv_store::{InMemoryStore, KvStore, Revision};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let store = InMemoryStore::new();
/// let rev = store.put(b"key", b"value".to_vec()).await.unwrap();
/// assert_eq!(rev, Revision::new(1));
/// assert_eq!(store.get(b"key").await.unwrap().unwrap().value, b"value");
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of every live key/value pair, in key order.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn snapshot(&self) -> Vec<KeyValue> {
        self.state
            .read()
            .entries
            .iter()
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
                mod_revision: entry.mod_revision,
            })
            .collect()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &[u8]) -> StoreResult<Option<KeyValue>> {
        let state = self.state.read();
        Ok(state.entries.get(key).map(|entry| KeyValue {
            key: key.to_vec(),
            value: entry.value.clone(),
            mod_revision: entry.mod_revision,
        }))
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> StoreResult<Revision> {
        Ok(self.state.write().apply(vec![WriteOp::put(key, value)]))
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<Revision> {
        Ok(self.state.write().apply(vec![WriteOp::delete(key)]))
    }

    async fn txn(&self, request: TxnRequest) -> StoreResult<TxnResponse> {
        let mut state = self.state.write();

        let holds = request
            .compares
            .iter()
            .all(|c| state.mod_revision(&c.key) == c.mod_revision);

        if !holds {
            trace!(
                compares = request.compares.len(),
                revision = state.revision.as_u64(),
                "txn compare failed"
            );
            return Ok(TxnResponse {
                succeeded: false,
                revision: state.revision,
            });
        }

        let revision = state.apply(request.writes);
        Ok(TxnResponse {
            succeeded: true,
            revision,
        })
    }

    async fn current_revision(&self) -> StoreResult<Revision> {
        Ok(self.state.read().revision)
    }
}
