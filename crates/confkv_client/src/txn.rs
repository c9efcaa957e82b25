//! Transaction handle.

use crate::context::Context;
use crate::error::{TxnError, TxnResult};
use crate::keyspace::KeySpace;
use confkv_store::{Compare, KvStore, Revision, TxnRequest, WriteOp};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of one attempt's handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Operations may read and buffer writes.
    Active,
    /// Buffers were handed to the engine for commit.
    Submitted,
    /// The attempt was abandoned.
    Aborted,
}

/// A buffered write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    /// Store this value.
    Put(Vec<u8>),
    /// Tombstone: remove the key.
    Delete,
}

impl PendingWrite {
    /// Value a read of this key returns inside the attempt.
    fn visible_value(&self) -> Option<Vec<u8>> {
        match self {
            PendingWrite::Put(value) => Some(value.clone()),
            PendingWrite::Delete => None,
        }
    }
}

#[derive(Debug)]
struct Buffers {
    state: TxnState,
    /// Store key -> revision observed by the first read.
    reads: HashMap<Vec<u8>, Revision>,
    /// Store key -> last buffered write.
    writes: HashMap<Vec<u8>, PendingWrite>,
}

impl Buffers {
    fn ensure_active(&self) -> TxnResult<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Submitted | TxnState::Aborted => Err(TxnError::TransactionClosed),
        }
    }
}

struct Inner {
    attempt: u32,
    store: Arc<dyn KvStore>,
    keyspace: KeySpace,
    /// Context of the surrounding call, without a transaction attached.
    ctx: Context,
    buffers: Mutex<Buffers>,
}

/// The read and write buffers of one transaction attempt.
///
/// Reads go to the store unless the key was written earlier in the same
/// attempt, in which case the buffered value is returned. Writes never touch
/// the store; they are submitted together at commit.
///
/// A handle belongs to exactly one attempt. Clones share the same buffers
/// so a handle can be passed around inside the operation, but once the
/// engine submits or abandons the attempt every clone reports
/// [`TxnError::TransactionClosed`].
#[derive(Clone)]
pub struct Txn {
    inner: Arc<Inner>,
}

impl Txn {
    pub(crate) fn begin(
        store: Arc<dyn KvStore>,
        keyspace: KeySpace,
        ctx: Context,
        attempt: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                attempt,
                store,
                keyspace,
                ctx: ctx.without_transaction(),
                buffers: Mutex::new(Buffers {
                    state: TxnState::Active,
                    reads: HashMap::new(),
                    writes: HashMap::new(),
                }),
            }),
        }
    }

    /// Returns the 1-based attempt number this handle belongs to.
    pub fn attempt(&self) -> u32 {
        self.inner.attempt
    }

    /// Returns the current state.
    pub fn state(&self) -> TxnState {
        self.inner.buffers.lock().state
    }

    /// Checks if the handle still accepts operations.
    pub fn is_active(&self) -> bool {
        self.state() == TxnState::Active
    }

    /// Reads a key.
    ///
    /// A key written earlier in this attempt is answered from the write
    /// buffer (`None` if it was deleted). Otherwise the store is read and the
    /// key's revision is recorded the first time it is seen.
    ///
    /// Store reads are bounded by the context the transaction began with.
    /// A context derived later, such as a shorter timeout passed to a nested
    /// [`Client::do_in_transaction`](crate::Client::do_in_transaction), does
    /// not reach this call. Wrap it in [`Context::bound`] to apply one.
    ///
    /// # Errors
    ///
    /// Fails if the handle is closed, the store fails, or the begin context
    /// ends.
    pub async fn get(&self, key: impl AsRef<[u8]>) -> TxnResult<Option<Vec<u8>>> {
        let key = self.inner.keyspace.key(key.as_ref());
        {
            let buffers = self.inner.buffers.lock();
            buffers.ensure_active()?;
            if let Some(write) = buffers.writes.get(&key) {
                return Ok(write.visible_value());
            }
        }

        let found = self.inner.ctx.bound(self.inner.store.get(&key)).await?;
        let (value, revision) = match found {
            Some(kv) => (Some(kv.value), kv.mod_revision),
            None => (None, Revision::ZERO),
        };

        let mut buffers = self.inner.buffers.lock();
        buffers.ensure_active()?;
        buffers.reads.entry(key).or_insert(revision);
        Ok(value)
    }

    /// Buffers a write, replacing any earlier write of the same key.
    ///
    /// # Errors
    ///
    /// Fails if the handle is closed.
    pub fn put(&self, key: impl AsRef<[u8]>, value: impl Into<Vec<u8>>) -> TxnResult<()> {
        self.buffer(key.as_ref(), PendingWrite::Put(value.into()))
    }

    /// Buffers a deletion, replacing any earlier write of the same key.
    ///
    /// # Errors
    ///
    /// Fails if the handle is closed.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> TxnResult<()> {
        self.buffer(key.as_ref(), PendingWrite::Delete)
    }

    fn buffer(&self, key: &[u8], write: PendingWrite) -> TxnResult<()> {
        let key = self.inner.keyspace.key(key);
        let mut buffers = self.inner.buffers.lock();
        buffers.ensure_active()?;
        buffers.writes.insert(key, write);
        Ok(())
    }

    /// Returns the revision recorded for `key`, if it was read from the store.
    pub fn read_revision(&self, key: impl AsRef<[u8]>) -> Option<Revision> {
        let key = self.inner.keyspace.key(key.as_ref());
        self.inner.buffers.lock().reads.get(&key).copied()
    }

    /// Returns the buffered write for `key`, if any.
    pub fn pending_write(&self, key: impl AsRef<[u8]>) -> Option<PendingWrite> {
        let key = self.inner.keyspace.key(key.as_ref());
        self.inner.buffers.lock().writes.get(&key).cloned()
    }

    /// Returns the number of distinct keys read from the store.
    pub fn read_count(&self) -> usize {
        self.inner.buffers.lock().reads.len()
    }

    /// Returns the number of distinct keys with a buffered write.
    pub fn write_count(&self) -> usize {
        self.inner.buffers.lock().writes.len()
    }

    /// Closes the handle and turns its buffers into a commit request.
    ///
    /// Every read key becomes a compare on its observed revision; every
    /// buffered write becomes a put or delete. Both lists are sorted by key.
    pub(crate) fn submit(&self) -> TxnResult<TxnRequest> {
        let mut buffers = self.inner.buffers.lock();
        buffers.ensure_active()?;
        buffers.state = TxnState::Submitted;

        let mut compares: Vec<Compare> = buffers
            .reads
            .drain()
            .map(|(key, revision)| Compare::new(key, revision))
            .collect();
        compares.sort_by(|a, b| a.key.cmp(&b.key));

        let mut writes: Vec<WriteOp> = buffers
            .writes
            .drain()
            .map(|(key, write)| match write {
                PendingWrite::Put(value) => WriteOp::Put { key, value },
                PendingWrite::Delete => WriteOp::Delete { key },
            })
            .collect();
        writes.sort_by(|a, b| a.key().cmp(b.key()));

        Ok(TxnRequest { compares, writes })
    }

    /// Abandons the attempt and drops its buffers.
    pub(crate) fn abort(&self) {
        let mut buffers = self.inner.buffers.lock();
        buffers.state = TxnState::Aborted;
        buffers.reads.clear();
        buffers.writes.clear();
    }
}

impl fmt::Debug for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffers = self.inner.buffers.lock();
        f.debug_struct("Txn")
            .field("attempt", &self.inner.attempt)
            .field("state", &buffers.state)
            .field("reads", &buffers.reads.len())
            .field("writes", &buffers.writes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confkv_store::InMemoryStore;
    use proptest::prelude::*;

    fn begin(store: &Arc<InMemoryStore>) -> Txn {
        Txn::begin(
            Arc::clone(store) as Arc<dyn KvStore>,
            KeySpace::new("svc"),
            Context::background(),
            1,
        )
    }

    #[tokio::test]
    async fn get_records_observed_revision() {
        let store = Arc::new(InMemoryStore::new());
        store.put(b"svc/a", b"1".to_vec()).await.unwrap();
        let txn = begin(&store);

        assert_eq!(txn.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(txn.read_revision("a"), Some(Revision::new(1)));

        assert_eq!(txn.get("missing").await.unwrap(), None);
        assert_eq!(txn.read_revision("missing"), Some(Revision::ZERO));
        assert_eq!(txn.read_count(), 2);
    }

    #[tokio::test]
    async fn first_observation_wins() {
        let store = Arc::new(InMemoryStore::new());
        store.put(b"svc/a", b"1".to_vec()).await.unwrap();
        let txn = begin(&store);

        txn.get("a").await.unwrap();
        store.put(b"svc/a", b"2".to_vec()).await.unwrap();
        txn.get("a").await.unwrap();

        assert_eq!(txn.read_revision("a"), Some(Revision::new(1)));
    }

    #[tokio::test]
    async fn buffered_write_served_without_recording_read() {
        let store = Arc::new(InMemoryStore::new());
        let txn = begin(&store);

        txn.put("a", "mine").unwrap();
        assert_eq!(txn.get("a").await.unwrap(), Some(b"mine".to_vec()));
        assert_eq!(txn.read_revision("a"), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn write_then_delete_then_read_is_absent() {
        let store = Arc::new(InMemoryStore::new());
        store.put(b"svc/a", b"stored".to_vec()).await.unwrap();
        let txn = begin(&store);

        txn.put("a", "x").unwrap();
        txn.delete("a").unwrap();
        assert_eq!(txn.get("a").await.unwrap(), None);
        assert_eq!(txn.pending_write("a"), Some(PendingWrite::Delete));
        assert_eq!(txn.write_count(), 1);
    }

    #[tokio::test]
    async fn read_then_write_keeps_compare() {
        let store = Arc::new(InMemoryStore::new());
        store.put(b"svc/a", b"1".to_vec()).await.unwrap();
        let txn = begin(&store);

        txn.get("a").await.unwrap();
        txn.put("a", "2").unwrap();

        let request = txn.submit().unwrap();
        assert_eq!(
            request.compares,
            vec![Compare::new(b"svc/a".to_vec(), Revision::new(1))]
        );
        assert_eq!(request.writes, vec![WriteOp::put(b"svc/a".to_vec(), b"2".to_vec())]);
    }

    #[tokio::test]
    async fn blind_delete_has_no_compare() {
        let store = Arc::new(InMemoryStore::new());
        let txn = begin(&store);

        txn.delete("never-read").unwrap();
        let request = txn.submit().unwrap();
        assert!(request.compares.is_empty());
        assert_eq!(request.writes, vec![WriteOp::delete(b"svc/never-read".to_vec())]);
    }

    #[tokio::test]
    async fn closed_handle_rejects_operations() {
        let store = Arc::new(InMemoryStore::new());
        let txn = begin(&store);
        let leaked = txn.clone();

        txn.submit().unwrap();
        assert_eq!(leaked.state(), TxnState::Submitted);
        assert!(matches!(leaked.put("a", "b"), Err(TxnError::TransactionClosed)));
        assert!(matches!(leaked.get("a").await, Err(TxnError::TransactionClosed)));
        assert!(matches!(leaked.submit(), Err(TxnError::TransactionClosed)));
    }

    #[tokio::test]
    async fn abort_clears_buffers() {
        let store = Arc::new(InMemoryStore::new());
        let txn = begin(&store);
        txn.put("a", "b").unwrap();

        txn.abort();
        assert!(!txn.is_active());
        assert_eq!(txn.write_count(), 0);
        assert!(matches!(txn.delete("a"), Err(TxnError::TransactionClosed)));
    }

    #[tokio::test]
    async fn reads_follow_begin_context() {
        let store = Arc::new(InMemoryStore::new());
        store.put(b"svc/a", b"1".to_vec()).await.unwrap();

        let token = crate::CancellationToken::new();
        let txn = Txn::begin(
            Arc::clone(&store) as Arc<dyn KvStore>,
            KeySpace::new("svc"),
            Context::background().with_cancellation(token.clone()),
            1,
        );
        assert_eq!(txn.get("a").await.unwrap(), Some(b"1".to_vec()));

        // A later context only applies when the caller bounds the read with it.
        let inner = Context::background().with_timeout(std::time::Duration::ZERO);
        assert_eq!(txn.get("b").await.unwrap(), None);
        assert!(matches!(
            inner.bound(txn.get("c")).await,
            Err(TxnError::DeadlineExceeded)
        ));

        token.cancel();
        assert!(matches!(txn.get("d").await, Err(TxnError::Cancelled)));
        // Buffered writes never touch the store.
        txn.put("e", "x").unwrap();
        assert_eq!(txn.get("e").await.unwrap(), Some(b"x".to_vec()));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8, u8),
        Delete(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, any::<u8>()).prop_map(|(k, v)| Op::Put(k, v)),
            (0u8..4).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn reads_see_last_buffered_write(ops in proptest::collection::vec(op_strategy(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = Arc::new(InMemoryStore::new());
                let txn = begin(&store);
                let mut model: HashMap<u8, Option<u8>> = HashMap::new();

                for op in &ops {
                    match *op {
                        Op::Put(k, v) => {
                            txn.put([k], [v]).unwrap();
                            model.insert(k, Some(v));
                        }
                        Op::Delete(k) => {
                            txn.delete([k]).unwrap();
                            model.insert(k, None);
                        }
                    }
                }

                for (k, expected) in &model {
                    let got = txn.get([*k]).await.unwrap();
                    prop_assert_eq!(got, expected.map(|v| vec![v]));
                }
                prop_assert_eq!(txn.read_count(), 0);
                prop_assert_eq!(txn.write_count(), model.len());
                prop_assert!(store.is_empty());
                Ok(())
            })?;
        }
    }
}
