//! Optimistic transaction engine.
//!
//! One call to [`run`] drives a user operation to completion:
//!
//! 1. **Begin**: allocate a fresh [`Txn`] for the attempt.
//! 2. **Execute**: run the operation with a context carrying the handle.
//!    An operation error ends the call immediately and is returned as is.
//! 3. **Commit**: submit one compare-then-write request built from the
//!    handle's buffers. If any compared key moved, nothing is applied.
//! 4. **Retry**: on conflict, back off and start again from Begin with a new
//!    handle, until [`RetryConfig::max_attempts`] is spent.
//!
//! Attempts never share buffers, and no local lock orders transactions
//! against each other; the store's compare-and-swap is the only arbiter.

use crate::config::RetryConfig;
use crate::context::Context;
use crate::error::TxnError;
use crate::keyspace::KeySpace;
use crate::txn::Txn;
use confkv_store::KvStore;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs `op` under optimistic concurrency control.
pub(crate) async fn run<F, Fut, T, E>(
    store: &Arc<dyn KvStore>,
    keyspace: &KeySpace,
    retry: &RetryConfig,
    ctx: &Context,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<TxnError>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let txn = Txn::begin(Arc::clone(store), keyspace.clone(), ctx.clone(), attempt);
        let value = match op(ctx.with_transaction(txn.clone())).await {
            Ok(value) => value,
            Err(err) => {
                txn.abort();
                debug!(attempt, "transaction operation failed, not committing");
                return Err(err);
            }
        };

        let request = txn.submit()?;
        if request.is_empty() {
            return Ok(value);
        }

        let compares = request.compares.len();
        let writes = request.writes.len();
        let response = ctx.bound(store.txn(request)).await?;

        if response.succeeded {
            debug!(
                attempt,
                compares,
                writes,
                revision = response.revision.as_u64(),
                "transaction committed"
            );
            return Ok(value);
        }

        if attempt >= max_attempts {
            warn!(attempts = attempt, "transaction retries exhausted");
            return Err(TxnError::RetriesExhausted { attempts: attempt }.into());
        }

        debug!(
            attempt,
            compares,
            revision = response.revision.as_u64(),
            "transaction conflict, retrying"
        );
        ctx.sleep(retry.delay_for_attempt(attempt)).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confkv_store::{InMemoryStore, Revision};

    fn store() -> (Arc<InMemoryStore>, Arc<dyn KvStore>) {
        let mem = Arc::new(InMemoryStore::new());
        let dyn_store: Arc<dyn KvStore> = Arc::clone(&mem) as Arc<dyn KvStore>;
        (mem, dyn_store)
    }

    #[tokio::test]
    async fn commits_buffered_writes() {
        let (mem, store) = store();
        let result: Result<u32, TxnError> = run(
            &store,
            &KeySpace::default(),
            &RetryConfig::no_retry(),
            &Context::background(),
            |ctx| async move {
                let txn = ctx.transaction().unwrap();
                txn.put("a", "1")?;
                txn.put("b", "2")?;
                Ok(txn.attempt())
            },
        )
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(mem.len(), 2);
        // Both writes land in one revision
        assert_eq!(mem.current_revision().await.unwrap(), Revision::new(1));
    }

    #[tokio::test]
    async fn operation_error_discards_writes() {
        let (mem, store) = store();
        let result: Result<(), TxnError> = run(
            &store,
            &KeySpace::default(),
            &RetryConfig::default(),
            &Context::background(),
            |ctx| async move {
                ctx.transaction().unwrap().put("a", "1")?;
                Err(TxnError::aborted("validation failed"))
            },
        )
        .await;

        assert!(matches!(result, Err(TxnError::Aborted(_))));
        assert!(mem.is_empty());
    }

    #[tokio::test]
    async fn empty_transaction_skips_store() {
        let (mem, store) = store();
        let result: Result<&str, TxnError> = run(
            &store,
            &KeySpace::default(),
            &RetryConfig::default(),
            &Context::background(),
            |_ctx| async move { Ok("nothing to do") },
        )
        .await;

        assert_eq!(result.unwrap(), "nothing to do");
        assert_eq!(mem.current_revision().await.unwrap(), Revision::ZERO);
    }

    #[tokio::test]
    async fn conflict_retries_with_fresh_handle() {
        let (mem, store) = store();
        mem.put(b"k", b"v0".to_vec()).await.unwrap();
        let interferer = Arc::clone(&mem);

        let result: Result<(u32, Vec<u8>), TxnError> = run(
            &store,
            &KeySpace::default(),
            &RetryConfig::immediate(5),
            &Context::background(),
            |ctx| {
                let interferer = Arc::clone(&interferer);
                async move {
                    let txn = ctx.transaction().unwrap();
                    assert_eq!(txn.read_count(), 0);
                    let seen = txn.get("k").await?.unwrap();
                    if txn.attempt() == 1 {
                        interferer.put(b"k", b"v1".to_vec()).await.unwrap();
                    }
                    txn.put("k", [seen.as_slice(), b"+".as_slice()].concat())?;
                    Ok((txn.attempt(), seen))
                }
            },
        )
        .await;

        let (attempt, seen) = result.unwrap();
        assert_eq!(attempt, 2);
        assert_eq!(seen, b"v1");
        assert_eq!(mem.get(b"k").await.unwrap().unwrap().value, b"v1+");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_error() {
        let (mem, store) = store();
        let interferer = Arc::clone(&mem);

        let result: Result<(), TxnError> = run(
            &store,
            &KeySpace::default(),
            &RetryConfig::immediate(3),
            &Context::background(),
            |ctx| {
                let interferer = Arc::clone(&interferer);
                async move {
                    let txn = ctx.transaction().unwrap();
                    txn.get("hot").await?;
                    interferer.put(b"hot", b"bump".to_vec()).await.unwrap();
                    txn.put("hot", "mine")?;
                    Ok(())
                }
            },
        )
        .await;

        assert!(matches!(result, Err(TxnError::RetriesExhausted { attempts: 3 })));
        assert_eq!(mem.get(b"hot").await.unwrap().unwrap().value, b"bump");
    }

    #[tokio::test]
    async fn cancelled_context_stops_before_first_attempt() {
        let (mem, store) = store();
        let ctx = Context::background();
        ctx.cancellation_token().cancel();

        let result: Result<(), TxnError> = run(
            &store,
            &KeySpace::default(),
            &RetryConfig::default(),
            &ctx,
            |ctx| async move {
                ctx.transaction().unwrap().put("a", "1")?;
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(TxnError::Cancelled)));
        assert!(mem.is_empty());
    }
}
