//! Client: connection lifecycle, direct key-value access, and the
//! transaction entry point.

use crate::config::{ClientConfig, RetryConfig};
use crate::connection::Connection;
use crate::context::Context;
use crate::error::{ConnectResult, TxnError, TxnResult};
use crate::keyspace::KeySpace;
use crate::stm;
use confkv_store::{KvStore, Revision};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

struct Inner {
    store: Arc<dyn KvStore>,
    connection: Option<Arc<Connection>>,
    keyspace: KeySpace,
    service_name: String,
    retry: RetryConfig,
}

/// Handle to a store, shared by every transaction of a service.
///
/// Cloning is cheap; clones share the same connection.
///
/// # Example
///
/// ```rust
/// use confkv_client::{Client, ClientConfig, Context, TxnError};
/// use confkv_store::InMemoryStore;
/// use std::sync::Arc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let config = ClientConfig::default().with_service_name("config");
/// let client = Client::with_store(Arc::new(InMemoryStore::new()), &config);
/// let ctx = Context::background();
///
/// client
///     .do_in_transaction(&ctx, |ctx| async move {
///         let txn = ctx.transaction().expect("transaction in context");
///         let count = txn.get("counter").await?.map_or(0, |v| v[0]);
///         txn.put("counter", [count + 1])?;
///         Ok::<_, TxnError>(())
///     })
///     .await
///     .unwrap();
///
/// assert_eq!(client.get(&ctx, "counter").await.unwrap(), Some(vec![1]));
/// # });
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connects to the store described by `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectError`](crate::ConnectError) if TLS material
    /// cannot be loaded or no endpoint answers within the dial timeout.
    pub async fn open(config: ClientConfig) -> ConnectResult<Self> {
        let connection = Arc::new(Connection::dial(&config).await?);
        info!(
            endpoint = connection.endpoint(),
            service = %config.service_name,
            "store client opened"
        );
        Ok(Self::build(
            Arc::clone(&connection) as Arc<dyn KvStore>,
            Some(connection),
            &config,
        ))
    }

    /// Builds a client over an existing store.
    ///
    /// Only `service_name` and `retry` are taken from `config`.
    pub fn with_store(store: Arc<dyn KvStore>, config: &ClientConfig) -> Self {
        Self::build(store, None, config)
    }

    fn build(
        store: Arc<dyn KvStore>,
        connection: Option<Arc<Connection>>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                connection,
                keyspace: KeySpace::new(&config.service_name),
                service_name: config.service_name.clone(),
                retry: config.retry.clone(),
            }),
        }
    }

    /// Closes the network connection, if this client owns one.
    ///
    /// In-flight and later requests fail with a closed-connection error.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        if let Some(connection) = &self.inner.connection {
            connection.close();
        }
    }

    /// Returns the service name keys are namespaced with.
    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    /// Returns the conflict retry policy.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry
    }

    /// Reads a key outside of any transaction.
    ///
    /// # Errors
    ///
    /// Fails if the store fails or the context ends.
    pub async fn get(&self, ctx: &Context, key: impl AsRef<[u8]>) -> TxnResult<Option<Vec<u8>>> {
        let key = self.inner.keyspace.key(key.as_ref());
        let found = ctx.bound(self.inner.store.get(&key)).await?;
        Ok(found.map(|kv| kv.value))
    }

    /// Writes a key outside of any transaction.
    ///
    /// # Errors
    ///
    /// Fails if the store fails or the context ends.
    pub async fn put(
        &self,
        ctx: &Context,
        key: impl AsRef<[u8]>,
        value: impl Into<Vec<u8>>,
    ) -> TxnResult<()> {
        let key = self.inner.keyspace.key(key.as_ref());
        ctx.bound(self.inner.store.put(&key, value.into())).await?;
        Ok(())
    }

    /// Deletes a key outside of any transaction. Deleting an absent key
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Fails if the store fails or the context ends.
    pub async fn delete(&self, ctx: &Context, key: impl AsRef<[u8]>) -> TxnResult<()> {
        let key = self.inner.keyspace.key(key.as_ref());
        ctx.bound(self.inner.store.delete(&key)).await?;
        Ok(())
    }

    /// Returns the store's current global revision.
    ///
    /// # Errors
    ///
    /// Fails if the store fails or the context ends.
    pub async fn revision(&self, ctx: &Context) -> TxnResult<Revision> {
        ctx.bound(self.inner.store.current_revision()).await
    }

    /// Runs `op` as one atomic, isolated transaction.
    ///
    /// If `ctx` already carries a transaction, `op` joins it: it runs once
    /// against that handle and its result is returned unchanged, leaving
    /// commit and retry to the outer call. Otherwise `op` runs under the
    /// optimistic engine and is re-run on commit conflicts, so it must not
    /// have side effects outside the transaction handle.
    ///
    /// Errors returned by `op` end the transaction without committing and
    /// are passed through untouched. Engine failures are converted into `E`.
    ///
    /// # Errors
    ///
    /// Returns `op`'s own error, or a [`TxnError`] (store failure,
    /// cancellation, or exhausted retries) converted into `E`.
    pub async fn do_in_transaction<F, Fut, T, E>(&self, ctx: &Context, mut op: F) -> Result<T, E>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TxnError>,
    {
        if ctx.transaction().is_some() {
            return op(ctx.clone()).await;
        }
        stm::run(
            &self.inner.store,
            &self.inner.keyspace,
            &self.inner.retry,
            ctx,
            op,
        )
        .await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("service_name", &self.inner.service_name)
            .field(
                "endpoint",
                &self.inner.connection.as_ref().map(|c| c.endpoint()),
            )
            .finish()
    }
}
