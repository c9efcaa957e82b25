//! Request handling.

use confkv_protocol::{Request, Response, PROTOCOL_VERSION};
use confkv_store::{KvStore, StoreResult};
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes protocol requests against a store.
///
/// Store failures are turned into [`Response::Error`] so one bad request
/// never takes the connection down.
#[derive(Clone)]
pub struct RequestHandler {
    store: Arc<dyn KvStore>,
}

impl RequestHandler {
    /// Creates a handler over `store`.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Handles one request.
    pub async fn handle(&self, request: Request) -> Response {
        let kind = request.kind();
        match self.dispatch(request).await {
            Ok(response) => {
                debug!(kind, "request handled");
                response
            }
            Err(err) => {
                warn!(kind, error = %err, "request failed");
                Response::Error {
                    message: err.to_string(),
                }
            }
        }
    }

    async fn dispatch(&self, request: Request) -> StoreResult<Response> {
        Ok(match request {
            Request::Status => Response::Status {
                protocol_version: PROTOCOL_VERSION,
                revision: self.store.current_revision().await?,
            },
            Request::Get { key } => Response::Get(self.store.get(&key).await?),
            Request::Put { key, value } => Response::Put {
                revision: self.store.put(&key, value).await?,
            },
            Request::Delete { key } => Response::Delete {
                revision: self.store.delete(&key).await?,
            },
            Request::Txn(txn) => Response::Txn(self.store.txn(txn).await?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use confkv_store::{
        Compare, InMemoryStore, KeyValue, Revision, StoreError, TxnRequest, TxnResponse, WriteOp,
    };

    fn handler() -> RequestHandler {
        RequestHandler::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn status_reports_version_and_revision() {
        let handler = handler();
        handler
            .handle(Request::Put {
                key: b"a".to_vec(),
                value: b"1".to_vec(),
            })
            .await;

        let response = handler.handle(Request::Status).await;
        assert_eq!(
            response,
            Response::Status {
                protocol_version: PROTOCOL_VERSION,
                revision: Revision::new(1),
            }
        );
    }

    #[tokio::test]
    async fn get_put_delete() {
        let handler = handler();
        let put = handler
            .handle(Request::Put {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
            })
            .await;
        assert_eq!(
            put,
            Response::Put {
                revision: Revision::new(1)
            }
        );

        match handler.handle(Request::Get { key: b"k".to_vec() }).await {
            Response::Get(Some(kv)) => {
                assert_eq!(kv.value, b"v");
                assert_eq!(kv.mod_revision, Revision::new(1));
            }
            other => panic!("unexpected response: {other:?}"),
        }

        handler.handle(Request::Delete { key: b"k".to_vec() }).await;
        assert_eq!(
            handler.handle(Request::Get { key: b"k".to_vec() }).await,
            Response::Get(None)
        );
    }

    #[tokio::test]
    async fn txn_compare_failure() {
        let handler = handler();
        handler
            .handle(Request::Put {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
            })
            .await;

        let stale = TxnRequest::new()
            .compare(Compare::new(b"k".to_vec(), Revision::ZERO))
            .write(WriteOp::put(b"k".to_vec(), b"lost".to_vec()));
        match handler.handle(Request::Txn(stale)).await {
            Response::Txn(TxnResponse { succeeded, .. }) => assert!(!succeeded),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    struct Broken;

    #[async_trait]
    impl KvStore for Broken {
        async fn get(&self, _key: &[u8]) -> StoreResult<Option<KeyValue>> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
        async fn put(&self, _key: &[u8], _value: Vec<u8>) -> StoreResult<Revision> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
        async fn delete(&self, _key: &[u8]) -> StoreResult<Revision> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
        async fn txn(&self, _request: TxnRequest) -> StoreResult<TxnResponse> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
        async fn current_revision(&self) -> StoreResult<Revision> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn store_failure_becomes_error_response() {
        let handler = RequestHandler::new(Arc::new(Broken));
        match handler.handle(Request::Get { key: b"k".to_vec() }).await {
            Response::Error { message } => assert!(message.contains("disk gone")),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
