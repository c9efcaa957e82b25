//! TCP front end of the store server.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::RequestHandler;
use confkv_protocol::{read_message, write_message, Envelope, Request, Response};
use confkv_store::{InMemoryStore, KvStore};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Depth of each connection's response queue.
const RESPONSE_QUEUE: usize = 256;

/// A single-node store server.
///
/// Each accepted connection gets its own task. Requests on one connection
/// are handled concurrently and answered in completion order, tagged with
/// the id the client sent.
///
/// # Example
///
/// ```rust
/// use confkv_server::{ServerConfig, StoreServer};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
/// let server = StoreServer::bind(config).await.unwrap();
/// let addr = server.local_addr();
///
/// let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
/// let task = tokio::spawn(server.serve_until(async {
///     let _ = stopped.await;
/// }));
///
/// // Clients may now connect to `addr`.
/// assert_ne!(addr.port(), 0);
///
/// stop.send(()).unwrap();
/// task.await.unwrap().unwrap();
/// # });
/// ```
pub struct StoreServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: RequestHandler,
    limit: Arc<Semaphore>,
}

impl StoreServer {
    /// Binds a server backed by a fresh [`InMemoryStore`].
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        Self::bind_with_store(config, Arc::new(InMemoryStore::new())).await
    }

    /// Binds a server backed by `store`.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn bind_with_store(
        config: ServerConfig,
        store: Arc<dyn KvStore>,
    ) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            handler: RequestHandler::new(store),
            limit: Arc::new(Semaphore::new(config.max_connections.max(1))),
        })
    }

    /// Returns the address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        self.handler.store()
    }

    /// Serves connections until the task is dropped.
    ///
    /// # Errors
    ///
    /// See [`serve_until`](Self::serve_until).
    pub async fn serve(self) -> ServerResult<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Serves connections until `shutdown` completes, then drops every open
    /// connection.
    ///
    /// # Errors
    ///
    /// Accept failures are logged and skipped, so this currently only
    /// returns `Ok`.
    pub async fn serve_until<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();
        info!(addr = %self.local_addr, "store server listening");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let Ok(permit) = Arc::clone(&self.limit).try_acquire_owned() else {
                        warn!(%peer, "connection limit reached, refusing");
                        continue;
                    };
                    let handler = self.handler.clone();
                    connections.spawn(async move {
                        let _permit = permit;
                        debug!(%peer, "connection accepted");
                        match serve_connection(stream, handler).await {
                            Ok(()) => debug!(%peer, "connection closed"),
                            Err(err) if err.is_client_error() => {
                                warn!(%peer, error = %err, "closed connection after bad request")
                            }
                            Err(err) => warn!(%peer, error = %err, "connection dropped"),
                        }
                    });
                }
            }
        }

        info!(
            addr = %self.local_addr,
            open = connections.len(),
            "store server shutting down"
        );
        connections.shutdown().await;
        Ok(())
    }
}

impl std::fmt::Debug for StoreServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreServer")
            .field("local_addr", &self.local_addr)
            .field("available_slots", &self.limit.available_permits())
            .finish()
    }
}

async fn serve_connection(stream: TcpStream, handler: RequestHandler) -> ServerResult<()> {
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(RESPONSE_QUEUE);
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let result = loop {
        match read_message::<_, Envelope<Request>>(&mut reader).await {
            Ok(Some(envelope)) => {
                let handler = handler.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = handler.handle(envelope.body).await;
                    // The writer is gone only if the connection already died.
                    let _ = tx.send(Envelope::new(envelope.id, response)).await;
                });
            }
            Ok(None) => break Ok(()),
            // An undecodable request has no usable id to answer, so the
            // client could only wait out its timeout. Hang up instead.
            Err(err) => break Err(err.into()),
        }
    };

    // Let in-flight requests finish writing before the socket closes.
    drop(tx);
    let _ = writer_task.await;
    result
}

async fn write_responses(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Envelope<Response>>) {
    while let Some(envelope) = rx.recv().await {
        if let Err(err) = write_message(&mut writer, &envelope).await {
            debug!(error = %err, "response write failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confkv_protocol::PROTOCOL_VERSION;
    use confkv_store::Revision;
    use tokio::sync::oneshot;

    async fn start() -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<ServerResult<()>>) {
        let server = StoreServer::bind(ServerConfig::new("127.0.0.1:0".parse().unwrap()))
            .await
            .unwrap();
        let addr = server.local_addr();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_until(async {
            let _ = stopped.await;
        }));
        (addr, stop, task)
    }

    async fn call(stream: &mut TcpStream, id: u64, request: Request) -> Envelope<Response> {
        write_message(stream, &Envelope::new(id, request)).await.unwrap();
        read_message(stream).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn answers_over_tcp() {
        let (addr, stop, task) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let status = call(&mut stream, 1, Request::Status).await;
        assert_eq!(status.id, 1);
        assert_eq!(
            status.body,
            Response::Status {
                protocol_version: PROTOCOL_VERSION,
                revision: Revision::ZERO,
            }
        );

        let put = call(
            &mut stream,
            2,
            Request::Put {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
            },
        )
        .await;
        assert_eq!(
            put.body,
            Response::Put {
                revision: Revision::new(1)
            }
        );

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn connections_share_one_store() {
        let (addr, stop, task) = start().await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();

        call(
            &mut first,
            1,
            Request::Put {
                key: b"k".to_vec(),
                value: b"from first".to_vec(),
            },
        )
        .await;

        match call(&mut second, 1, Request::Get { key: b"k".to_vec() }).await.body {
            Response::Get(Some(kv)) => assert_eq!(kv.value, b"from first"),
            other => panic!("unexpected response: {other:?}"),
        }

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_drops_open_connections() {
        let (addr, stop, task) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        call(&mut stream, 1, Request::Status).await;

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();

        let next: Option<Envelope<Response>> = read_message(&mut stream).await.unwrap_or(None);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn undecodable_request_closes_connection() {
        let (addr, stop, task) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        call(&mut stream, 1, Request::Status).await;

        confkv_protocol::write_frame(&mut stream, &[0xff, 0x00, 0x13])
            .await
            .unwrap();
        let next: Option<Envelope<Response>> = read_message(&mut stream).await.unwrap_or(None);
        assert!(next.is_none());

        // Other clients are unaffected.
        let mut other = TcpStream::connect(addr).await.unwrap();
        assert_eq!(call(&mut other, 7, Request::Status).await.id, 7);

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn connection_limit_refuses_extra_clients() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_max_connections(1);
        let server = StoreServer::bind(config).await.unwrap();
        let addr = server.local_addr();
        let task = tokio::spawn(server.serve());

        let mut first = TcpStream::connect(addr).await.unwrap();
        call(&mut first, 1, Request::Status).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        let refused: Option<Envelope<Response>> = read_message(&mut second).await.unwrap_or(None);
        assert!(refused.is_none());

        task.abort();
    }
}
