//! Network connection to a store server.
//!
//! One [`Connection`] carries every request of a client. Requests are
//! tagged with an id and written by a dedicated writer task; a reader task
//! routes each response back to its caller. Callers never wait on each
//! other, only on their own response.

use crate::config::ClientConfig;
use crate::error::{ConnectError, ConnectResult};
use crate::tls;
use async_trait::async_trait;
use confkv_protocol::{
    encode, read_message, write_frame, Envelope, Request, RequestId, Response, MAX_FRAME_LEN,
    PROTOCOL_VERSION,
};
use confkv_store::{KeyValue, KvStore, Revision, StoreError, StoreResult, TxnRequest, TxnResponse};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Depth of the outbound request queue.
const OUTBOUND_QUEUE: usize = 256;

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

type BoxStream = Box<dyn Stream>;

/// An encoded request waiting for the writer task.
struct Outbound {
    id: RequestId,
    body: Vec<u8>,
}
type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Response>>>>;

/// State shared between the connection handle and its background tasks.
struct Shared {
    pending: Pending,
    closed: AtomicBool,
}

impl Shared {
    /// Marks the link dead and fails every waiting request.
    fn shut(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders wakes each waiter with a receive error.
        self.pending.lock().clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Removes a pending slot if the request future is dropped early.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// A multiplexed connection to one store endpoint.
///
/// Safe to share between any number of concurrent transactions.
pub struct Connection {
    endpoint: String,
    request_timeout: Duration,
    next_id: AtomicU64,
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Outbound>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Dials the configured endpoints and returns the first working
    /// connection.
    ///
    /// TLS material is loaded before any network activity. The whole dial,
    /// across all endpoints, is bounded by `config.dial_timeout`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectError`] if the configuration is unusable or no
    /// endpoint answers in time.
    pub async fn dial(config: &ClientConfig) -> ConnectResult<Self> {
        if config.endpoints.is_empty() {
            return Err(ConnectError::NoEndpoints);
        }

        let connector = if config.tls.enabled {
            Some(tls::connector(&config.tls)?)
        } else {
            None
        };

        match tokio::time::timeout(config.dial_timeout, dial_any(config, connector.as_ref())).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?config.dial_timeout, "no store endpoint reachable");
                Err(ConnectError::DialTimeout(config.dial_timeout))
            }
        }
    }

    /// Starts the background tasks for an established stream.
    fn start<S>(endpoint: &str, stream: S, request_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let stream: BoxStream = Box::new(stream);
        let (reader, writer) = tokio::io::split(stream);

        let shared = Arc::new(Shared {
            pending: Arc::new(Mutex::new(HashMap::new())),
            closed: AtomicBool::new(false),
        });
        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE);

        let read_task = tokio::spawn(read_loop(reader, Arc::clone(&shared), endpoint.to_string()));
        let write_task = tokio::spawn(write_loop(writer, rx, Arc::clone(&shared)));

        Self {
            endpoint: endpoint.to_string(),
            request_timeout,
            next_id: AtomicU64::new(1),
            shared,
            outbound,
            tasks: Mutex::new(vec![read_task, write_task]),
        }
    }

    /// Returns the endpoint this connection is attached to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns true once the connection is closed or lost.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Closes the connection.
    ///
    /// Stops the background tasks, which releases the socket, and fails all
    /// in-flight requests with [`StoreError::Closed`]. Calling it again is a
    /// no-op.
    pub fn close(&self) {
        self.shared.shut();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        if !tasks.is_empty() {
            info!(endpoint = %self.endpoint, "closing store connection");
        }
        for task in tasks {
            task.abort();
        }
    }

    /// Sends a request and waits for its response.
    async fn request(&self, request: Request) -> StoreResult<Response> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            id,
        };

        // The reader marks the link closed before draining, so a request
        // registered after the drain is caught here.
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let kind = request.kind();
        let body = encode(&Envelope::new(id, request))
            .map_err(|e| StoreError::Protocol(e.to_string()))?;
        // Checked here so an oversized request fails alone instead of
        // breaking the stream every caller shares.
        if body.len() > MAX_FRAME_LEN {
            debug!(id, kind, len = body.len(), "store request too large");
            return Err(StoreError::TooLarge {
                len: body.len(),
                max: MAX_FRAME_LEN,
            });
        }

        debug!(id, kind, "store request");
        self.outbound
            .send(Outbound { id, body })
            .await
            .map_err(|_| StoreError::Closed)?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Response::Error { message })) => Err(StoreError::Rejected(message)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) if self.is_closed() => Err(StoreError::Closed),
            Ok(Err(_)) => Err(StoreError::Unavailable("connection lost".into())),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn unexpected(response: &Response) -> StoreError {
    StoreError::Protocol(format!("unexpected response: {response:?}"))
}

#[async_trait]
impl KvStore for Connection {
    async fn get(&self, key: &[u8]) -> StoreResult<Option<KeyValue>> {
        match self.request(Request::Get { key: key.to_vec() }).await? {
            Response::Get(found) => Ok(found),
            other => Err(unexpected(&other)),
        }
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> StoreResult<Revision> {
        let request = Request::Put {
            key: key.to_vec(),
            value,
        };
        match self.request(request).await? {
            Response::Put { revision } => Ok(revision),
            other => Err(unexpected(&other)),
        }
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<Revision> {
        match self.request(Request::Delete { key: key.to_vec() }).await? {
            Response::Delete { revision } => Ok(revision),
            other => Err(unexpected(&other)),
        }
    }

    async fn txn(&self, request: TxnRequest) -> StoreResult<TxnResponse> {
        match self.request(Request::Txn(request)).await? {
            Response::Txn(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    async fn current_revision(&self) -> StoreResult<Revision> {
        match self.request(Request::Status).await? {
            Response::Status { revision, .. } => Ok(revision),
            other => Err(unexpected(&other)),
        }
    }
}

async fn dial_any(
    config: &ClientConfig,
    connector: Option<&TlsConnector>,
) -> ConnectResult<Connection> {
    let mut last_error = ConnectError::NoEndpoints;
    for endpoint in &config.endpoints {
        match dial_one(endpoint, connector, config.request_timeout).await {
            Ok(connection) => return Ok(connection),
            Err(e) => {
                warn!(%endpoint, error = %e, "store endpoint dial failed");
                last_error = e;
            }
        }
    }
    Err(last_error)
}

async fn dial_one(
    endpoint: &str,
    connector: Option<&TlsConnector>,
    request_timeout: Duration,
) -> ConnectResult<Connection> {
    let tcp = TcpStream::connect(endpoint)
        .await
        .map_err(|e| ConnectError::Unreachable {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
    // Requests are small and latency bound.
    let _ = tcp.set_nodelay(true);

    let connection = match connector {
        Some(connector) => {
            let name = tls::server_name(endpoint)?;
            let stream =
                connector
                    .connect(name, tcp)
                    .await
                    .map_err(|e| ConnectError::Handshake {
                        endpoint: endpoint.to_string(),
                        reason: format!("TLS handshake: {e}"),
                    })?;
            Connection::start(endpoint, stream, request_timeout)
        }
        None => Connection::start(endpoint, tcp, request_timeout),
    };

    let handshake_error = |reason: String| ConnectError::Handshake {
        endpoint: endpoint.to_string(),
        reason,
    };
    let status = connection.request(Request::Status).await;
    match status {
        Ok(Response::Status {
            protocol_version,
            revision,
        }) if protocol_version == PROTOCOL_VERSION => {
            info!(%endpoint, %revision, "connected to store");
            Ok(connection)
        }
        Ok(Response::Status {
            protocol_version, ..
        }) => Err(handshake_error(format!(
            "protocol version mismatch: local={PROTOCOL_VERSION}, remote={protocol_version}"
        ))),
        Ok(other) => Err(handshake_error(format!("unexpected status reply: {other:?}"))),
        Err(e) => Err(handshake_error(e.to_string())),
    }
}

async fn read_loop(mut reader: ReadHalf<BoxStream>, shared: Arc<Shared>, endpoint: String) {
    loop {
        match read_message::<_, Envelope<Response>>(&mut reader).await {
            Ok(Some(envelope)) => {
                let waiter = shared.pending.lock().remove(&envelope.id);
                match waiter {
                    // The caller may have given up; nothing to do then.
                    Some(tx) => {
                        let _ = tx.send(envelope.body);
                    }
                    None => debug!(id = envelope.id, "response for abandoned request"),
                }
            }
            Ok(None) => {
                if !shared.is_closed() {
                    warn!(%endpoint, "store closed the connection");
                }
                break;
            }
            Err(e) => {
                if !shared.is_closed() {
                    warn!(%endpoint, error = %e, "store connection failed");
                }
                break;
            }
        }
    }
    shared.shut();
}

async fn write_loop(
    mut writer: WriteHalf<BoxStream>,
    mut rx: mpsc::Receiver<Outbound>,
    shared: Arc<Shared>,
) {
    while let Some(outbound) = rx.recv().await {
        match write_frame(&mut writer, &outbound.body).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                debug!(error = %e, "store write failed");
                break;
            }
            Err(e) => {
                // Only this request is lost; the stream is still in sync.
                debug!(id = outbound.id, error = %e, "store request not sent");
                let waiter = shared.pending.lock().remove(&outbound.id);
                if let Some(tx) = waiter {
                    let _ = tx.send(Response::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
    }
    shared.shut();
}
