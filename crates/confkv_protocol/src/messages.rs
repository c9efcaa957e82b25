//! Protocol messages.

use crate::error::{ProtocolError, ProtocolResult};
use confkv_store::{KeyValue, Revision, TxnRequest, TxnResponse};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Version of the wire protocol implemented by this crate.
pub const PROTOCOL_VERSION: u16 = 1;

/// Identifier pairing a response with its request on a shared connection.
pub type RequestId = u64;

/// A message tagged with the id of the request it belongs to.
///
/// Responses may arrive in any order; the id is the only thing that ties
/// them back to their request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Request id chosen by the client.
    pub id: RequestId,
    /// Message body.
    pub body: T,
}

impl<T> Envelope<T> {
    /// Wraps a message body.
    pub fn new(id: RequestId, body: T) -> Self {
        Self { id, body }
    }
}

/// A request from a client to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Liveness and version check, sent once after dialing.
    Status,
    /// Single-key read.
    Get {
        /// Key to read.
        key: Vec<u8>,
    },
    /// Single-key write.
    Put {
        /// Key to write.
        key: Vec<u8>,
        /// New value.
        value: Vec<u8>,
    },
    /// Single-key delete.
    Delete {
        /// Key to delete.
        key: Vec<u8>,
    },
    /// Atomic compare-then-write.
    Txn(TxnRequest),
}

impl Request {
    /// Returns a short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Status => "status",
            Request::Get { .. } => "get",
            Request::Put { .. } => "put",
            Request::Delete { .. } => "delete",
            Request::Txn(_) => "txn",
        }
    }
}

/// A response from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Answer to [`Request::Status`].
    Status {
        /// Protocol version spoken by the server.
        protocol_version: u16,
        /// Current global revision.
        revision: Revision,
    },
    /// Answer to [`Request::Get`].
    Get(Option<KeyValue>),
    /// Answer to [`Request::Put`].
    Put {
        /// Revision of the write.
        revision: Revision,
    },
    /// Answer to [`Request::Delete`].
    Delete {
        /// Store revision after the delete.
        revision: Revision,
    },
    /// Answer to [`Request::Txn`].
    Txn(TxnResponse),
    /// The server could not execute the request.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

/// Encodes a message to CBOR.
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes a message from CBOR.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use confkv_store::{Compare, WriteOp};

    #[test]
    fn txn_request_survives_encoding() {
        let request = Envelope::new(
            7,
            Request::Txn(
                TxnRequest::new()
                    .compare(Compare::new(b"svc/a".to_vec(), Revision::new(4)))
                    .write(WriteOp::put(b"svc/a".to_vec(), b"v".to_vec()))
                    .write(WriteOp::delete(b"svc/b".to_vec())),
            ),
        );

        let bytes = encode(&request).unwrap();
        let decoded: Envelope<Request> = decode(&bytes).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn missing_key_response() {
        let response = Envelope::new(1, Response::Get(None));
        let decoded: Envelope<Response> = decode(&encode(&response).unwrap()).unwrap();
        assert_eq!(decoded.body, Response::Get(None));
    }

    #[test]
    fn decode_garbage_fails() {
        let result: ProtocolResult<Envelope<Request>> = decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn request_kind_names() {
        assert_eq!(Request::Status.kind(), "status");
        assert_eq!(Request::Txn(TxnRequest::new()).kind(), "txn");
    }
}
