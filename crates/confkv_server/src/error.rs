//! Error types for the store server.

use confkv_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the store server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Socket error while binding or accepting.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A client sent something that is not a valid frame or message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ServerError {
    /// Returns true if the error came from a misbehaving client rather than
    /// the server itself.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServerError::Protocol(err) if !matches!(err, ProtocolError::Io(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let decode = ServerError::from(ProtocolError::Decode("bad".into()));
        assert!(decode.is_client_error());

        let io = ServerError::from(std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken"));
        assert!(!io.is_client_error());
        assert!(io.to_string().contains("taken"));
    }
}
