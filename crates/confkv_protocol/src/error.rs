//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding, or framing messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Underlying stream error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode a message to CBOR.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// Failed to decode CBOR bytes into a message.
    #[error("decoding failed: {0}")]
    Decode(String),

    /// A frame header announced a body larger than the limit.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced length.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// The stream ended in the middle of a frame.
    #[error("stream closed mid-frame")]
    Truncated,
}

impl ProtocolError {
    /// Returns true if the stream can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_) | ProtocolError::FrameTooLarge { .. } | ProtocolError::Truncated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ProtocolError::Truncated.is_fatal());
        assert!(ProtocolError::FrameTooLarge { len: 10, max: 5 }.is_fatal());
        assert!(!ProtocolError::Decode("bad tag".into()).is_fatal());
    }

    #[test]
    fn error_display() {
        let err = ProtocolError::FrameTooLarge { len: 100, max: 50 };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
    }
}
