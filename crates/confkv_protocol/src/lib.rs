//! # confkv Protocol
//!
//! Wire format spoken between `confkv_client` connections and a store
//! server.
//!
//! This crate provides:
//! - [`Request`] / [`Response`] messages wrapped in an [`Envelope`] that
//!   carries the request id used for multiplexing
//! - CBOR encoding of messages ([`encode`], [`decode`])
//! - Length-prefixed framing over any tokio byte stream
//!   ([`write_message`], [`read_message`])
//!
//! This crate performs no connection management; it only moves bytes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{read_frame, read_message, write_frame, write_message, MAX_FRAME_LEN};
pub use messages::{decode, encode, Envelope, Request, RequestId, Response, PROTOCOL_VERSION};
