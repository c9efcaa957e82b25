//! # confkv Server
//!
//! Reference single-node store server for confkv.
//!
//! This crate provides:
//! - A TCP server speaking the `confkv_protocol` wire format
//! - Request dispatch onto any [`KvStore`](confkv_store::KvStore),
//!   an in-memory store by default
//! - The `confkv-server` binary for local development
//!
//! # Architecture
//!
//! The server keeps no state of its own. Every request is forwarded to the
//! backing store, which owns revisions and the atomic compare-then-write
//! step. A store failure is reported to the client as an error response and
//! the connection stays open.
//!
//! The server does not terminate TLS.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use server::StoreServer;
