//! # confkv Client
//!
//! Transactional access to a revisioned key-value store.
//!
//! This crate provides:
//! - Connection lifecycle: endpoint dialing, dial timeout, optional mutual
//!   TLS, clean shutdown ([`Client::open`], [`Client::close`])
//! - Direct single-key operations ([`Client::get`], [`Client::put`],
//!   [`Client::delete`])
//! - Multi-key optimistic transactions ([`Client::do_in_transaction`])
//!   with read-your-own-writes and transparent conflict retries
//! - Explicit context passing ([`Context`]) for cancellation, deadlines,
//!   and transaction reuse across nested calls
//!
//! ## Transactions
//!
//! A transaction buffers its writes and remembers the revision of every key
//! it read. At commit the whole buffer is sent as one compare-then-write
//! request. If another writer touched any of the read keys in the meantime,
//! nothing is applied and the operation runs again with a fresh buffer.
//!
//! Calling [`Client::do_in_transaction`] with a context that already carries
//! a transaction joins it instead of starting a new one, so layered
//! application code composes into a single atomic commit.
//!
//! ## Key Invariants
//!
//! - A failed commit has no visible effect
//! - Operation errors are never retried
//! - Conflicts are never surfaced except as exhausted retries
//! - Each attempt gets its own buffers
//! - No local lock orders unrelated transactions

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod client;
mod config;
mod connection;
mod context;
mod error;
mod keyspace;
mod stm;
mod tls;
mod txn;

pub use client::Client;
pub use config::{ClientConfig, RetryConfig, TlsConfig};
pub use connection::Connection;
pub use context::{CancellationToken, Context};
pub use error::{ConnectError, ConnectResult, TxnError, TxnResult};
pub use txn::{PendingWrite, Txn, TxnState};
