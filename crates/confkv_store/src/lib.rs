//! # confkv Store
//!
//! The revisioned key-value store contract that the confkv transaction layer
//! is built on, plus an in-memory implementation.
//!
//! A store offers exactly two kinds of guarantee:
//!
//! - linearizable single-key reads and writes, each stamped with a
//!   [`Revision`], and
//! - one atomic multi-key primitive, [`KvStore::txn`], which applies a batch
//!   of writes only if every [`Compare`] in the request still holds.
//!
//! Everything else (buffering, retries, read-your-own-writes) lives in
//! `confkv_client`.
//!
//! ## Example
//!
//! ```rust
//! use confkv_store::{Compare, InMemoryStore, KvStore, Revision, TxnRequest, WriteOp};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let store = InMemoryStore::new();
//! store.put(b"a", b"1".to_vec()).await.unwrap();
//!
//! let seen = store.get(b"a").await.unwrap().unwrap();
//! let request = TxnRequest::new()
//!     .compare(Compare::new(b"a".to_vec(), seen.mod_revision))
//!     .write(WriteOp::put(b"a".to_vec(), b"2".to_vec()));
//! assert!(store.txn(request).await.unwrap().succeeded);
//!
//! assert_eq!(store.current_revision().await.unwrap(), Revision::new(2));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod store;
mod types;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use store::KvStore;
pub use types::{Compare, KeyValue, Revision, TxnRequest, TxnResponse, WriteOp};
