//! # nosql - one key-value contract over many storage backends
//!
//! A bucket is a flat namespace of byte-string keys mapped to uninterpreted
//! byte-string values. Every backend in this workspace exposes the same
//! [`Driver`](driver::Driver) contract over it:
//!
//! - `get` / `set` / `del` with the strongest consistency the backend offers
//! - atomic compare-and-swap, including the must-not-exist sentinel
//! - multi-operation atomic `update`
//! - complete, internally paginated `list`
//! - explicit bucket lifecycle (`create_table` / `delete_table`)
//!
//! Backends with native multi-key transactions commit updates in one backend
//! transaction. Backends that only offer single-item conditional writes reach
//! the same contract through the [`staging`] engine.
//!
//! ## Quick Start
//!
//! ```rust
//! use nosql::driver::Database;
//! use nosql::memory::MemoryDriver;
//! use nosql::transaction::Transaction;
//!
//! # futures::executor::block_on(async {
//! let db = Database::new(MemoryDriver::new());
//! db.create_table(b"users").await.unwrap();
//! db.set(b"users", b"alice", b"v1").await.unwrap();
//!
//! let outcome = db.compare_and_swap(b"users", b"alice", Some(b"v1"), b"v2").await.unwrap();
//! assert!(outcome.swapped);
//!
//! let tx = Transaction::new().set("users", "bob", "v1").delete("users", "alice");
//! db.update(tx).await.unwrap();
//! assert_eq!(db.list(b"users").await.unwrap().len(), 1);
//! # });
//! ```
//!
//! ## Module Organization
//!
//! - [`driver`] - the `Driver` trait, the `Database` handle and `BackendKind`
//! - [`entry`] - entries and name validation
//! - [`errors`] - error kinds and the shared error type
//! - [`memory`] - in-process reference driver
//! - [`options`] - driver options
//! - [`pagination`] - the list state machine shared by all drivers
//! - [`staging`] - staged transactions over single-item conditional writes
//! - [`transaction`] - operations, transactions and their outcomes

pub mod driver;
pub mod entry;
pub mod errors;
pub mod memory;
pub mod options;
pub mod pagination;
pub mod staging;
pub mod transaction;

pub use driver::{BackendKind, Database, Driver};
pub use entry::Entry;
pub use errors::{ErrorKind, NoSqlError, NoSqlResult};
pub use options::Options;
pub use transaction::{CasOutcome, OpResult, Transaction, TxOutcome};
