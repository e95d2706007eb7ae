//! redb driver for `nosql`.
//!
//! Every bucket is a redb table of byte-string keys and values inside one
//! database file. See [`RedbDriver`].

mod config;
mod driver;
mod error;
mod naming;

pub use config::*;
pub use driver::*;
pub use error::TableNameError;
