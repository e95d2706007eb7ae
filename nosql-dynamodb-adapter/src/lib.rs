//! Amazon DynamoDB driver for `nosql`.
//!
//! Each bucket is a table keyed by the string attribute `nkey`. Multi-key
//! updates run through the staging protocol; see [`DynamoDbDriver`] for the
//! caller-visible limitations.

mod config;
mod driver;
mod error;
mod item;
mod store;

pub use config::*;
pub use driver::*;
pub use error::ItemCodecError;
pub use store::{DynamoItemStore, TableLifecycle};
