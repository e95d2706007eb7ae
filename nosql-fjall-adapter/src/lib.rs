//! Fjall driver for `nosql`.
//!
//! Every bucket is a fjall partition inside one keyspace directory. See
//! [`FjallDriver`] for the concurrency model and [`FjallConfig`] for tuning.

mod config;
mod driver;
mod error;
mod naming;
mod version;

pub use config::*;
pub use driver::*;
pub use error::PartitionNameError;
