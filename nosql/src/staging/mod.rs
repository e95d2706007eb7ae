//! Staged transactions over single-item conditional writes.

mod config;
mod engine;
mod item;
mod memory_store;
mod record;

pub use config::*;
pub use engine::*;
pub use item::*;
pub use memory_store::*;
pub use record::*;
