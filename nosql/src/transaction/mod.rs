//! Transaction model shared by every driver: operations, the builder, the
//! per-operation outcomes and the staged write set native drivers commit from.

mod builder;
mod operation;
mod write_set;

pub use builder::*;
pub use operation::*;
pub use write_set::*;
