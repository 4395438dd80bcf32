//! Entity cache
//!
//! - [`BaseRegistry`]: the key to instance map shared by every table
//! - [`EntityRegistry`]: per-table reads, coalesced writes and replication hooks
//! - [`diff`]: type-aware value comparison

mod base;
pub mod diff;
mod entity;
mod instance;
mod pending;
mod query;
mod set;

pub use base::BaseRegistry;
pub use diff::{diff_rows, observed_diff, values_equal};
pub use entity::EntityRegistry;
pub use instance::Instance;
pub use query::Query;
pub use set::SetValue;
