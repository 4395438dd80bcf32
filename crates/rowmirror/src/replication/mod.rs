//! Binlog replication: transport, table id resolution and the session loop

pub mod protocol;
mod schema_registry;
mod session;

pub use protocol::{BinlogClient, BinlogStream};
pub use schema_registry::{ResolveStats, SchemaRegistry, TableMapEntry};
pub use session::{ReplicationSession, SessionStats, ShutdownHandle};
