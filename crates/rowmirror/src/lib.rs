//! # rowmirror - binlog-driven entity cache for MySQL
//!
//! Keeps an in-memory copy of registered tables, keyed by primary key, that
//! stays current by following the server's binary log. Application writes go
//! through the same cache: concurrent updates to one row are coalesced into
//! at most one in-flight write plus one queued follow-up.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  binlog   ┌────────────────────┐  TABLE_MAP  ┌────────────────┐
//! │ MySQL source │──────────►│ ReplicationSession │────────────►│ SchemaRegistry │
//! └──────┬───────┘           └─────────┬──────────┘             └───────┬────────┘
//!        │                             │ apply_insert/update/delete     │ refresh
//!        │ SQL                         ▼                                ▼
//!        │                   ┌────────────────────────────────────────────────┐
//!        └──────────────────►│ EntityRegistry (one per table)                 │
//!          Store             │   BaseRegistry: key -> Arc<Instance>           │
//!                            │   PendingUpdate chain per instance             │
//!                            └───────────────────────┬────────────────────────┘
//!                                                    │ broadcast
//!                                                    ▼
//!                                               EntityEvent
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rowmirror::{
//!     EntityRegistry, MySqlStore, Query, RegistryOptions, ReplicationConfig,
//!     ReplicationSession, Store,
//! };
//!
//! # async fn example() -> rowmirror::Result<()> {
//! let config = ReplicationConfig::new("localhost", "repl")
//!     .with_password("secret")
//!     .with_server_id(4242);
//! let store: Arc<dyn Store> = Arc::new(MySqlStore::new(&config.store_url("shop"))?);
//!
//! let options = RegistryOptions::new("shop", "orders").with_cdc_acknowledged(true);
//! let orders = EntityRegistry::open(store.clone(), options).await?;
//!
//! let mut session = ReplicationSession::new(config, store)?;
//! session.register(orders.clone());
//! tokio::spawn(async move { session.run().await });
//!
//! let order = orders
//!     .get_one(&Query::new().with("id", 7))
//!     .await?
//!     .expect("order 7 exists");
//! let mut values = rowmirror::Row::new();
//! values.insert("qty".into(), 9.into());
//! orders.update(&order, values).await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod registry;
pub mod replication;
pub mod store;

pub use common::{
    BinlogPosition, CacheError, ChangeOrigin, EntityEvent, ErrorCategory, LostStage,
    RegistryOptions, ReplicationConfig, Result,
};
pub use registry::{BaseRegistry, EntityRegistry, Instance, Query, SetValue};
pub use replication::{ReplicationSession, SchemaRegistry, ShutdownHandle};
pub use store::{MySqlStore, Store, WriteResult};

pub use rowmirror_binlog::{Row, TableSchema, Value};
