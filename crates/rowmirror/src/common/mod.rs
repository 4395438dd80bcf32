//! Shared infrastructure: errors, configuration, notifications, reconnect policy

pub mod config;
pub mod error;
pub mod notification;
pub mod resilience;

pub use config::{BinlogPosition, RegistryOptions, ReplicationConfig};
pub use error::{CacheError, ErrorCategory, LostStage, Result};
pub use notification::{ChangeOrigin, EntityEvent, NotificationStats, Notifier};
pub use resilience::ReconnectPolicy;
