//! Error types for cache, store and replication operations
//!
//! Includes error classification for retry decisions and alerting.

use rowmirror_binlog::{DecodeError, SchemaError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Backing store errors (connection, query)
    Database,
    /// Replication stream errors (transport, decoding)
    Replication,
    /// Schema introspection and resolution errors
    Schema,
    /// Per-instance cache errors (lost rows, invalid values)
    Cache,
    /// Configuration errors (invalid settings)
    Configuration,
    /// Network errors (connection, timeout)
    Network,
}

/// Point at which a cached instance was found to have no backing row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LostStage {
    /// UPDATE matched no rows
    BeforeUpdate,
    /// Re-read after a successful UPDATE returned nothing
    AfterUpdate,
    /// Read-back after INSERT returned nothing
    AfterCreate,
    /// DELETE matched no rows
    BeforeDelete,
    /// A replicated delete removed the row while a write was pending
    DeletedRemotely,
}

impl fmt::Display for LostStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LostStage::BeforeUpdate => "before update",
            LostStage::AfterUpdate => "after update",
            LostStage::AfterCreate => "after create",
            LostStage::BeforeDelete => "before delete",
            LostStage::DeletedRemotely => "deleted remotely",
        };
        f.write_str(s)
    }
}

/// Cache errors
///
/// `Clone` so one failed write can be delivered to every caller coalesced
/// onto it.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Backing store error
    #[error("Store error: {0}")]
    Store(String),

    /// Binlog decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Schema introspection error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Table id bound to a layout that cannot be reconciled
    #[error("Schema conflict for table id {table_id}: {detail}")]
    SchemaConflict { table_id: u64, detail: String },

    /// Cached instance no longer matches any row
    #[error("Instance `{key}` of {table} lost {stage}")]
    InstanceLost {
        table: String,
        key: String,
        stage: LostStage,
    },

    /// Value outside an enum or set column's option list
    #[error("Invalid value {value:?} for column `{column}`")]
    InvalidEnumValue { column: String, value: String },

    /// Column not present in the table schema
    #[error("Unknown column `{column}` in {table}")]
    UnknownColumn { table: String, column: String },

    /// Row lacks a primary key value
    #[error("Cannot build primary key for {0}")]
    MissingKey(String),

    /// Write task ended without reporting a result
    #[error("Write abandoned before completion")]
    WriteAbandoned,

    /// Replication transport error
    #[error("Replication error: {0}")]
    Replication(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,
}

impl CacheError {
    /// Create a new store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a new schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a new replication error
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a lost-instance error
    pub fn instance_lost(table: impl Into<String>, key: impl Into<String>, stage: LostStage) -> Self {
        Self::InstanceLost {
            table: table.into(),
            key: key.into(),
            stage,
        }
    }

    /// Check if this error is retriable.
    ///
    /// For the replication session this means "reconnect and resume"; decode
    /// errors and schema conflicts qualify because a fresh stream re-reads
    /// every table map.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Timeout(_) => true,
            Self::Replication(_) => true,
            Self::Decode(_) => true,
            Self::SchemaConflict { .. } => true,

            Self::Store(msg) => {
                msg.contains("Lost connection")
                    || msg.contains("Deadlock")
                    || msg.contains("Lock wait timeout")
                    || msg.contains("Connection refused")
                    || msg.contains("connection reset")
            }

            Self::Schema(_)
            | Self::InstanceLost { .. }
            | Self::InvalidEnumValue { .. }
            | Self::UnknownColumn { .. }
            | Self::MissingKey(_)
            | Self::WriteAbandoned
            | Self::Config(_) => false,
        }
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(_) => ErrorCategory::Database,
            Self::Decode(_) => ErrorCategory::Replication,
            Self::Replication(_) => ErrorCategory::Replication,
            Self::Schema(_) => ErrorCategory::Schema,
            Self::SchemaConflict { .. } => ErrorCategory::Schema,
            Self::InstanceLost { .. } => ErrorCategory::Cache,
            Self::InvalidEnumValue { .. } => ErrorCategory::Cache,
            Self::UnknownColumn { .. } => ErrorCategory::Cache,
            Self::MissingKey(_) => ErrorCategory::Cache,
            Self::WriteAbandoned => ErrorCategory::Cache,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Timeout(_) => ErrorCategory::Network,
            Self::ConnectionClosed => ErrorCategory::Network,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Store(_) => "store_error",
            Self::Decode(e) => e.error_code(),
            Self::Schema(_) => "schema_error",
            Self::SchemaConflict { .. } => "schema_conflict",
            Self::InstanceLost { .. } => "instance_lost",
            Self::InvalidEnumValue { .. } => "invalid_enum_value",
            Self::UnknownColumn { .. } => "unknown_column",
            Self::MissingKey(_) => "missing_key",
            Self::WriteAbandoned => "write_abandoned",
            Self::Replication(_) => "replication_error",
            Self::Config(_) => "config_error",
            Self::Timeout(_) => "timeout",
            Self::ConnectionClosed => "connection_closed",
        }
    }
}

impl From<SchemaError> for CacheError {
    fn from(e: SchemaError) -> Self {
        Self::Schema(e.to_string())
    }
}

impl From<mysql_async::Error> for CacheError {
    fn from(e: mysql_async::Error) -> Self {
        Self::Store(e.to_string())
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
