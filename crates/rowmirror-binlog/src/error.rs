//! Error types for binlog decoding and schema introspection
//!
//! Decode errors are fatal to the replication stream: there is no safe
//! resynchronization point inside a binlog, so callers reconnect instead of
//! skipping ahead.

use thiserror::Error;

/// Errors raised while decoding binlog events, row images and column values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Cursor would read past the end of the event payload
    #[error("unexpected end of event: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    Truncated {
        needed: usize,
        offset: usize,
        remaining: usize,
    },

    /// Event payload shorter than the 19-byte common header
    #[error("event header too short: {0} bytes")]
    HeaderTooShort(usize),

    /// Declared event length disagrees with the bytes received
    #[error("event length mismatch: header declares {declared} bytes, received {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Length-coded integer with a reserved prefix byte
    #[error("invalid packed integer prefix 0x{0:02x}")]
    InvalidPackedInt(u8),

    /// Wire type the codec cannot decode
    #[error("unsupported column type {type_code} for column `{column}`")]
    UnsupportedType { column: String, type_code: u8 },

    /// Row event column count disagrees with the resolved schema
    #[error("column count mismatch: event carries {event} columns, schema has {schema}")]
    ColumnCount { event: usize, schema: usize },

    /// Packed decimal that cannot be represented
    #[error("invalid decimal for column `{column}`: {detail}")]
    InvalidDecimal { column: String, detail: String },

    /// Packed temporal value outside the calendar
    #[error("invalid temporal value for column `{column}`: {detail}")]
    InvalidTemporal { column: String, detail: String },

    /// Enum index outside the option list
    #[error("enum index {index} out of range for column `{column}` ({options} options)")]
    EnumIndex {
        column: String,
        index: u16,
        options: usize,
    },

    /// Structurally invalid event
    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },
}

impl DecodeError {
    /// Create a malformed-event error
    pub fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            detail: detail.into(),
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Truncated { .. } => "truncated",
            Self::HeaderTooShort(_) => "header_too_short",
            Self::LengthMismatch { .. } => "length_mismatch",
            Self::InvalidPackedInt(_) => "invalid_packed_int",
            Self::UnsupportedType { .. } => "unsupported_type",
            Self::ColumnCount { .. } => "column_count",
            Self::InvalidDecimal { .. } => "invalid_decimal",
            Self::InvalidTemporal { .. } => "invalid_temporal",
            Self::EnumIndex { .. } => "enum_index",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// Errors raised while turning `information_schema` rows into a [`TableSchema`].
///
/// [`TableSchema`]: crate::schema::TableSchema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Table has no columns visible to the connecting user
    #[error("table `{database}`.`{table}` not found or has no columns")]
    TableNotFound { database: String, table: String },

    /// Declared data type has no wire mapping
    #[error("unsupported data type `{data_type}` for column `{column}`")]
    UnsupportedType { column: String, data_type: String },

    /// Column definition text could not be parsed
    #[error("invalid column definition for `{column}`: {detail}")]
    InvalidDefinition { column: String, detail: String },
}

/// Result type for decoding
pub type Result<T> = std::result::Result<T, DecodeError>;
