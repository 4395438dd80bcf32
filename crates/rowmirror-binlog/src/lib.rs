//! # rowmirror-binlog - MySQL binary log decoding
//!
//! Pure, synchronous decoding of the MySQL replication stream into typed row
//! changes. No I/O and no async: the caller owns the connection and feeds one
//! event packet at a time.
//!
//! ## Layers
//!
//! ```text
//! packet bytes ──► BinlogDecoder ──► BinlogEvent::{TableMap, Rows, Rotate, ...}
//!                                        │
//!                   TableMapEvent::columns() ──► Vec<WireColumn>
//!                                        │
//!      RowsEvent::decode_rows(&[ColumnSchema], &[WireColumn])
//!                                        │
//!                      RowImageDecoder ──► codec::decode_value
//!                                        ▼
//!                           RowChange { Insert, Update, Delete }
//! ```
//!
//! Declared column types come from `information_schema` via
//! [`TableSchema::from_information_schema`]; wire types come from TABLE_MAP
//! events. Both are needed to decode a row image.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use rowmirror_binlog::{BinlogDecoder, BinlogEvent};
//!
//! # fn example(packet: Bytes) -> rowmirror_binlog::Result<()> {
//! let mut decoder = BinlogDecoder::new();
//! let (event, header) = decoder.decode(&packet)?;
//! if let BinlogEvent::TableMap(map) = event {
//!     println!("{}.{} -> {}", map.database, map.table, map.table_id);
//! }
//! println!("next event at {}", header.next_position);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod decoder;
pub mod error;
pub mod reader;
pub mod row;
pub mod schema;
pub mod value;

pub use decoder::{
    BinlogDecoder, BinlogEvent, EventHeader, EventType, FormatDescriptionEvent, RotateEvent,
    RowChange, RowsEvent, RowsKind, TableMapEvent,
};
pub use error::{DecodeError, Result, SchemaError};
pub use row::RowImageDecoder;
pub use schema::{
    ColumnDefinition, ColumnMeta, ColumnSchema, ColumnType, ForeignKey, KeyColumnUsage,
    TableSchema, WireColumn,
};
pub use value::{row_to_json, Row, Value};
