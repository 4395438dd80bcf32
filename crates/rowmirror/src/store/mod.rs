//! Backing store abstraction
//!
//! The registry only needs four things from the database: row reads, writes
//! that report affected/changed counts, a streaming read, and table
//! introspection. [`MySqlStore`] implements them over `mysql_async`.

mod mysql;
pub mod sql;

pub use mysql::{parse_changed_rows, MySqlStore};
pub use sql::Statement;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use rowmirror_binlog::{ColumnDefinition, KeyColumnUsage, Row, Value};

use crate::common::{CacheError, Result};

/// Outcome of a write statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Rows matched by the statement
    pub affected_rows: u64,
    /// Rows whose stored values actually changed
    pub changed_rows: u64,
    pub last_insert_id: Option<u64>,
}

const COLUMNS_QUERY: &str = "SELECT COLUMN_NAME AS name, ORDINAL_POSITION AS ordinal_position, \
     DATA_TYPE AS data_type, COLUMN_TYPE AS column_type, IS_NULLABLE AS is_nullable, \
     EXTRA AS extra, CHARACTER_SET_NAME AS character_set, COLLATION_NAME AS collation, \
     COLUMN_COMMENT AS comment \
     FROM information_schema.columns \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION";

const KEY_COLUMNS_QUERY: &str = "SELECT CONSTRAINT_NAME AS constraint_name, \
     COLUMN_NAME AS column_name, ORDINAL_POSITION AS ordinal_position, \
     REFERENCED_TABLE_SCHEMA AS referenced_table_schema, \
     REFERENCED_TABLE_NAME AS referenced_table_name, \
     REFERENCED_COLUMN_NAME AS referenced_column_name \
     FROM information_schema.key_column_usage \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
     ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION";

/// Database access used by registries and the replication session.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run a read and buffer every row.
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>>;

    /// Run a write.
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<WriteResult>;

    /// Run a read and yield rows as they arrive.
    async fn query_stream(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<BoxStream<'static, Result<Row>>> {
        let rows = self.query(sql, params).await?;
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    /// `information_schema.columns` rows for a table.
    async fn columns(&self, database: &str, table: &str) -> Result<Vec<ColumnDefinition>> {
        let rows = self
            .query(COLUMNS_QUERY, vec![database.into(), table.into()])
            .await?;
        rows.iter().map(column_definition).collect()
    }

    /// `information_schema.key_column_usage` rows for a table.
    async fn key_columns(&self, database: &str, table: &str) -> Result<Vec<KeyColumnUsage>> {
        let rows = self
            .query(KEY_COLUMNS_QUERY, vec![database.into(), table.into()])
            .await?;
        rows.iter().map(key_column_usage).collect()
    }
}

fn text(row: &Row, column: &str) -> Option<String> {
    match row.get(column) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Bytes(b)) => Some(String::from_utf8_lossy(b).into_owned()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn required_text(row: &Row, column: &str) -> Result<String> {
    text(row, column)
        .ok_or_else(|| CacheError::schema(format!("introspection row missing `{}`", column)))
}

fn ordinal(row: &Row, column: &str) -> Result<u32> {
    row.get(column)
        .and_then(Value::as_rounded_int)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| CacheError::schema(format!("introspection row has invalid `{}`", column)))
}

fn column_definition(row: &Row) -> Result<ColumnDefinition> {
    Ok(ColumnDefinition {
        name: required_text(row, "name")?,
        ordinal_position: ordinal(row, "ordinal_position")?,
        data_type: required_text(row, "data_type")?,
        column_type: required_text(row, "column_type")?,
        is_nullable: text(row, "is_nullable").is_some_and(|v| v.eq_ignore_ascii_case("YES")),
        extra: text(row, "extra").unwrap_or_default(),
        character_set: text(row, "character_set"),
        collation: text(row, "collation"),
        comment: text(row, "comment").unwrap_or_default(),
    })
}

fn key_column_usage(row: &Row) -> Result<KeyColumnUsage> {
    Ok(KeyColumnUsage {
        constraint_name: required_text(row, "constraint_name")?,
        column_name: required_text(row, "column_name")?,
        ordinal_position: ordinal(row, "ordinal_position")?,
        referenced_table_schema: text(row, "referenced_table_schema"),
        referenced_table_name: text(row, "referenced_table_name"),
        referenced_column_name: text(row, "referenced_column_name"),
    })
}
