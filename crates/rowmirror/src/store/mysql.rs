//! `mysql_async` implementation of [`Store`]

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};
use futures::SinkExt;
use mysql_async::consts::ColumnType as MyColumnType;
use mysql_async::prelude::*;
use mysql_async::{Column, Opts, OptsBuilder, Params, Pool, Row as MyRow, Value as MyValue};
use rowmirror_binlog::{Row, Value};
use tracing::{debug, info, trace};

use super::{Store, WriteResult};
use crate::common::{CacheError, Result};

/// Character set id MySQL reports for binary data
const BINARY_CHARSET: u16 = 63;

/// Rows buffered between the streaming query task and its consumer
const STREAM_BUFFER: usize = 64;

/// Store backed by a `mysql_async` pool.
///
/// Every pooled connection runs with the session time zone pinned to UTC
/// and `CLIENT_FOUND_ROWS`, so `affected_rows` counts matched rows and
/// `changed_rows` comes from the server's info string.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: Pool,
}

impl MySqlStore {
    /// Create a store from a `mysql://` URL. Connections are opened lazily.
    pub fn new(url: &str) -> Result<Self> {
        let opts = Opts::from_url(url)
            .map_err(|e| CacheError::config(format!("Invalid MySQL URL: {}", e)))?;
        let opts = OptsBuilder::from_opts(opts)
            .client_found_rows(true)
            .init(vec!["SET time_zone = '+00:00'"]);
        Ok(Self {
            pool: Pool::new(Opts::from(opts)),
        })
    }

    /// Wrap an existing pool. The caller is responsible for its options.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn disconnect(self) -> Result<()> {
        self.pool.disconnect().await?;
        info!("MySQL store disconnected");
        Ok(())
    }
}

#[async_trait]
impl Store for MySqlStore {
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<MyRow> = conn.exec(sql, to_params(params)).await?;
        trace!("Query returned {} rows: {}", rows.len(), sql);
        Ok(rows.into_iter().map(from_mysql_row).collect())
    }

    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<WriteResult> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(sql, to_params(params)).await?;

        let affected_rows = conn.affected_rows();
        let changed_rows = parse_changed_rows(&conn.info()).unwrap_or(affected_rows);
        let result = WriteResult {
            affected_rows,
            changed_rows,
            last_insert_id: conn.last_insert_id(),
        };
        debug!(
            "Write affected {} rows, changed {}: {}",
            result.affected_rows, result.changed_rows, sql
        );
        Ok(result)
    }

    async fn query_stream(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<BoxStream<'static, Result<Row>>> {
        let mut conn = self.pool.get_conn().await?;
        let (mut tx, rx) = mpsc::channel(STREAM_BUFFER);
        let sql = sql.to_string();
        let params = to_params(params);

        tokio::spawn(async move {
            let outcome: std::result::Result<(), mysql_async::Error> = async {
                let mut result = conn.exec_iter(sql, params).await?;
                while let Some(row) = result.next().await? {
                    if tx.send(Ok(from_mysql_row(row))).await.is_err() {
                        trace!("Row stream consumer dropped");
                        break;
                    }
                }
                Ok(())
            }
            .await;
            if let Err(e) = outcome {
                let _ = tx.send(Err(CacheError::from(e))).await;
            }
        });

        Ok(rx.boxed())
    }
}

/// Parse `Changed: N` out of an UPDATE info string such as
/// `Rows matched: 1  Changed: 0  Warnings: 0`.
pub fn parse_changed_rows(info: &str) -> Option<u64> {
    let (_, rest) = info.split_once("Changed:")?;
    rest.split_whitespace().next()?.parse().ok()
}

fn to_params(values: Vec<Value>) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.into_iter().map(to_mysql).collect())
    }
}

fn to_mysql(value: Value) -> MyValue {
    match value {
        Value::Null => MyValue::NULL,
        Value::Int(v) => MyValue::Int(v),
        Value::UInt(v) => MyValue::UInt(v),
        Value::Float(v) => MyValue::Float(v),
        Value::Double(v) => MyValue::Double(v),
        Value::Decimal(d) => MyValue::Bytes(d.to_string().into_bytes()),
        Value::String(s) => MyValue::Bytes(s.into_bytes()),
        Value::Bytes(b) => MyValue::Bytes(b),
        Value::Date(d) => MyValue::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::DateTime(dt) => datetime_to_mysql(dt),
        Value::Timestamp(ts) => datetime_to_mysql(ts.naive_utc()),
    }
}

fn datetime_to_mysql(dt: NaiveDateTime) -> MyValue {
    MyValue::Date(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        dt.and_utc().timestamp_subsec_micros(),
    )
}

fn from_mysql_row(row: MyRow) -> Row {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = row.as_ref(idx).cloned().unwrap_or(MyValue::NULL);
            (column.name_str().into_owned(), from_mysql(value, column))
        })
        .collect()
}

/// Columns whose binary-charset payload stays raw bytes.
fn keeps_bytes(column: &Column) -> bool {
    match column.column_type() {
        MyColumnType::MYSQL_TYPE_BIT => true,
        MyColumnType::MYSQL_TYPE_STRING
        | MyColumnType::MYSQL_TYPE_VAR_STRING
        | MyColumnType::MYSQL_TYPE_VARCHAR
        | MyColumnType::MYSQL_TYPE_TINY_BLOB
        | MyColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | MyColumnType::MYSQL_TYPE_LONG_BLOB
        | MyColumnType::MYSQL_TYPE_BLOB => column.character_set() == BINARY_CHARSET,
        _ => false,
    }
}

fn from_mysql(value: MyValue, column: &Column) -> Value {
    match value {
        MyValue::NULL => Value::Null,
        MyValue::Int(v) => Value::Int(v),
        MyValue::UInt(v) => Value::UInt(v),
        MyValue::Float(v) => Value::Float(v),
        MyValue::Double(v) => Value::Double(v),
        MyValue::Bytes(b) if keeps_bytes(column) => Value::Bytes(b),
        MyValue::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        MyValue::Date(0, 0, 0, _, _, _, _) => Value::Null,
        MyValue::Date(year, month, day, hour, minute, second, micros) => {
            let Some(date) = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32) else {
                return Value::Null;
            };
            if column.column_type() == MyColumnType::MYSQL_TYPE_DATE {
                return Value::Date(date);
            }
            date.and_hms_micro_opt(hour as u32, minute as u32, second as u32, micros)
                .map(Value::DateTime)
                .unwrap_or(Value::Null)
        }
        MyValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let hours = days * 24 + hours as u32;
            let sign = if negative { "-" } else { "" };
            let text = if micros > 0 {
                format!("{}{:02}:{:02}:{:02}.{:06}", sign, hours, minutes, seconds, micros)
            } else {
                format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds)
            };
            Value::String(text)
        }
    }
}
