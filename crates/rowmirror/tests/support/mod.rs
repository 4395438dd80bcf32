//! Shared test harness: an in-memory store that understands the statements
//! the registry emits, plus builders for raw binlog events.

#![allow(dead_code)]

pub mod binlog;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rowmirror::store::Statement;
use rowmirror::{CacheError, EntityRegistry, RegistryOptions, Result, Row, Store, Value, WriteResult};
use rowmirror_binlog::{ColumnDefinition, KeyColumnUsage};
use tokio::sync::Semaphore;

pub const DATABASE: &str = "shop";
pub const TABLE: &str = "orders";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rowmirror=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Poll `check` until it holds or a second passes.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within a second");
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn column(
    name: &str,
    position: u32,
    data_type: &str,
    column_type: &str,
    nullable: bool,
) -> ColumnDefinition {
    ColumnDefinition {
        name: name.into(),
        ordinal_position: position,
        data_type: data_type.into(),
        column_type: column_type.into(),
        is_nullable: nullable,
        extra: String::new(),
        character_set: None,
        collation: None,
        comment: String::new(),
    }
}

/// `shop.orders`: id, qty, price, status, note
pub fn orders_columns() -> Vec<ColumnDefinition> {
    let mut id = column("id", 1, "int", "int(11)", false);
    id.extra = "auto_increment".into();
    let mut note = column("note", 5, "varchar", "varchar(32)", true);
    note.character_set = Some("utf8mb4".into());
    vec![
        id,
        column("qty", 2, "int", "int(11)", false),
        column("price", 3, "decimal", "decimal(10,2)", false),
        column("status", 4, "enum", "enum('new','paid','shipped')", false),
        note,
    ]
}

pub fn primary(column: &str, position: u32) -> KeyColumnUsage {
    KeyColumnUsage {
        constraint_name: "PRIMARY".into(),
        column_name: column.into(),
        ordinal_position: position,
        ..Default::default()
    }
}

pub fn price(cents: i64) -> Value {
    Value::Decimal(rust_decimal::Decimal::new(cents, 2))
}

pub fn order(id: i64, qty: i64, cents: i64, status: &str, note: Option<&str>) -> Row {
    row(&[
        ("id", Value::Int(id)),
        ("qty", Value::Int(qty)),
        ("price", price(cents)),
        ("status", status.into()),
        ("note", note.map_or(Value::Null, Value::from)),
    ])
}

/// Store holding an empty `shop.orders`.
pub fn orders_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.create_table(DATABASE, TABLE, orders_columns(), vec![primary("id", 1)]);
    store
}

pub async fn orders_registry(store: &Arc<MemoryStore>, options: RegistryOptions) -> EntityRegistry {
    let store: Arc<dyn Store> = store.clone();
    EntityRegistry::open(store, options).await.unwrap()
}

pub fn orders_options() -> RegistryOptions {
    RegistryOptions::new(DATABASE, TABLE)
}

// ============================================================================
// MemoryStore
// ============================================================================

struct MemTable {
    columns: Vec<ColumnDefinition>,
    keys: Vec<KeyColumnUsage>,
    rows: Vec<Row>,
    next_id: i64,
}

impl MemTable {
    fn primary_key(&self) -> Vec<String> {
        self.keys
            .iter()
            .filter(|k| k.constraint_name == "PRIMARY")
            .map(|k| k.column_name.clone())
            .collect()
    }

    fn auto_increment(&self) -> Option<String> {
        self.columns
            .iter()
            .find(|c| c.extra.contains("auto_increment"))
            .map(|c| c.name.clone())
    }

    fn find(&self, filter: &[(String, Value)]) -> Option<usize> {
        self.rows.iter().position(|row| matches(row, filter))
    }

    /// Complete row with every column, assigning the auto-increment id.
    fn materialize(&mut self, values: &Row) -> Row {
        let mut row: Row = self
            .columns
            .iter()
            .map(|c| (c.name.clone(), values.get(&c.name).cloned().unwrap_or(Value::Null)))
            .collect();
        if let Some(column) = self.auto_increment() {
            match row.get(&column).and_then(Value::as_rounded_int) {
                Some(id) => self.next_id = self.next_id.max(id as i64 + 1),
                None => {
                    row.insert(column, Value::Int(self.next_id));
                    self.next_id += 1;
                }
            }
        }
        row
    }
}

/// In-memory [`Store`] answering the statements the registry builds.
///
/// Updates report matched rows as affected, like a connection opened with
/// `CLIENT_FOUND_ROWS`. An optional gate holds every write until a permit
/// is added.
pub struct MemoryStore {
    tables: Mutex<HashMap<(String, String), MemTable>>,
    log: Mutex<Vec<Statement>>,
    gate: Option<Arc<Semaphore>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    /// Store whose writes block until the returned semaphore gets permits.
    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(Self {
            tables: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            gate: Some(gate.clone()),
        });
        (store, gate)
    }

    pub fn create_table(
        &self,
        database: &str,
        table: &str,
        columns: Vec<ColumnDefinition>,
        keys: Vec<KeyColumnUsage>,
    ) {
        self.tables.lock().insert(
            (database.into(), table.into()),
            MemTable {
                columns,
                keys,
                rows: Vec::new(),
                next_id: 1,
            },
        );
    }

    /// `ALTER TABLE ... ADD COLUMN`: existing rows get NULL.
    pub fn add_column(&self, database: &str, table: &str, definition: ColumnDefinition) {
        let mut tables = self.tables.lock();
        let t = tables
            .get_mut(&table_key(database, table))
            .expect("table exists");
        for row in &mut t.rows {
            row.insert(definition.name.clone(), Value::Null);
        }
        t.columns.push(definition);
    }

    /// Replace the declared type of an existing column.
    pub fn alter_column(&self, database: &str, table: &str, column: &str, column_type: &str) {
        let mut tables = self.tables.lock();
        let t = tables
            .get_mut(&table_key(database, table))
            .expect("table exists");
        let definition = t
            .columns
            .iter_mut()
            .find(|c| c.name == column)
            .expect("column exists");
        definition.column_type = column_type.into();
    }

    /// Insert behind the registry's back.
    pub fn insert_row(&self, database: &str, table: &str, values: Row) {
        let mut tables = self.tables.lock();
        let t = tables
            .get_mut(&table_key(database, table))
            .expect("table exists");
        let row = t.materialize(&values);
        t.rows.push(row);
    }

    /// Overwrite one column of the row with `id`, behind the registry's back.
    pub fn set_column(&self, database: &str, table: &str, id: i64, column: &str, value: Value) {
        let mut tables = self.tables.lock();
        let t = tables
            .get_mut(&table_key(database, table))
            .expect("table exists");
        let idx = t
            .find(&[("id".to_string(), Value::Int(id))])
            .expect("row exists");
        t.rows[idx].insert(column.into(), value);
    }

    /// Delete the row with `id`, behind the registry's back.
    pub fn remove_row(&self, database: &str, table: &str, id: i64) {
        let mut tables = self.tables.lock();
        if let Some(t) = tables.get_mut(&table_key(database, table)) {
            t.rows
                .retain(|row| !matches(row, &[("id".to_string(), Value::Int(id))]));
        }
    }

    pub fn rows(&self, database: &str, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .get(&table_key(database, table))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().clone()
    }

    /// Every statement that is not a SELECT, in arrival order.
    pub fn writes(&self) -> Vec<Statement> {
        self.log
            .lock()
            .iter()
            .filter(|s| !s.sql.starts_with("SELECT"))
            .cloned()
            .collect()
    }

    pub fn reads(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|s| s.sql.starts_with("SELECT"))
            .count()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.log.lock().push(Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }

    fn with_table<T>(
        &self,
        table_ref: &str,
        f: impl FnOnce(&mut MemTable) -> Result<T>,
    ) -> Result<T> {
        let (database, table) = parse_table(table_ref);
        let mut tables = self.tables.lock();
        let t = tables
            .get_mut(&(database.clone(), table.clone()))
            .ok_or_else(|| CacheError::store(format!("Table '{}.{}' doesn't exist", database, table)))?;
        f(t)
    }

    fn select(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        let rest = sql
            .strip_prefix("SELECT * FROM ")
            .ok_or_else(|| unsupported(sql))?;
        let (rest, limit) = match rest.rsplit_once(" LIMIT ") {
            Some((rest, n)) => (rest, n.parse::<usize>().ok()),
            None => (rest, None),
        };
        let (rest, order_by) = match rest.split_once(" ORDER BY ") {
            Some((rest, column)) => (rest, Some(ident(column))),
            None => (rest, None),
        };
        let (table_ref, filter) = match rest.split_once(" WHERE ") {
            Some((table_ref, clause)) => (table_ref, conditions(clause, &mut params.into_iter())),
            None => (rest, Vec::new()),
        };

        self.with_table(table_ref, |t| {
            let mut rows: Vec<Row> = t
                .rows
                .iter()
                .filter(|row| matches(row, &filter))
                .cloned()
                .collect();
            if let Some(column) = order_by {
                rows.sort_by_key(|row| row.get(&column).and_then(Value::as_rounded_int));
            }
            if let Some(limit) = limit {
                rows.truncate(limit);
            }
            Ok(rows)
        })
    }

    fn update(&self, sql: &str, params: Vec<Value>) -> Result<WriteResult> {
        let body = sql
            .strip_prefix("UPDATE ")
            .and_then(|s| s.strip_suffix(" LIMIT 1"))
            .ok_or_else(|| unsupported(sql))?;
        let (table_ref, rest) = body.split_once(" SET ").ok_or_else(|| unsupported(sql))?;
        let (set, clause) = rest.split_once(" WHERE ").ok_or_else(|| unsupported(sql))?;

        let mut params = params.into_iter();
        let assignments: Vec<(String, Value)> = set
            .split(", ")
            .map(|a| {
                let column = ident(a.trim_end_matches(" = ?"));
                (column, params.next().unwrap_or(Value::Null))
            })
            .collect();
        let filter = conditions(clause, &mut params);

        self.with_table(table_ref, |t| {
            let Some(idx) = t.find(&filter) else {
                return Ok(WriteResult::default());
            };
            let row = &mut t.rows[idx];
            let mut changed = false;
            for (column, value) in assignments {
                if !row.get(&column).is_some_and(|current| same(current, &value)) {
                    changed = true;
                    row.insert(column, value);
                }
            }
            Ok(WriteResult {
                affected_rows: 1,
                changed_rows: changed as u64,
                last_insert_id: None,
            })
        })
    }

    fn insert(&self, sql: &str, params: Vec<Value>) -> Result<WriteResult> {
        let body = sql
            .strip_prefix("INSERT INTO ")
            .ok_or_else(|| unsupported(sql))?;
        let (body, upsert) = match body.split_once(" ON DUPLICATE KEY UPDATE ") {
            Some((body, _)) => (body, true),
            None => (body, false),
        };
        let (head, _) = body.split_once(" VALUES ").ok_or_else(|| unsupported(sql))?;
        let (table_ref, columns) = head.split_once(" (").ok_or_else(|| unsupported(sql))?;
        let columns: Vec<String> = columns
            .trim_end_matches(')')
            .split(", ")
            .map(ident)
            .collect();

        let tuples: Vec<Row> = params
            .chunks(columns.len())
            .map(|chunk| columns.iter().cloned().zip(chunk.iter().cloned()).collect())
            .collect();

        self.with_table(table_ref, |t| {
            let key_columns = t.primary_key();
            let mut result = WriteResult::default();
            for values in tuples {
                let key: Vec<(String, Value)> = key_columns
                    .iter()
                    .filter_map(|c| values.get(c).map(|v| (c.clone(), v.clone())))
                    .collect();
                let existing = (key.len() == key_columns.len())
                    .then(|| t.find(&key))
                    .flatten();

                match existing {
                    Some(idx) if upsert => {
                        let row = &mut t.rows[idx];
                        let mut changed = false;
                        for (column, value) in values {
                            if key_columns.contains(&column) {
                                continue;
                            }
                            if !row.get(&column).is_some_and(|current| same(current, &value)) {
                                changed = true;
                                row.insert(column, value);
                            }
                        }
                        result.affected_rows += if changed { 2 } else { 1 };
                        result.changed_rows += changed as u64;
                    }
                    Some(_) => {
                        return Err(CacheError::store("Duplicate entry for key 'PRIMARY'"));
                    }
                    None => {
                        let row = t.materialize(&values);
                        if let Some(column) = t.auto_increment() {
                            result.last_insert_id = row
                                .get(&column)
                                .and_then(Value::as_rounded_int)
                                .map(|id| id as u64);
                        }
                        t.rows.push(row);
                        result.affected_rows += 1;
                        result.changed_rows += 1;
                    }
                }
            }
            Ok(result)
        })
    }

    fn delete(&self, sql: &str, params: Vec<Value>) -> Result<WriteResult> {
        let body = sql
            .strip_prefix("DELETE FROM ")
            .and_then(|s| s.strip_suffix(" LIMIT 1"))
            .ok_or_else(|| unsupported(sql))?;
        let (table_ref, clause) = body.split_once(" WHERE ").ok_or_else(|| unsupported(sql))?;
        let filter = conditions(clause, &mut params.into_iter());

        self.with_table(table_ref, |t| {
            let removed = t.find(&filter).map(|idx| t.rows.remove(idx)).is_some();
            Ok(WriteResult {
                affected_rows: removed as u64,
                changed_rows: removed as u64,
                last_insert_id: None,
            })
        })
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        self.record(sql, &params);
        self.select(sql, params)
    }

    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<WriteResult> {
        self.record(sql, &params);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| CacheError::store("write gate closed"))?
                .forget();
        }
        if sql.starts_with("UPDATE ") {
            self.update(sql, params)
        } else if sql.starts_with("INSERT INTO ") {
            self.insert(sql, params)
        } else if sql.starts_with("DELETE FROM ") {
            self.delete(sql, params)
        } else {
            Err(unsupported(sql))
        }
    }

    async fn columns(&self, database: &str, table: &str) -> Result<Vec<ColumnDefinition>> {
        Ok(self
            .tables
            .lock()
            .get(&table_key(database, table))
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn key_columns(&self, database: &str, table: &str) -> Result<Vec<KeyColumnUsage>> {
        Ok(self
            .tables
            .lock()
            .get(&table_key(database, table))
            .map(|t| t.keys.clone())
            .unwrap_or_default())
    }
}

fn table_key(database: &str, table: &str) -> (String, String) {
    (database.to_string(), table.to_string())
}

fn unsupported(sql: &str) -> CacheError {
    CacheError::store(format!("unsupported statement: {}", sql))
}

fn ident(s: &str) -> String {
    s.trim().trim_matches('`').replace("``", "`")
}

/// `` `db`.`table` `` -> `("db", "table")`
fn parse_table(table_ref: &str) -> (String, String) {
    match table_ref.trim().split_once("`.`") {
        Some((database, table)) => (ident(database), ident(table)),
        None => (String::new(), ident(table_ref)),
    }
}

fn conditions(clause: &str, params: &mut impl Iterator<Item = Value>) -> Vec<(String, Value)> {
    clause
        .split(" AND ")
        .map(|condition| match condition.strip_suffix(" IS NULL") {
            Some(column) => (ident(column), Value::Null),
            None => (
                ident(condition.trim_end_matches(" = ?")),
                params.next().unwrap_or(Value::Null),
            ),
        })
        .collect()
}

fn matches(row: &Row, filter: &[(String, Value)]) -> bool {
    filter.iter().all(|(column, expected)| {
        let actual = row.get(column).unwrap_or(&Value::Null);
        if expected.is_null() {
            actual.is_null()
        } else {
            same(actual, expected)
        }
    })
}

/// Equality across the integer and decimal representations a value may
/// take between the registry and the store.
fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::UInt(_), Value::Int(_) | Value::UInt(_)) => {
            a.as_rounded_int() == b.as_rounded_int()
        }
        (Value::Decimal(_), _) | (_, Value::Decimal(_)) => match (a.as_decimal(), b.as_decimal()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => a == b,
    }
}
