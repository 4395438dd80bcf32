//! Statement builder
//!
//! Emits the small set of MySQL statements the registry needs, with
//! backtick-quoted identifiers and `?` placeholders. Column order follows the
//! `Row` map order, so the same input always produces the same SQL.

use rowmirror_binlog::{Row, Value};

/// SQL text plus positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Quote an identifier with backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// `` `database`.`table` ``
pub fn table_ref(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

/// `WHERE` clause body. NULL filters become `IS NULL`.
fn conditions(filter: &Row, params: &mut Vec<Value>) -> String {
    filter
        .iter()
        .map(|(column, value)| {
            if value.is_null() {
                format!("{} IS NULL", quote_ident(column))
            } else {
                params.push(value.clone());
                format!("{} = ?", quote_ident(column))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn assignments(values: &Row, params: &mut Vec<Value>) -> String {
    values
        .iter()
        .map(|(column, value)| {
            params.push(value.clone());
            format!("{} = ?", quote_ident(column))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT * FROM t [WHERE ...] [ORDER BY c] [LIMIT n]`
pub fn select(
    database: &str,
    table: &str,
    filter: &Row,
    order_by: Option<&str>,
    limit: Option<u64>,
) -> Statement {
    let mut params = Vec::new();
    let mut sql = format!("SELECT * FROM {}", table_ref(database, table));
    if !filter.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions(filter, &mut params));
    }
    if let Some(column) = order_by {
        sql.push_str(" ORDER BY ");
        sql.push_str(&quote_ident(column));
    }
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    Statement { sql, params }
}

/// Single-row `UPDATE` keyed by primary key values.
pub fn update(database: &str, table: &str, values: &Row, key: &Row) -> Statement {
    let mut params = Vec::new();
    let set = assignments(values, &mut params);
    let filter = conditions(key, &mut params);
    Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE {} LIMIT 1",
            table_ref(database, table),
            set,
            filter
        ),
        params,
    }
}

/// `INSERT ... ON DUPLICATE KEY UPDATE` for one row.
///
/// Non-key columns are overwritten on conflict. A row made only of key
/// columns turns the conflict branch into a no-op assignment.
pub fn upsert(database: &str, table: &str, values: &Row, key_columns: &[String]) -> Statement {
    let columns: Vec<String> = values.keys().map(|c| quote_ident(c)).collect();
    let params: Vec<Value> = values.values().cloned().collect();
    let placeholders = vec!["?"; columns.len()].join(", ");

    let mut updates: Vec<String> = values
        .keys()
        .filter(|c| !key_columns.contains(c))
        .map(|c| format!("{0} = VALUES({0})", quote_ident(c)))
        .collect();
    if updates.is_empty() {
        if let Some(first) = values.keys().next() {
            updates.push(format!("{0} = {0}", quote_ident(first)));
        }
    }

    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            table_ref(database, table),
            columns.join(", "),
            placeholders,
            updates.join(", ")
        ),
        params,
    }
}

/// Multi-row `INSERT` without conflict handling.
///
/// The column list is the union of every row's columns; a row missing one of
/// them inserts NULL there.
pub fn insert_many(database: &str, table: &str, rows: &[Row]) -> Statement {
    let mut columns: Vec<&String> = rows.iter().flat_map(|r| r.keys()).collect();
    columns.sort();
    columns.dedup();

    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
    for row in rows {
        for column in &columns {
            params.push(row.get(*column).cloned().unwrap_or(Value::Null));
        }
    }

    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES {}",
            table_ref(database, table),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            vec![tuple; rows.len()].join(", ")
        ),
        params,
    }
}

/// Single-row `DELETE` keyed by primary key values.
pub fn delete(database: &str, table: &str, key: &Row) -> Statement {
    let mut params = Vec::new();
    let filter = conditions(key, &mut params);
    Statement {
        sql: format!(
            "DELETE FROM {} WHERE {} LIMIT 1",
            table_ref(database, table),
            filter
        ),
        params,
    }
}
