//! Type-aware row comparison
//!
//! A diff holds only the candidate fields that differ from the current
//! values, each set to the candidate value coerced to its column type. An
//! empty diff means no write is needed.

use std::collections::BTreeSet;

use rowmirror_binlog::{ColumnSchema, ColumnType, Row, TableSchema, Value};
use rust_decimal::RoundingStrategy;

use crate::common::{CacheError, Result};

/// Diff for a write request. Unknown columns and values outside an enum or
/// set option list are rejected.
pub fn diff_rows(schema: &TableSchema, current: &Row, candidate: &Row) -> Result<Row> {
    let mut changes = Row::new();
    for (name, value) in candidate {
        let column = schema
            .column(name)
            .ok_or_else(|| CacheError::UnknownColumn {
                table: schema.qualified_name(),
                column: name.clone(),
            })?;
        validate(column, value)?;
        let value = column.coerce(value.clone());
        if !values_equal(column, current.get(name).unwrap_or(&Value::Null), &value) {
            changes.insert(name.clone(), value);
        }
    }
    Ok(changes)
}

/// Diff for values observed in the store or on the replication stream.
/// Nothing is validated and unknown columns are compared exactly.
pub fn observed_diff(schema: &TableSchema, current: &Row, candidate: &Row) -> Row {
    candidate
        .iter()
        .filter_map(|(name, value)| {
            let current = current.get(name).unwrap_or(&Value::Null);
            let equal = match schema.column(name) {
                Some(column) => values_equal(column, current, value),
                None => current == value,
            };
            (!equal).then(|| (name.clone(), value.clone()))
        })
        .collect()
}

/// Reject enum and set values outside the option list.
pub fn validate(column: &ColumnSchema, value: &Value) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }
    let invalid = || CacheError::InvalidEnumValue {
        column: column.name.clone(),
        value: value.to_string(),
    };
    match column.column_type {
        ColumnType::Enum => {
            let text = value.as_str().ok_or_else(invalid)?;
            column.option_index(text).map(|_| ()).ok_or_else(invalid)
        }
        ColumnType::Set => {
            let text = value.as_str().ok_or_else(invalid)?;
            set_members(text)
                .all(|m| column.option_index(m).is_some())
                .then_some(())
                .ok_or_else(invalid)
        }
        _ => Ok(()),
    }
}

fn set_members(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').filter(|m| !m.is_empty())
}

/// Semantic equality under the column's comparator.
pub fn values_equal(column: &ColumnSchema, current: &Value, candidate: &Value) -> bool {
    match (current.is_null(), candidate.is_null()) {
        (true, true) => return true,
        (true, false) | (false, true) => return false,
        _ => {}
    }

    match column.column_type {
        ColumnType::Tiny
        | ColumnType::Short
        | ColumnType::Int24
        | ColumnType::Long
        | ColumnType::LongLong
        | ColumnType::Year
        | ColumnType::Bit => match (current.as_rounded_int(), candidate.as_rounded_int()) {
            (Some(a), Some(b)) => a == b,
            _ => current == candidate,
        },
        ColumnType::NewDecimal | ColumnType::Decimal => {
            let scale = column.scale.unwrap_or(0) as u32;
            match (current.as_decimal(), candidate.as_decimal()) {
                (Some(a), Some(b)) => {
                    a.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
                        == b.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
                }
                _ => current == candidate,
            }
        }
        ColumnType::Float | ColumnType::Double => match (current.as_f64(), candidate.as_f64()) {
            (Some(a), Some(b)) => match column.scale {
                Some(scale) => {
                    format!("{:.*}", scale as usize, a) == format!("{:.*}", scale as usize, b)
                }
                None if column.column_type == ColumnType::Float => (a as f32) == (b as f32),
                None => a == b,
            },
            _ => current == candidate,
        },
        ColumnType::Timestamp
        | ColumnType::Timestamp2
        | ColumnType::DateTime
        | ColumnType::DateTime2
        | ColumnType::Date
        | ColumnType::NewDate => {
            match (current.as_epoch_millis(), candidate.as_epoch_millis()) {
                (Some(a), Some(b)) if column.fsp == 0 => {
                    a.div_euclid(1000) == b.div_euclid(1000)
                }
                (Some(a), Some(b)) => a == b,
                _ => current == candidate,
            }
        }
        ColumnType::Set => match (current.as_str(), candidate.as_str()) {
            (Some(a), Some(b)) => {
                set_members(a).collect::<BTreeSet<_>>() == set_members(b).collect::<BTreeSet<_>>()
            }
            _ => current == candidate,
        },
        _ => match (current.as_bytes(), candidate.as_bytes()) {
            (Some(a), Some(b)) => a == b,
            _ => current == candidate,
        },
    }
}

/// Whether every field of `target` already holds in `row`.
pub fn satisfies(schema: &TableSchema, row: &Row, target: &Row) -> bool {
    observed_diff(schema, row, target).is_empty()
}
