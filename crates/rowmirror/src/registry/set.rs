//! Accessor for SET columns

use std::collections::BTreeSet;

use rowmirror_binlog::{ColumnSchema, ColumnType, Value};

use crate::common::{CacheError, Result};

/// Working copy of a SET column value, constrained to the column's options.
///
/// Members are kept in option order, which is how MySQL renders them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetValue {
    column: String,
    options: Vec<String>,
    members: BTreeSet<usize>,
}

impl SetValue {
    /// Parse `value` (comma-separated members) for a SET column.
    pub fn new(column: &ColumnSchema, value: &Value) -> Result<Self> {
        if column.column_type != ColumnType::Set {
            return Err(CacheError::schema(format!(
                "column `{}` is not a SET column",
                column.name
            )));
        }
        let mut set = Self {
            column: column.name.clone(),
            options: column.options.clone(),
            members: BTreeSet::new(),
        };
        let text = match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            other => {
                return Err(CacheError::InvalidEnumValue {
                    column: column.name.clone(),
                    value: other.to_string(),
                })
            }
        };
        for member in text.split(',').filter(|m| !m.is_empty()) {
            set.add(member)?;
        }
        Ok(set)
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    fn index(&self, member: &str) -> Option<usize> {
        self.options.iter().position(|o| o == member)
    }

    /// Members in option order.
    pub fn as_list(&self) -> Vec<&str> {
        self.members
            .iter()
            .map(|&i| self.options[i].as_str())
            .collect()
    }

    pub fn as_set(&self) -> BTreeSet<String> {
        self.as_list().into_iter().map(str::to_string).collect()
    }

    pub fn has(&self, member: &str) -> bool {
        self.index(member)
            .is_some_and(|i| self.members.contains(&i))
    }

    /// Add a member. Returns `false` if it was already present.
    pub fn add(&mut self, member: &str) -> Result<bool> {
        let index = self
            .index(member)
            .ok_or_else(|| CacheError::InvalidEnumValue {
                column: self.column.clone(),
                value: member.to_string(),
            })?;
        Ok(self.members.insert(index))
    }

    /// Remove a member. Returns `false` if it was not present.
    pub fn remove(&mut self, member: &str) -> bool {
        self.index(member)
            .is_some_and(|i| self.members.remove(&i))
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Column value to hand to `update`.
    pub fn to_value(&self) -> Value {
        Value::String(self.as_list().join(","))
    }
}
