//! Read filters

use rowmirror_binlog::{Row, TableSchema, Value};

/// Equality filter with optional ordering and limit.
///
/// ```rust,ignore
/// let query = Query::new().with("id", 1).order_by("created_at").limit(10);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Row,
    pub order_by: Option<String>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on an existing row's values.
    pub fn from_row(filter: Row) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(column.into(), value.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Cache key if this query is exactly a primary-key lookup.
    pub fn primary_key(&self, schema: &TableSchema) -> Option<String> {
        if self.order_by.is_some() || self.filter.len() != schema.primary_key.len() {
            return None;
        }
        if !self.filter.keys().all(|c| schema.is_key_column(c)) {
            return None;
        }
        schema.build_key(&self.filter)
    }
}

impl From<Row> for Query {
    fn from(filter: Row) -> Self {
        Self::from_row(filter)
    }
}
