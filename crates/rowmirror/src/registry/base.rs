//! Key-based instance map shared by every registry flavour
//!
//! Lock order: the map lock is never held while an instance lock is taken.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rowmirror_binlog::{Row, TableSchema};
use tracing::{debug, warn};

use super::instance::Instance;

#[derive(Debug)]
pub struct BaseRegistry {
    instances: RwLock<HashMap<String, Arc<Instance>>>,
    cache_age: Duration,
}

impl BaseRegistry {
    pub fn new(cache_age: Duration) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            cache_age,
        }
    }

    pub fn cache_age(&self) -> Duration {
        self.cache_age
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.instances.read().keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Instance>> {
        self.instances.read().get(key).cloned()
    }

    /// Cached instance under `key` if it is still fresh.
    pub fn get_fresh(&self, key: &str) -> Option<Arc<Instance>> {
        self.get(key).filter(|i| i.is_fresh(self.cache_age))
    }

    /// Cache key for `row`, `None` if a key column is missing or NULL.
    pub fn build_key(schema: &TableSchema, row: &Row) -> Option<String> {
        schema.build_key(row)
    }

    /// Merge `row` into the cached instance for its key, or cache a new one.
    ///
    /// Returns the instance and whether it was newly created. A row without
    /// a buildable key yields an uncached instance.
    pub fn store(&self, schema: &TableSchema, row: Row) -> (Arc<Instance>, bool) {
        let Some(key) = Self::build_key(schema, &row) else {
            warn!(
                "Cannot build primary key for {} row, not caching",
                schema.qualified_name()
            );
            return (Instance::new(None, row), true);
        };

        if let Some(instance) = self.get(&key) {
            Self::refresh(&instance, &row);
            return (instance, false);
        }

        let raced = {
            let mut instances = self.instances.write();
            match instances.get(&key) {
                Some(instance) => instance.clone(),
                None => {
                    let instance = Instance::new(Some(key.clone()), row);
                    instances.insert(key, instance.clone());
                    return (instance, true);
                }
            }
        };
        // Another caller cached the same key between the read and the write lock
        Self::refresh(&raced, &row);
        (raced, false)
    }

    fn refresh(instance: &Instance, row: &Row) {
        let mut state = instance.state();
        state.apply(row);
        state.touch();
    }

    /// Move `instance` from `old` to `new`. Any other instance cached under
    /// `new` is dropped.
    pub fn rekey(&self, old: &str, new: &str, instance: &Arc<Instance>) {
        if old == new {
            return;
        }
        let mut instances = self.instances.write();
        if instances
            .get(old)
            .is_some_and(|cached| Arc::ptr_eq(cached, instance))
        {
            instances.remove(old);
        }
        if let Some(replaced) = instances.insert(new.to_string(), instance.clone()) {
            if !Arc::ptr_eq(&replaced, instance) {
                warn!("Re-keying {} to {} replaced another cached instance", old, new);
            }
        }
        debug!("Re-keyed instance {} -> {}", old, new);
    }

    pub fn remove(&self, key: &str) -> Option<Arc<Instance>> {
        self.instances.write().remove(key)
    }

    /// Mark every cached instance stale so the next read goes to the store.
    pub fn invalidate(&self) {
        let instances: Vec<Arc<Instance>> = self.instances.read().values().cloned().collect();
        for instance in &instances {
            instance.state().stale = true;
        }
        debug!("Invalidated {} cached instances", instances.len());
    }

    pub fn clear(&self) {
        self.instances.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowmirror_binlog::{ColumnDefinition, KeyColumnUsage, Value};

    fn schema() -> TableSchema {
        let def = |name: &str, pos: u32| ColumnDefinition {
            name: name.into(),
            ordinal_position: pos,
            data_type: "int".into(),
            column_type: "int(11)".into(),
            ..Default::default()
        };
        TableSchema::from_information_schema(
            "shop",
            "orders",
            &[def("id", 1), def("qty", 2)],
            &[KeyColumnUsage {
                constraint_name: "PRIMARY".into(),
                column_name: "id".into(),
                ordinal_position: 1,
                ..Default::default()
            }],
        )
        .unwrap()
    }

    fn row(id: i64, qty: i64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), Value::Int(id));
        row.insert("qty".into(), Value::Int(qty));
        row
    }

    #[tokio::test]
    async fn test_store_merges_into_existing_instance() {
        let base = BaseRegistry::new(Duration::from_secs(300));
        let schema = schema();

        let (first, created) = base.store(&schema, row(1, 5));
        assert!(created);
        let (second, created) = base.store(&schema, row(1, 9));
        assert!(!created);

        assert!(Instance::same(&first, &second));
        assert_eq!(first.get("qty"), Some(Value::Int(9)));
        assert_eq!(base.len(), 1);
    }

    #[tokio::test]
    async fn test_store_without_key_is_uncached() {
        let base = BaseRegistry::new(Duration::from_secs(300));
        let mut partial = Row::new();
        partial.insert("qty".into(), Value::Int(5));

        let (instance, _) = base.store(&schema(), partial);
        assert_eq!(instance.key(), None);
        assert!(base.is_empty());
    }

    #[tokio::test]
    async fn test_rekey() {
        let base = BaseRegistry::new(Duration::from_secs(300));
        let (instance, _) = base.store(&schema(), row(1, 5));

        base.rekey("1", "2", &instance);
        assert!(base.get("1").is_none());
        assert!(Instance::same(&base.get("2").unwrap(), &instance));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_fresh_respects_cache_age() {
        let base = BaseRegistry::new(Duration::from_secs(10));
        base.store(&schema(), row(1, 5));
        assert!(base.get_fresh("1").is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(base.get_fresh("1").is_none());
        assert!(base.get("1").is_some());
    }

    #[tokio::test]
    async fn test_invalidate_and_remove() {
        let base = BaseRegistry::new(Duration::from_secs(300));
        base.store(&schema(), row(1, 5));
        base.store(&schema(), row(2, 6));

        base.invalidate();
        assert!(base.get_fresh("1").is_none());
        assert!(base.get("1").is_some());

        assert!(base.remove("1").is_some());
        assert_eq!(base.keys(), vec!["2".to_string()]);
        base.clear();
        assert!(base.is_empty());
    }
}
