//! Cached row objects

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rowmirror_binlog::{Row, Value};
use tokio::time::Instant;

use super::pending::PendingUpdate;

/// One cached row.
///
/// Shared as `Arc<Instance>`. The registry mutates the same object in place
/// on every refresh, so a held reference always sees current values.
#[derive(Debug)]
pub struct Instance {
    state: Mutex<InstanceState>,
}

#[derive(Debug)]
pub(crate) struct InstanceState {
    pub values: Row,
    /// Cache key, `None` when the row lacks a primary key value
    pub key: Option<String>,
    pub refreshed_at: Instant,
    /// Set by invalidation; cleared on the next refresh
    pub stale: bool,
    pub pending: Option<PendingUpdate>,
}

impl InstanceState {
    /// Overlay `changes` onto the cached values.
    pub fn apply(&mut self, changes: &Row) {
        for (column, value) in changes {
            self.values.insert(column.clone(), value.clone());
        }
    }

    pub fn touch(&mut self) {
        self.refreshed_at = Instant::now();
        self.stale = false;
    }

    /// Values the instance is headed for, including queued writes.
    pub fn effective_values(&self) -> Row {
        let mut values = self.values.clone();
        if let Some(pending) = &self.pending {
            values.extend(pending.effective_target());
        }
        values
    }
}

impl Instance {
    pub(crate) fn new(key: Option<String>, values: Row) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(InstanceState {
                values,
                key,
                refreshed_at: Instant::now(),
                stale: false,
                pending: None,
            }),
        })
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, InstanceState> {
        self.state.lock()
    }

    /// Snapshot of every column value.
    pub fn values(&self) -> Row {
        self.state.lock().values.clone()
    }

    pub fn get(&self, column: &str) -> Option<Value> {
        self.state.lock().values.get(column).cloned()
    }

    /// Primary key string the instance is cached under.
    pub fn key(&self) -> Option<String> {
        self.state.lock().key.clone()
    }

    pub fn refreshed_at(&self) -> Instant {
        self.state.lock().refreshed_at
    }

    /// Fresh while not invalidated and younger than `cache_age`.
    pub fn is_fresh(&self, cache_age: Duration) -> bool {
        let state = self.state.lock();
        !state.stale && state.refreshed_at.elapsed() < cache_age
    }

    /// Whether a write is in flight for this instance.
    pub fn has_pending_update(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    pub fn same(a: &Arc<Instance>, b: &Arc<Instance>) -> bool {
        Arc::ptr_eq(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(qty: i64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), Value::Int(1));
        row.insert("qty".into(), Value::Int(qty));
        row
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_expires() {
        let instance = Instance::new(Some("1".into()), row(5));
        assert!(instance.is_fresh(Duration::from_secs(300)));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!instance.is_fresh(Duration::from_secs(300)));

        instance.state().touch();
        assert!(instance.is_fresh(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn test_stale_is_never_fresh() {
        let instance = Instance::new(Some("1".into()), row(5));
        instance.state().stale = true;
        assert!(!instance.is_fresh(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn test_apply_overlays_values() {
        let instance = Instance::new(Some("1".into()), row(5));
        instance.state().apply(&row(9));
        assert_eq!(instance.get("qty"), Some(Value::Int(9)));
        assert_eq!(instance.key().as_deref(), Some("1"));
        assert!(!instance.has_pending_update());
    }
}
