//! # Entity notifications
//!
//! Typed publish/subscribe for entity lifecycle changes, one channel per
//! registry.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut rx = registry.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     match event {
//!         EntityEvent::Updated { key, changes, .. } => println!("{} changed: {:?}", key, changes),
//!         _ => {}
//!     }
//! }
//! ```

use rowmirror_binlog::{row_to_json, Row};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Who caused an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// A write issued through this registry
    Local,
    /// A change observed on the replication stream with no matching local write
    External,
}

/// Entity lifecycle notification
#[derive(Debug, Clone, PartialEq)]
pub enum EntityEvent {
    /// Initial schema introspection finished
    Ready { table: String },
    Created { key: String, values: Row },
    /// Only the changed columns, with their new values
    Updated {
        key: String,
        changes: Row,
        origin: ChangeOrigin,
    },
    Deleted { key: String, values: Row },
}

impl EntityEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityEvent::Ready { .. } => "ready",
            EntityEvent::Created { .. } => "created",
            EntityEvent::Updated { .. } => "updated",
            EntityEvent::Deleted { .. } => "deleted",
        }
    }

    /// Key of the affected instance, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            EntityEvent::Ready { .. } => None,
            EntityEvent::Created { key, .. }
            | EntityEvent::Updated { key, .. }
            | EntityEvent::Deleted { key, .. } => Some(key),
        }
    }

    /// Render as JSON for logs and external sinks.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            EntityEvent::Ready { table } => serde_json::json!({"kind": "ready", "table": table}),
            EntityEvent::Created { key, values } => {
                serde_json::json!({"kind": "created", "key": key, "values": row_to_json(values)})
            }
            EntityEvent::Updated {
                key,
                changes,
                origin,
            } => serde_json::json!({
                "kind": "updated",
                "key": key,
                "changes": row_to_json(changes),
                "origin": origin,
            }),
            EntityEvent::Deleted { key, values } => {
                serde_json::json!({"kind": "deleted", "key": key, "values": row_to_json(values)})
            }
        }
    }
}

/// Notification statistics.
#[derive(Debug, Default)]
pub struct NotificationStats {
    total_sent: AtomicU64,
    created: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    /// Sent while nobody was subscribed
    dropped: AtomicU64,
}

impl NotificationStats {
    /// Record a notification.
    pub fn record(&self, event: &EntityEvent, dropped: bool) {
        self.total_sent.fetch_add(1, Ordering::Relaxed);
        match event {
            EntityEvent::Created { .. } => self.created.fetch_add(1, Ordering::Relaxed),
            EntityEvent::Updated { .. } => self.updated.fetch_add(1, Ordering::Relaxed),
            EntityEvent::Deleted { .. } => self.deleted.fetch_add(1, Ordering::Relaxed),
            EntityEvent::Ready { .. } => 0,
        };
        if dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn updated(&self) -> u64 {
        self.updated.load(Ordering::Relaxed)
    }

    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Broadcasts [`EntityEvent`]s for one table.
#[derive(Debug)]
pub struct Notifier {
    sender: broadcast::Sender<EntityEvent>,
    stats: Arc<NotificationStats>,
    table: String,
    ready: AtomicBool,
}

impl Notifier {
    pub fn new(table: &str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            stats: Arc::new(NotificationStats::default()),
            table: table.to_string(),
            ready: AtomicBool::new(false),
        }
    }

    pub fn stats(&self) -> &Arc<NotificationStats> {
        &self.stats
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Send a notification.
    pub fn notify(&self, event: EntityEvent) {
        debug!(
            "Entity notification [{}]: {} {}",
            self.table,
            event.kind(),
            event.key().unwrap_or("")
        );
        let dropped = self.sender.send(event.clone()).is_err();
        self.stats.record(&event, dropped);
    }

    /// Fire the ready notification. Returns `false` if it already fired.
    pub fn fire_ready(&self) -> bool {
        if self
            .ready
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        info!("Registry for {} ready", self.table);
        self.notify(EntityEvent::Ready {
            table: self.table.clone(),
        });
        true
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
