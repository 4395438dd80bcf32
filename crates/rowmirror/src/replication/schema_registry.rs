//! Table id resolution
//!
//! The server assigns each TABLE_MAP a numeric id that row events refer to.
//! Ids are reused over time and may be rebound to an altered table, so each
//! TABLE_MAP is checked against the stored entry:
//!
//! | stored entry              | descriptor | action                           |
//! |---------------------------|------------|----------------------------------|
//! | none                      | -          | bind, parse columns, snapshot    |
//! | same id                   | equal      | nothing (no parse)               |
//! | same id, same table       | differs    | refresh schema, re-parse         |
//! | same id, other table      | differs    | rebind                           |
//! | other id, same table      | differs    | retire old id, refresh, bind     |
//!
//! Resolution is awaited inside the session's single consumer loop, so no
//! row event for the table is decoded while a refresh is outstanding.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use rowmirror_binlog::{TableMapEvent, TableSchema, WireColumn};
use tracing::{debug, info, trace, warn};

use crate::common::{CacheError, Result};
use crate::registry::EntityRegistry;

/// Resolved state for one table id
#[derive(Debug, Clone)]
pub struct TableMapEntry {
    pub table_id: u64,
    pub database: String,
    pub table: String,
    descriptor: Bytes,
    /// Wire column layout, parsed only for registered tables
    pub columns: Option<Vec<WireColumn>>,
    /// Schema snapshot the columns were checked against
    pub schema: Option<Arc<TableSchema>>,
    pub registry: Option<EntityRegistry>,
}

impl TableMapEntry {
    pub fn descriptor(&self) -> &Bytes {
        &self.descriptor
    }

    fn names(&self, database: &str, table: &str) -> bool {
        self.database == database && self.table == table
    }
}

/// Resolution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// TABLE_MAP events seen
    pub resolved: u64,
    /// Column layouts parsed
    pub parsed: u64,
    /// Schema refreshes triggered
    pub refreshed: u64,
}

/// Maps table ids to their registry, schema snapshot and wire layout.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    registries: HashMap<(String, String), EntityRegistry>,
    entries: HashMap<u64, TableMapEntry>,
    stats: ResolveStats,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a registry. Any entry already bound to its table is dropped so
    /// the next TABLE_MAP resolves with the registry attached.
    pub fn register(&mut self, registry: EntityRegistry) {
        let database = registry.database().to_string();
        let table = registry.table().to_string();
        self.entries.retain(|_, entry| !entry.names(&database, &table));
        info!("Registered {}.{} for replication", database, table);
        self.registries.insert((database, table), registry);
    }

    pub fn registry(&self, database: &str, table: &str) -> Option<&EntityRegistry> {
        self.registries
            .get(&(database.to_string(), table.to_string()))
    }

    pub fn registries(&self) -> impl Iterator<Item = &EntityRegistry> {
        self.registries.values()
    }

    pub fn entry(&self, table_id: u64) -> Option<&TableMapEntry> {
        self.entries.get(&table_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ResolveStats {
        self.stats
    }

    /// Forget every table id binding. Registries stay attached.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Resolve a TABLE_MAP event. Returns `true` when the binding changed
    /// and the column layout was (re)parsed.
    ///
    /// A layout that still disagrees with the table schema after a refresh
    /// is a [`CacheError::SchemaConflict`]; the id stays bound without
    /// columns, so its row events are discarded.
    pub async fn resolve(&mut self, event: &TableMapEvent) -> Result<bool> {
        self.stats.resolved += 1;

        if let Some(entry) = self.entries.get_mut(&event.table_id) {
            if entry.descriptor == event.descriptor {
                // Pick up a refresh made elsewhere; the layout itself is unchanged
                if let (Some(registry), Some(schema)) = (&entry.registry, &entry.schema) {
                    if registry.schema_version() > schema.version {
                        entry.schema = registry.schema();
                    }
                }
                trace!("Table id {} unchanged", event.table_id);
                return Ok(false);
            }
        }

        let previous = self.entries.remove(&event.table_id);
        let retired: Vec<TableMapEntry> = {
            let ids: Vec<u64> = self
                .entries
                .iter()
                .filter(|(_, entry)| entry.names(&event.database, &event.table))
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| self.entries.remove(id))
                .collect()
        };
        for entry in &retired {
            debug!(
                "Retiring table id {} for {}.{} in favour of {}",
                entry.table_id, entry.database, entry.table, event.table_id
            );
        }

        // A changed layout for a bound table means it was altered
        let was_bound = !retired.is_empty()
            || previous
                .as_ref()
                .is_some_and(|entry| entry.names(&event.database, &event.table));

        let registry = self
            .registries
            .get(&(event.database.clone(), event.table.clone()))
            .cloned();

        let mut entry = TableMapEntry {
            table_id: event.table_id,
            database: event.database.clone(),
            table: event.table.clone(),
            descriptor: event.descriptor.clone(),
            columns: None,
            schema: None,
            registry: registry.clone(),
        };

        let Some(registry) = registry else {
            trace!(
                "Table id {} -> {}.{} (not registered)",
                event.table_id,
                event.database,
                event.table
            );
            self.entries.insert(event.table_id, entry);
            return Ok(true);
        };

        let columns = event.columns()?;
        self.stats.parsed += 1;

        let mut refreshed = false;
        let mut schema = match registry.schema() {
            Some(current) if !was_bound => current,
            Some(_) => {
                refreshed = true;
                self.refresh(&registry).await?
            }
            None => {
                refreshed = true;
                registry.refresh_schema().await?
            }
        };

        if schema.columns.len() != columns.len() && !refreshed {
            debug!(
                "{}.{} has {} columns in the stream but {} in its schema, refreshing",
                event.database,
                event.table,
                columns.len(),
                schema.columns.len()
            );
            schema = self.refresh(&registry).await?;
        }

        if schema.columns.len() != columns.len() {
            let detail = format!(
                "{}.{} has {} columns in the stream but {} in its schema",
                event.database,
                event.table,
                columns.len(),
                schema.columns.len()
            );
            entry.schema = Some(schema);
            self.entries.insert(event.table_id, entry);
            return Err(CacheError::SchemaConflict {
                table_id: event.table_id,
                detail,
            });
        }

        debug!(
            "Table id {} -> {}.{} ({} columns, schema version {})",
            event.table_id,
            event.database,
            event.table,
            columns.len(),
            schema.version
        );
        entry.columns = Some(columns);
        entry.schema = Some(schema);
        self.entries.insert(event.table_id, entry);
        Ok(true)
    }

    async fn refresh(&mut self, registry: &EntityRegistry) -> Result<Arc<TableSchema>> {
        self.stats.refreshed += 1;
        warn!(
            "Table layout of {} changed, refreshing schema before decoding further rows",
            registry.qualified_name()
        );
        registry.refresh_schema().await
    }
}
