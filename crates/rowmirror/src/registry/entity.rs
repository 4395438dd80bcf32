//! Entity registry
//!
//! One registry per table. It owns the instance cache, runs reads and writes
//! against the [`Store`], and folds replication events back into the cache.
//!
//! ## Write path
//!
//! ```text
//! update(instance, values)
//!   │ diff against current + queued values
//!   ├─ empty, nothing pending ──► Ok
//!   ├─ nothing pending ────────► PendingUpdate ──► writer task
//!   └─ write in flight ────────► merge into queued follow-up
//!
//! writer task:  UPDATE ─► ack from replication (CDC mode) or re-read
//!               ─► resolve waiters ─► start follow-up
//! ```
//!
//! In CDC-acknowledged mode creation and deletion notifications come from
//! the replication hooks instead of the local write path, so each row change
//! is announced once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use rowmirror_binlog::{Row, TableSchema, Value};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, trace, warn};

use super::base::BaseRegistry;
use super::diff;
use super::instance::{Instance, InstanceState};
use super::pending::{self, PendingUpdate};
use super::query::Query;
use super::set::SetValue;
use crate::common::{
    CacheError, ChangeOrigin, EntityEvent, LostStage, NotificationStats, Notifier,
    RegistryOptions, Result,
};
use crate::store::{sql, Store, WriteResult};

/// Cache and write coordinator for one table.
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct EntityRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    store: Arc<dyn Store>,
    options: RegistryOptions,
    schema: RwLock<Option<Arc<TableSchema>>>,
    /// Serializes introspection
    refresh_lock: tokio::sync::Mutex<()>,
    base: BaseRegistry,
    notifier: Notifier,
    generation: AtomicU64,
}

/// One write handed to the writer task
struct WriteJob {
    generation: u64,
    target: Row,
    key: Row,
    key_string: String,
    ack: Option<oneshot::Receiver<()>>,
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("table", &self.qualified_name())
            .field("schema_version", &self.schema_version())
            .field("cached", &self.inner.base.len())
            .field("cdc_acknowledged", &self.inner.options.cdc_acknowledged)
            .finish_non_exhaustive()
    }
}

impl EntityRegistry {
    /// Create a registry without touching the store. Operations wait for
    /// introspection on first use; call [`refresh_schema`] or use [`open`]
    /// to load it eagerly.
    ///
    /// [`refresh_schema`]: EntityRegistry::refresh_schema
    /// [`open`]: EntityRegistry::open
    pub fn new(store: Arc<dyn Store>, options: RegistryOptions) -> Result<Self> {
        options.validate()?;
        let notifier = Notifier::new(&options.qualified_name(), options.channel_capacity);
        Ok(Self {
            inner: Arc::new(RegistryInner {
                store,
                base: BaseRegistry::new(options.cache_age),
                options,
                schema: RwLock::new(None),
                refresh_lock: tokio::sync::Mutex::new(()),
                notifier,
                generation: AtomicU64::new(0),
            }),
        })
    }

    /// Create a registry and introspect its table.
    pub async fn open(store: Arc<dyn Store>, options: RegistryOptions) -> Result<Self> {
        let registry = Self::new(store, options)?;
        registry.refresh_schema().await?;
        Ok(registry)
    }

    pub fn database(&self) -> &str {
        &self.inner.options.database
    }

    pub fn table(&self) -> &str {
        &self.inner.options.table
    }

    pub fn qualified_name(&self) -> String {
        self.inner.options.qualified_name()
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.inner.options
    }

    /// Current schema, `None` before the first introspection.
    pub fn schema(&self) -> Option<Arc<TableSchema>> {
        self.inner.schema.read().clone()
    }

    /// Version of the current schema, 0 before the first introspection.
    pub fn schema_version(&self) -> u64 {
        self.inner.schema.read().as_ref().map_or(0, |s| s.version)
    }

    /// Whether the initial introspection has completed.
    pub fn is_ready(&self) -> bool {
        self.inner.notifier.is_ready()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.inner.notifier.subscribe()
    }

    pub fn notification_stats(&self) -> &Arc<NotificationStats> {
        self.inner.notifier.stats()
    }

    /// Cached instance under a primary key string, fresh or not.
    pub fn cached(&self, key: &str) -> Option<Arc<Instance>> {
        self.inner.base.get(key)
    }

    pub fn cached_count(&self) -> usize {
        self.inner.base.len()
    }

    /// Re-read the table definition and bump the schema version.
    pub async fn refresh_schema(&self) -> Result<Arc<TableSchema>> {
        self.load_schema(true).await
    }

    async fn ready(&self) -> Result<Arc<TableSchema>> {
        match self.schema() {
            Some(schema) => Ok(schema),
            None => self.load_schema(false).await,
        }
    }

    async fn load_schema(&self, force: bool) -> Result<Arc<TableSchema>> {
        let _guard = self.inner.refresh_lock.lock().await;
        let previous = self.schema();
        if let (false, Some(schema)) = (force, &previous) {
            return Ok(schema.clone());
        }

        let options = &self.inner.options;
        let columns = self
            .inner
            .store
            .columns(&options.database, &options.table)
            .await?;
        let keys = self
            .inner
            .store
            .key_columns(&options.database, &options.table)
            .await?;
        let mut schema =
            TableSchema::from_information_schema(&options.database, &options.table, &columns, &keys)?;
        schema.version = previous.as_ref().map_or(0, |s| s.version) + 1;

        if schema.primary_key.is_empty() {
            warn!(
                "{} has no primary key, rows will not be cached",
                schema.qualified_name()
            );
        }
        info!(
            "Loaded schema for {} (version {}, {} columns, key {:?})",
            schema.qualified_name(),
            schema.version,
            schema.columns.len(),
            schema.primary_key
        );

        let schema = Arc::new(schema);
        *self.inner.schema.write() = Some(schema.clone());
        self.inner.notifier.fire_ready();
        Ok(schema)
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn notify(&self, event: EntityEvent) {
        self.inner.notifier.notify(event);
    }

    /// Mark every cached instance stale.
    pub fn invalidate(&self) {
        self.inner.base.invalidate();
        info!("Invalidated cache for {}", self.qualified_name());
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read instances matching `query`.
    ///
    /// A plain primary-key lookup is answered from the cache when the cached
    /// instance is fresh and matches every filter value.
    pub async fn get(&self, query: &Query) -> Result<Vec<Arc<Instance>>> {
        let schema = self.ready().await?;

        if let Some(key) = query.primary_key(&schema) {
            if let Some(instance) = self.inner.base.get_fresh(&key) {
                if diff::satisfies(&schema, &instance.values(), &query.filter) {
                    trace!("Cache hit for {} key {}", schema.qualified_name(), key);
                    return Ok(vec![instance]);
                }
            }
        }

        let stmt = self.select(query);
        let rows = self.inner.store.query(&stmt.sql, stmt.params).await?;
        debug!(
            "Read {} rows from {}",
            rows.len(),
            schema.qualified_name()
        );
        Ok(rows
            .into_iter()
            .map(|row| self.cache_row(&schema, row))
            .collect())
    }

    /// First instance matching `query`.
    pub async fn get_one(&self, query: &Query) -> Result<Option<Arc<Instance>>> {
        Ok(self.get(query).await?.into_iter().next())
    }

    /// Stream instances matching `query` straight from the store.
    pub async fn get_stream(
        &self,
        query: &Query,
    ) -> Result<BoxStream<'static, Result<Arc<Instance>>>> {
        let schema = self.ready().await?;
        let stmt = self.select(query);
        let rows = self.inner.store.query_stream(&stmt.sql, stmt.params).await?;
        let registry = self.clone();
        Ok(rows
            .map(move |row| row.map(|row| registry.cache_row(&schema, row)))
            .boxed())
    }

    fn select(&self, query: &Query) -> sql::Statement {
        sql::select(
            self.database(),
            self.table(),
            &query.filter,
            query.order_by.as_deref(),
            query.limit,
        )
    }

    fn cache_row(&self, schema: &TableSchema, row: Row) -> Arc<Instance> {
        let row = schema.coerce_row(row);
        self.inner.base.store(schema, row).0
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Validate and coerce caller-supplied values.
    fn validated(&self, schema: &TableSchema, values: Row) -> Result<Row> {
        values
            .into_iter()
            .map(|(name, value)| {
                let column = schema
                    .column(&name)
                    .ok_or_else(|| CacheError::UnknownColumn {
                        table: schema.qualified_name(),
                        column: name.clone(),
                    })?;
                diff::validate(column, &value)?;
                Ok((name, column.coerce(value)))
            })
            .collect()
    }

    /// Insert a row, or update it if the key already exists, and return the
    /// cached instance read back from the store.
    pub async fn create(&self, values: Row) -> Result<Arc<Instance>> {
        let schema = self.ready().await?;
        let values = self.validated(&schema, values)?;

        let stmt = sql::upsert(self.database(), self.table(), &values, &schema.primary_key);
        let result = self.inner.store.execute(&stmt.sql, stmt.params).await?;

        let key = match schema.key_values(&values) {
            Some(key) => key,
            None => auto_increment_key(&schema, result.last_insert_id)?,
        };
        let key_string = schema.build_key(&key).unwrap_or_default();

        let stmt = sql::select(self.database(), self.table(), &key, None, Some(1));
        let row = self
            .inner
            .store
            .query(&stmt.sql, stmt.params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                CacheError::instance_lost(schema.qualified_name(), &key_string, LostStage::AfterCreate)
            })?;

        let instance = self.cache_row(&schema, row);
        debug!("Created {} key {}", schema.qualified_name(), key_string);
        if !self.inner.options.cdc_acknowledged {
            self.notify(EntityEvent::Created {
                key: key_string,
                values: instance.values(),
            });
        }
        Ok(instance)
    }

    /// Bulk insert without conflict handling. Nothing is cached.
    pub async fn create_many(&self, rows: Vec<Row>) -> Result<WriteResult> {
        if rows.is_empty() {
            return Ok(WriteResult::default());
        }
        let schema = self.ready().await?;
        let rows = rows
            .into_iter()
            .map(|row| self.validated(&schema, row))
            .collect::<Result<Vec<_>>>()?;

        let stmt = sql::insert_many(self.database(), self.table(), &rows);
        let result = self.inner.store.execute(&stmt.sql, stmt.params).await?;
        info!(
            "Inserted {} rows into {}",
            result.affected_rows,
            schema.qualified_name()
        );
        Ok(result)
    }

    /// Fields of `values` that differ from the instance's current values.
    pub fn diff(&self, instance: &Instance, values: &Row) -> Result<Row> {
        let schema = self.schema_or_err()?;
        diff::diff_rows(&schema, &instance.values(), values)
    }

    fn schema_or_err(&self) -> Result<Arc<TableSchema>> {
        self.schema().ok_or_else(|| {
            CacheError::schema(format!("registry for {} is not ready", self.qualified_name()))
        })
    }

    /// Write `values` to the row behind `instance`.
    ///
    /// Resolves once the write carrying these values has completed. While
    /// another write for the same instance is in flight the values are
    /// merged into a single queued follow-up.
    pub async fn update(&self, instance: &Arc<Instance>, values: Row) -> Result<()> {
        let schema = self.ready().await?;
        let (tx, rx) = oneshot::channel();

        let start = {
            let mut state = instance.state();
            if state.key.is_none() {
                return Err(CacheError::MissingKey(schema.qualified_name()));
            }
            let delta = diff::diff_rows(&schema, &state.effective_values(), &values)?;
            let generation = self.next_generation();
            match state.pending.as_mut() {
                Some(pending) if delta.is_empty() => {
                    pending.wait(tx);
                    false
                }
                Some(pending) => {
                    trace!(
                        "Queueing {:?} behind write {} for {}",
                        delta.keys().collect::<Vec<_>>(),
                        pending.generation,
                        schema.qualified_name()
                    );
                    pending.queue(delta, tx, generation);
                    false
                }
                None if delta.is_empty() => return Ok(()),
                None => {
                    state.pending = Some(PendingUpdate::new(delta, tx, generation));
                    true
                }
            }
        };

        if start {
            let registry = self.clone();
            let instance = instance.clone();
            tokio::spawn(async move { registry.drive_writes(instance).await });
        }

        rx.await.unwrap_or(Err(CacheError::WriteAbandoned))
    }

    /// Writer task: issue the pending write, then its follow-up, until the
    /// instance has nothing queued.
    async fn drive_writes(&self, instance: Arc<Instance>) {
        while let Some(mut job) = self.prepare_write(&instance) {
            let outcome = self.write(&instance, &mut job).await;
            if !self.finish_write(&instance, job.generation, outcome) {
                break;
            }
        }
    }

    fn prepare_write(&self, instance: &Arc<Instance>) -> Option<WriteJob> {
        let schema = self.schema()?;
        let mut state = instance.state();
        let key = state.key.clone().zip(schema.key_values(&state.values));

        let Some((key_string, key)) = key else {
            let pending = state.pending.take()?;
            drop(state);
            pending.reject(&CacheError::MissingKey(schema.qualified_name()));
            return None;
        };

        let pending = state.pending.as_mut()?;
        let ack = if self.inner.options.cdc_acknowledged {
            let (tx, rx) = oneshot::channel();
            pending.ack = Some(tx);
            Some(rx)
        } else {
            None
        };
        Some(WriteJob {
            generation: pending.generation,
            target: pending.target.clone(),
            key,
            key_string,
            ack,
        })
    }

    async fn write(&self, instance: &Arc<Instance>, job: &mut WriteJob) -> Result<()> {
        let schema = self.ready().await?;
        let stmt = sql::update(self.database(), self.table(), &job.target, &job.key);
        debug!(
            "Write {} to {} key {}: {:?}",
            job.generation,
            schema.qualified_name(),
            job.key_string,
            job.target.keys().collect::<Vec<_>>()
        );

        let result = self.inner.store.execute(&stmt.sql, stmt.params).await?;
        if result.affected_rows == 0 {
            return Err(CacheError::instance_lost(
                schema.qualified_name(),
                &job.key_string,
                LostStage::BeforeUpdate,
            ));
        }

        // The key the row lives under once the write has landed
        let mut key = job.key.clone();
        for column in &schema.primary_key {
            if let Some(value) = job.target.get(column) {
                key.insert(column.clone(), value.clone());
            }
        }

        if result.changed_rows == 0 {
            warn!(
                "Wasted write to {} key {}: row matched but nothing changed",
                schema.qualified_name(),
                job.key_string
            );
        } else if let Some(ack) = job.ack.take() {
            match tokio::time::timeout(self.inner.options.ack_timeout, ack).await {
                Ok(Ok(())) => {
                    debug!("Write {} confirmed by replication", job.generation);
                    self.notify_local(instance, job.target.clone());
                    return Ok(());
                }
                Ok(Err(_)) | Err(_) => warn!(
                    "No replication acknowledgement for {} key {} within {:?}, re-reading",
                    schema.qualified_name(),
                    job.key_string,
                    self.inner.options.ack_timeout
                ),
            }
        }

        self.reconcile(&schema, instance, &key, &job.target).await
    }

    /// Re-read the row after a write and fold it into the instance.
    async fn reconcile(
        &self,
        schema: &TableSchema,
        instance: &Arc<Instance>,
        key: &Row,
        written: &Row,
    ) -> Result<()> {
        let stmt = sql::select(self.database(), self.table(), key, None, Some(1));
        let row = self
            .inner
            .store
            .query(&stmt.sql, stmt.params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                CacheError::instance_lost(
                    schema.qualified_name(),
                    schema.build_key(key).unwrap_or_default(),
                    LostStage::AfterUpdate,
                )
            })?;
        let row = schema.coerce_row(row);

        let (fresh, rekey) = merge_locked(schema, &mut instance.state(), &row);
        self.rekey(instance, rekey);

        let mut changes = written.clone();
        changes.extend(fresh);
        self.notify_local(instance, changes);
        Ok(())
    }

    fn notify_local(&self, instance: &Instance, changes: Row) {
        if let Some(key) = instance.key() {
            self.notify(EntityEvent::Updated {
                key,
                changes,
                origin: ChangeOrigin::Local,
            });
        }
    }

    fn rekey(&self, instance: &Arc<Instance>, rekey: Option<(String, String)>) {
        if let Some((old, new)) = rekey {
            self.inner.base.rekey(&old, &new, instance);
        }
    }

    /// Settle the finished write. Returns `true` if a follow-up is ready.
    fn finish_write(&self, instance: &Arc<Instance>, generation: u64, outcome: Result<()>) -> bool {
        let schema = self.schema();
        let mut state = instance.state();

        let Some(mut current) = state.pending.take() else {
            debug!("Write {} finished after its pending update was cleared", generation);
            return false;
        };
        if current.generation != generation {
            state.pending = Some(current);
            return false;
        }

        match outcome {
            Ok(()) => {
                let mut done = vec![std::mem::take(&mut current.waiters)];
                let next = match current.next.take() {
                    Some(next) => {
                        let mut next = *next;
                        let delta = match &schema {
                            Some(schema) => diff::observed_diff(schema, &state.values, &next.target),
                            None => next.target.clone(),
                        };
                        if delta.is_empty() {
                            done.push(std::mem::take(&mut next.waiters));
                            None
                        } else {
                            next.target = delta;
                            Some(next)
                        }
                    }
                    None => None,
                };
                let more = next.is_some();
                state.pending = next;
                drop(state);

                for waiters in done {
                    pending::resolve(waiters, Ok(()));
                }
                more
            }
            Err(err) => {
                drop(state);
                warn!(
                    "Write {} to {} failed: {}",
                    generation,
                    self.qualified_name(),
                    err
                );
                current.reject(&err);
                false
            }
        }
    }

    /// Delete the row behind `instance` and drop it from the cache.
    pub async fn delete(&self, instance: &Arc<Instance>) -> Result<()> {
        let schema = self.ready().await?;
        let (key, values) = {
            let state = instance.state();
            (
                state.key.clone().zip(schema.key_values(&state.values)),
                state.values.clone(),
            )
        };
        let (key_string, key) = key.ok_or_else(|| CacheError::MissingKey(schema.qualified_name()))?;

        let stmt = sql::delete(self.database(), self.table(), &key);
        let result = self.inner.store.execute(&stmt.sql, stmt.params).await?;
        if result.affected_rows == 0 {
            return Err(CacheError::instance_lost(
                schema.qualified_name(),
                key_string,
                LostStage::BeforeDelete,
            ));
        }

        self.inner.base.remove(&key_string);
        debug!("Deleted {} key {}", schema.qualified_name(), key_string);
        if !self.inner.options.cdc_acknowledged {
            self.notify(EntityEvent::Deleted {
                key: key_string,
                values,
            });
        }
        Ok(())
    }

    /// Typed accessor for a SET column of `instance`.
    pub fn set_value(&self, instance: &Instance, column: &str) -> Result<SetValue> {
        let schema = self.schema_or_err()?;
        let definition = schema
            .column(column)
            .ok_or_else(|| CacheError::UnknownColumn {
                table: schema.qualified_name(),
                column: column.to_string(),
            })?;
        SetValue::new(definition, &instance.get(column).unwrap_or(Value::Null))
    }

    // ========================================================================
    // Replication hooks
    // ========================================================================

    /// Fold a replicated insert into the cache.
    pub fn apply_insert(&self, row: Row) {
        let Some(schema) = self.schema() else {
            return;
        };
        let row = schema.coerce_row(row);
        let (instance, created) = self.inner.base.store(&schema, row);
        let Some(key) = instance.key() else {
            return;
        };
        trace!(
            "Replicated insert into {} key {} (new: {})",
            schema.qualified_name(),
            key,
            created
        );
        if self.inner.options.cdc_acknowledged {
            self.notify(EntityEvent::Created {
                key,
                values: instance.values(),
            });
        }
    }

    /// Fold a replicated update into the cache.
    ///
    /// The instance is found by the `before` key. If its pending write is
    /// satisfied by `after`, the event confirms that write and no change
    /// notification is sent.
    pub fn apply_update(&self, before: Row, after: Row) {
        let Some(schema) = self.schema() else {
            return;
        };
        let before = schema.coerce_row(before);
        let after = schema.coerce_row(after);

        let Some(key) = schema.build_key(&before) else {
            warn!(
                "Cannot build primary key for {} update event",
                schema.qualified_name()
            );
            return;
        };
        let observed = diff::observed_diff(&schema, &before, &after);

        let Some(instance) = self.inner.base.get(&key) else {
            if self.inner.options.track_unseen {
                let (instance, _) = self.inner.base.store(&schema, after);
                self.notify(EntityEvent::Updated {
                    key: instance.key().unwrap_or(key),
                    changes: observed,
                    origin: ChangeOrigin::External,
                });
            } else {
                trace!("Ignoring update for uncached {} key {}", schema.qualified_name(), key);
            }
            return;
        };

        let (rekey, confirmed) = {
            let mut state = instance.state();
            let (_, rekey) = merge_locked(&schema, &mut state, &after);
            let confirmed = match state.pending.as_mut() {
                Some(pending) if diff::satisfies(&schema, &after, &pending.target) => {
                    pending.acknowledge();
                    debug!(
                        "Replicated update confirms write {} for {} key {}",
                        pending.generation,
                        schema.qualified_name(),
                        key
                    );
                    true
                }
                Some(pending) => {
                    warn!(
                        "Observed change to {} key {} does not match pending write {}",
                        schema.qualified_name(),
                        key,
                        pending.generation
                    );
                    false
                }
                None => false,
            };
            (rekey, confirmed)
        };
        self.rekey(&instance, rekey);

        // Announced even when a re-read already holds the new values
        if !confirmed && !observed.is_empty() {
            self.notify(EntityEvent::Updated {
                key: instance.key().unwrap_or(key),
                changes: observed,
                origin: ChangeOrigin::External,
            });
        }
    }

    /// Drop a replicated delete from the cache. A write pending on the
    /// deleted instance fails with [`LostStage::DeletedRemotely`].
    pub fn apply_delete(&self, row: Row) {
        let Some(schema) = self.schema() else {
            return;
        };
        let row = schema.coerce_row(row);
        let Some(key) = schema.build_key(&row) else {
            warn!(
                "Cannot build primary key for {} delete event",
                schema.qualified_name()
            );
            return;
        };

        let removed = self.inner.base.remove(&key);
        if let Some(instance) = &removed {
            let pending = instance.state().pending.take();
            if let Some(pending) = pending {
                warn!(
                    "{} key {} deleted remotely with {} waiting writers",
                    schema.qualified_name(),
                    key,
                    pending.waiter_count()
                );
                pending.reject(&CacheError::instance_lost(
                    schema.qualified_name(),
                    &key,
                    LostStage::DeletedRemotely,
                ));
            }
        }

        let options = &self.inner.options;
        if removed.is_some() || options.cdc_acknowledged || options.track_unseen {
            self.notify(EntityEvent::Deleted { key, values: row });
        }
    }
}

/// Apply the fields of `row` that differ from the cached values. Returns
/// the applied diff and, if a key column changed, the `(old, new)` keys.
fn merge_locked(
    schema: &TableSchema,
    state: &mut InstanceState,
    row: &Row,
) -> (Row, Option<(String, String)>) {
    let changes = diff::observed_diff(schema, &state.values, row);
    state.apply(&changes);
    state.touch();

    let rekey = match (state.key.is_some(), schema.build_key(&state.values)) {
        (true, Some(new)) if state.key.as_deref() != Some(new.as_str()) => {
            state.key.replace(new.clone()).map(|old| (old, new))
        }
        _ => None,
    };
    (changes, rekey)
}

/// Key of a freshly inserted row with a single auto-increment column.
fn auto_increment_key(schema: &TableSchema, last_insert_id: Option<u64>) -> Result<Row> {
    match (schema.primary_key.as_slice(), last_insert_id) {
        ([column], Some(id))
            if id > 0 && schema.column(column).is_some_and(|c| c.auto_increment) =>
        {
            let mut key = Row::new();
            key.insert(column.clone(), Value::UInt(id));
            Ok(key)
        }
        _ => Err(CacheError::MissingKey(schema.qualified_name())),
    }
}
