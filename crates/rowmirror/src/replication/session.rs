//! Replication session
//!
//! Owns one binlog connection and is the single consumer of its events:
//!
//! ```text
//! BinlogClient ──► BinlogDecoder ──► TableMap ──► SchemaRegistry::resolve
//!                                └─► Rows ─────► EntityRegistry::apply_*
//! ```
//!
//! There is no safe resynchronisation point inside the stream, so a decode
//! failure or an unresolvable table map ends the connection like a network
//! error does. The session then backs off exponentially, invalidates every
//! attached cache, and resumes from the server's current position.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rowmirror_binlog::{BinlogDecoder, BinlogEvent, Row, RowChange, RowsEvent, Value};
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};

use super::protocol::BinlogClient;
use super::schema_registry::SchemaRegistry;
use crate::common::{BinlogPosition, CacheError, ReconnectPolicy, ReplicationConfig, Result};
use crate::registry::EntityRegistry;
use crate::store::Store;

/// Stops a running session from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn stopped(&self) {
        while self.is_running() {
            self.notify.notified().await;
        }
    }
}

/// Event counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub events: u64,
    pub rows_applied: u64,
    /// Row events for unregistered or unresolved tables
    pub rows_discarded: u64,
    pub decode_failures: u64,
    pub reconnects: u64,
}

/// Follows the binlog and feeds row changes to the attached registries.
pub struct ReplicationSession {
    config: ReplicationConfig,
    store: Arc<dyn Store>,
    schemas: SchemaRegistry,
    decoder: BinlogDecoder,
    position: Option<BinlogPosition>,
    shutdown: ShutdownHandle,
    reconnect: ReconnectPolicy,
    connected_before: bool,
    stats: SessionStats,
}

impl std::fmt::Debug for ReplicationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationSession")
            .field("config", &self.config)
            .field("position", &self.position)
            .field("tables", &self.schemas.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ReplicationSession {
    /// `store` is used for position bootstrap and checksum detection; it
    /// should point at the replication source.
    pub fn new(config: ReplicationConfig, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;
        let reconnect = ReconnectPolicy::from_config(&config);
        Ok(Self {
            config,
            store,
            schemas: SchemaRegistry::new(),
            decoder: BinlogDecoder::new(),
            position: None,
            shutdown: ShutdownHandle::new(),
            reconnect,
            connected_before: false,
            stats: SessionStats::default(),
        })
    }

    /// Route row events for the registry's table to it.
    pub fn register(&mut self, registry: EntityRegistry) {
        self.schemas.register(registry);
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Position of the next event to read
    pub fn position(&self) -> Option<&BinlogPosition> {
        self.position.as_ref()
    }

    /// Start from `position` when fed events directly through
    /// [`handle_event`](Self::handle_event).
    pub fn set_position(&mut self, position: BinlogPosition) {
        self.position = Some(position);
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stop(&self) {
        self.shutdown.stop();
    }

    /// Stream until stopped, reconnecting on retriable errors.
    ///
    /// Returns `Ok` after [`stop`](Self::stop), or the error that ended the
    /// session: a non-retriable one, or the last one once
    /// `max_reconnect_attempts` consecutive attempts have failed.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Starting replication session for {}:{} (server_id={})",
            self.config.host, self.config.port, self.config.server_id
        );

        while self.shutdown.is_running() {
            let err = match self.stream().await {
                Ok(()) => break,
                Err(err) if err.is_retriable() => err,
                Err(err) => {
                    error!("Replication session failed: {}", err);
                    return Err(err);
                }
            };

            let Some(delay) = self.reconnect.on_failure() else {
                error!(
                    "Giving up after {} failed connections, last error: {}",
                    self.reconnect.failures(),
                    err
                );
                return Err(err);
            };
            warn!(
                "Replication stream failed: {}, reconnecting in {:?} (attempt {})",
                err,
                delay,
                self.reconnect.failures()
            );
            self.stats.reconnects += 1;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.stopped() => break,
            }
        }

        info!("Replication session stopped");
        Ok(())
    }

    /// One connection's lifetime. `Ok` only when stopped.
    async fn stream(&mut self) -> Result<()> {
        if self.connected_before {
            self.reset_after_disconnect();
        }

        let position = match self.config.start_position.clone() {
            Some(position) if !self.connected_before => position,
            _ => self.current_position().await?,
        };
        let checksum = self.server_checksum().await;

        let mut client = BinlogClient::connect(
            &self.config.host,
            self.config.port,
            &self.config.user,
            self.config.password.as_deref(),
            self.config.connect_timeout,
        )
        .await
        .map_err(transport)?;
        self.connected_before = true;

        negotiate_checksum(&mut client).await;
        self.decoder = BinlogDecoder::new();
        self.decoder.set_checksum(checksum);

        client
            .register_replica(self.config.server_id)
            .await
            .map_err(transport)?;
        let mut stream = client
            .binlog_dump(self.config.server_id, &position)
            .await
            .map_err(transport)?;
        self.position = Some(position);

        loop {
            let packet = tokio::select! {
                packet = stream.next_event() => packet.map_err(transport)?,
                _ = self.shutdown.stopped() => return Ok(()),
            };
            match packet {
                Some(packet) => {
                    self.handle_event(packet).await?;
                    self.reconnect.on_progress();
                }
                None => return Err(CacheError::ConnectionClosed),
            }
        }
    }

    /// Anything cached may have changed while no events were received.
    fn reset_after_disconnect(&mut self) {
        for registry in self.schemas.registries() {
            registry.invalidate();
        }
        self.schemas.clear();
        self.decoder = BinlogDecoder::new();
        self.position = None;
    }

    /// End of the newest binary log
    async fn current_position(&self) -> Result<BinlogPosition> {
        let rows = self.store.query("SHOW BINARY LOGS", Vec::new()).await?;
        let position = last_binary_log(&rows).ok_or_else(|| {
            CacheError::replication("SHOW BINARY LOGS returned no rows, binary logging may be disabled")
        })?;
        info!("Current binlog position: {}", position);
        Ok(position)
    }

    async fn server_checksum(&self) -> bool {
        match self
            .store
            .query("SELECT @@GLOBAL.binlog_checksum AS checksum", Vec::new())
            .await
        {
            Ok(rows) => {
                let algorithm = rows
                    .first()
                    .and_then(|row| row.get("checksum"))
                    .and_then(Value::as_str)
                    .unwrap_or("NONE")
                    .to_string();
                debug!("Server binlog checksum: {}", algorithm);
                algorithm.eq_ignore_ascii_case("CRC32")
            }
            Err(e) => {
                debug!("Binlog checksum query failed (server may predate checksums): {}", e);
                false
            }
        }
    }

    /// Decode one raw event and dispatch it.
    ///
    /// Decode errors, schema conflicts and failed schema refreshes are
    /// returned; the caller is expected to drop the connection.
    pub async fn handle_event(&mut self, packet: Bytes) -> Result<()> {
        let (event, header) = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.decode_failures += 1;
                error!("Failed to decode binlog event: {}", e);
                return Err(e.into());
            }
        };
        self.stats.events += 1;

        // Artificial events carry no position
        if header.next_position > 0 {
            if let Some(position) = self.position.as_mut() {
                position.position = header.next_position;
            }
        }

        match event {
            BinlogEvent::FormatDescription(fde) => {
                info!(
                    "Binlog format: version={}, server={}, checksum={}",
                    fde.binlog_version,
                    fde.server_version,
                    fde.checksum_type == 1
                );
            }
            BinlogEvent::Rotate(rotate) => {
                info!(
                    "Rotating to binlog file {} at position {}",
                    rotate.next_binlog, rotate.position
                );
                self.position = Some(BinlogPosition::new(rotate.next_binlog, rotate.position as u32));
            }
            BinlogEvent::TableMap(map) => match self.schemas.resolve(&map).await {
                Ok(changed) => trace!(
                    "Resolved table id {} for {}.{} (changed: {})",
                    map.table_id,
                    map.database,
                    map.table,
                    changed
                ),
                Err(err) => {
                    if matches!(err, CacheError::SchemaConflict { .. } | CacheError::Decode(_)) {
                        self.stats.decode_failures += 1;
                    }
                    error!("Cannot resolve {}.{}: {}", map.database, map.table, err);
                    return Err(err);
                }
            },
            BinlogEvent::Rows(rows) => self.dispatch_rows(&rows)?,
            BinlogEvent::Ignored(event_type) => trace!("Skipped {:?} event", event_type),
        }
        Ok(())
    }

    fn dispatch_rows(&mut self, event: &RowsEvent) -> Result<()> {
        let Some(entry) = self.schemas.entry(event.table_id) else {
            trace!("Discarding rows for unknown table id {}", event.table_id);
            self.stats.rows_discarded += 1;
            return Ok(());
        };
        let (Some(registry), Some(schema), Some(columns)) =
            (&entry.registry, &entry.schema, &entry.columns)
        else {
            trace!(
                "Discarding rows for {}.{} (table id {})",
                entry.database,
                entry.table,
                event.table_id
            );
            self.stats.rows_discarded += 1;
            return Ok(());
        };

        let changes = match event.decode_rows(&schema.columns, columns) {
            Ok(changes) => changes,
            Err(e) => {
                self.stats.decode_failures += 1;
                error!(
                    "Failed to decode {:?} rows for {}: {}",
                    event.kind,
                    registry.qualified_name(),
                    e
                );
                return Err(e.into());
            }
        };

        for change in changes {
            match change {
                RowChange::Insert(row) => registry.apply_insert(row),
                RowChange::Update { before, after } => registry.apply_update(before, after),
                RowChange::Delete(row) => registry.apply_delete(row),
            }
            self.stats.rows_applied += 1;
        }
        Ok(())
    }
}

async fn negotiate_checksum(client: &mut BinlogClient) {
    // MySQL 8.0.26 renamed the variable; setting both is harmless
    if let Err(e) = client
        .query(
            "SET @master_binlog_checksum = @@global.binlog_checksum, \
             @source_binlog_checksum = @@global.binlog_checksum",
        )
        .await
    {
        debug!("Binlog checksum negotiation failed: {:#}", e);
    }
    if client.is_mariadb() {
        // Bit 2: start position may lie beyond ignorable events
        if let Err(e) = client.query("SET @mariadb_slave_capability = 4").await {
            debug!("MariaDB replica capability set failed: {:#}", e);
        }
    }
}

/// Last row of `SHOW BINARY LOGS` as a position
fn last_binary_log(rows: &[Row]) -> Option<BinlogPosition> {
    let row = rows.last()?;
    let file = row.get("Log_name").and_then(Value::as_str)?;
    if file.is_empty() {
        return None;
    }
    let size = row
        .get("File_size")
        .and_then(Value::as_rounded_int)
        .and_then(|size| u32::try_from(size).ok())
        .unwrap_or(4);
    Some(BinlogPosition::new(file, size))
}

fn transport(err: anyhow::Error) -> CacheError {
    CacheError::replication(format!("{:#}", err))
}
