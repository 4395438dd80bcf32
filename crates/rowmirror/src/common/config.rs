//! Configuration for replication sessions and entity registries

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::common::error::{CacheError, Result};

/// Binlog file and byte offset to start streaming from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogPosition {
    pub file: String,
    pub position: u32,
}

impl BinlogPosition {
    pub fn new(file: impl Into<String>, position: u32) -> Self {
        Self {
            file: file.into(),
            position,
        }
    }
}

impl std::fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.position)
    }
}

/// Replication source connection settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// MySQL host
    pub host: String,
    /// MySQL port (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Server ID for replication (must be unique among all replicas)
    pub server_id: u32,
    /// Where to start streaming; the server's current position when unset
    pub start_position: Option<BinlogPosition>,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// First reconnect delay
    pub backoff_base: Duration,
    /// Reconnect delay cap
    pub backoff_max: Duration,
    /// Fraction of each reconnect delay randomised per replica (0.0 - 1.0)
    pub backoff_jitter: f64,
    /// Give up after this many consecutive failed connections
    pub max_reconnect_attempts: Option<u32>,
}

impl std::fmt::Debug for ReplicationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("server_id", &self.server_id)
            .field("start_position", &self.start_position)
            .field("connect_timeout", &self.connect_timeout)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .field("backoff_jitter", &self.backoff_jitter)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish()
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: None,
            server_id: 1001,
            start_position: None,
            connect_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            backoff_jitter: 0.25,
            max_reconnect_attempts: None,
        }
    }
}

impl ReplicationConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_server_id(mut self, server_id: u32) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn with_start_position(mut self, file: impl Into<String>, position: u32) -> Self {
        self.start_position = Some(BinlogPosition::new(file, position));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_backoff_jitter(mut self, jitter: f64) -> Self {
        self.backoff_jitter = jitter;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Connection URL for a [`MySqlStore`](crate::store::MySqlStore) on the
    /// same server, with credentials percent-encoded.
    pub fn store_url(&self, database: &str) -> String {
        let encode = |s: &str| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
        let credentials = match self.password.as_deref() {
            Some(password) => format!("{}:{}", encode(&self.user), encode(password)),
            None => encode(&self.user),
        };
        format!(
            "mysql://{}@{}:{}/{}",
            credentials,
            self.host,
            self.port,
            encode(database)
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(CacheError::config("host must not be empty"));
        }
        if self.user.is_empty() {
            return Err(CacheError::config("user must not be empty"));
        }
        if self.server_id == 0 {
            return Err(CacheError::config("server_id must be non-zero"));
        }
        if self.backoff_base.is_zero() || self.backoff_base > self.backoff_max {
            return Err(CacheError::config(format!(
                "invalid backoff: base {:?}, max {:?}",
                self.backoff_base, self.backoff_max
            )));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(CacheError::config(format!(
                "backoff_jitter must be between 0 and 1, got {}",
                self.backoff_jitter
            )));
        }
        Ok(())
    }
}

/// Settings for one [`EntityRegistry`](crate::registry::EntityRegistry)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryOptions {
    pub database: String,
    pub table: String,
    /// How long a cached instance answers reads without a store round trip
    pub cache_age: Duration,
    /// Writes are confirmed by the matching binlog event rather than by a
    /// re-read; creation notifications come from replicated inserts
    pub cdc_acknowledged: bool,
    /// Cache rows first seen through replicated updates
    pub track_unseen: bool,
    /// How long a CDC-acknowledged write waits for its event before
    /// reconciling with a store read
    pub ack_timeout: Duration,
    /// Notification channel capacity
    pub channel_capacity: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            database: String::new(),
            table: String::new(),
            cache_age: Duration::from_secs(300),
            cdc_acknowledged: false,
            track_unseen: false,
            ack_timeout: Duration::from_secs(30),
            channel_capacity: 256,
        }
    }
}

impl RegistryOptions {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_age(mut self, cache_age: Duration) -> Self {
        self.cache_age = cache_age;
        self
    }

    pub fn with_cdc_acknowledged(mut self, enabled: bool) -> Self {
        self.cdc_acknowledged = enabled;
        self
    }

    pub fn with_track_unseen(mut self, enabled: bool) -> Self {
        self.track_unseen = enabled;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// `database.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() || self.table.is_empty() {
            return Err(CacheError::config("database and table must be set"));
        }
        if self.channel_capacity == 0 {
            return Err(CacheError::config("channel_capacity must be positive"));
        }
        if self.cdc_acknowledged && self.ack_timeout.is_zero() {
            return Err(CacheError::config(
                "ack_timeout must be positive in CDC-acknowledged mode",
            ));
        }
        Ok(())
    }
}
