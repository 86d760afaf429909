//! SQLite storage engine.

use std::fmt::Debug;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::config::{duration_millis, parse_duration_env, parse_env};
use crate::core::{ConnectionPool, EngineKind, PoolStats, StorageEngine};
use crate::error::{TenancyError, TenancyResult};
use crate::tenant::TenantId;

use super::schema;

/// Configuration for the SQLite engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteEngineConfig {
    /// Directory holding one `<instance>.db` file per storage instance.
    pub data_dir: PathBuf,

    /// Maximum number of connections per tenant pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections per tenant pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection checkout timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Enable foreign key constraints.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl SqliteEngineConfig {
    /// Creates a configuration with default pool settings rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            enable_foreign_keys: true,
        }
    }

    /// Creates a configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `HFS_TENANT_DATA_DIR` (default: "./data/tenants")
    /// - `HFS_SQLITE_MAX_CONNECTIONS` (default: 5)
    /// - `HFS_SQLITE_CONNECTION_TIMEOUT` (default: "30s")
    pub fn from_env() -> TenancyResult<Self> {
        let data_dir =
            std::env::var("HFS_TENANT_DATA_DIR").unwrap_or_else(|_| "./data/tenants".to_string());
        let mut config = Self::new(data_dir);

        if let Some(max) = parse_env::<u32>("HFS_SQLITE_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(timeout) = parse_duration_env("HFS_SQLITE_CONNECTION_TIMEOUT")? {
            config.connection_timeout_ms = duration_millis(timeout);
        }

        Ok(config)
    }

    /// Sets the maximum pool size.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the connection checkout timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = duration_millis(timeout);
        self
    }
}

/// SQLite engine: every storage instance is a database file in `data_dir`.
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    config: SqliteEngineConfig,
}

impl SqliteEngine {
    /// Creates an engine, creating the data directory if needed.
    pub fn new(config: SqliteEngineConfig) -> TenancyResult<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            TenancyError::unavailable(
                config.data_dir.display().to_string(),
                format!("Failed to create data directory: {}", e),
            )
        })?;
        Ok(Self { config })
    }

    /// Creates an engine with default settings rooted at `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> TenancyResult<Self> {
        Self::new(SqliteEngineConfig::new(data_dir.as_ref()))
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &SqliteEngineConfig {
        &self.config
    }

    /// Returns the database file for a storage instance.
    ///
    /// Instance names are restricted to ASCII alphanumerics, `_` and `-` so
    /// they can never escape the data directory.
    pub fn instance_path(&self, instance: &str) -> TenancyResult<PathBuf> {
        let valid = !instance.is_empty()
            && instance
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(TenancyError::Configuration {
                message: format!("'{}' is not a valid SQLite storage instance name", instance),
            });
        }
        Ok(self.config.data_dir.join(format!("{}.db", instance)))
    }

    /// Opens a standalone connection, creating the file only if `create` is set.
    pub(crate) fn open_connection(&self, instance: &str, create: bool) -> TenancyResult<Connection> {
        let path = self.instance_path(instance)?;
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = Connection::open_with_flags(&path, flags)
            .map_err(|e| schema::sql_error(instance, "Failed to open database", e))?;
        configure_connection(&conn, &self.config)
            .map_err(|e| schema::sql_error(instance, "Failed to configure connection", e))?;
        Ok(conn)
    }

    /// Builds an r2d2 pool on an existing database file.
    pub(crate) fn build_pool(&self, instance: &str) -> TenancyResult<SqlitePool> {
        let path = self.instance_path(instance)?;
        if !path.exists() {
            return Err(TenancyError::unavailable(
                instance,
                format!("database file {} does not exist", path.display()),
            ));
        }

        let config = self.config.clone();
        let manager = SqliteConnectionManager::file(&path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .with_init(move |conn| configure_connection(conn, &config));

        let pool = Pool::builder()
            .max_size(self.config.max_connections)
            .min_idle(Some(self.config.min_connections))
            .connection_timeout(Duration::from_millis(self.config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| TenancyError::unavailable(instance, e))?;

        Ok(SqlitePool {
            instance: instance.to_string(),
            pool,
        })
    }
}

/// Configure connection settings.
fn configure_connection(conn: &Connection, config: &SqliteEngineConfig) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(u64::from(config.busy_timeout_ms)))?;

    if config.enable_foreign_keys {
        conn.pragma_update(None, "foreign_keys", "ON")?;
    }

    if config.enable_wal {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }

    Ok(())
}

#[async_trait]
impl StorageEngine for SqliteEngine {
    type Pool = SqlitePool;

    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    async fn instance_exists(&self, instance: &str) -> TenancyResult<bool> {
        Ok(self.instance_path(instance)?.exists())
    }

    async fn create_instance(&self, instance: &str) -> TenancyResult<()> {
        if self.instance_exists(instance).await? {
            tracing::debug!(storage_instance = %instance, "Storage instance already exists");
            return Ok(());
        }

        self.open_connection(instance, true)?;
        tracing::info!(storage_instance = %instance, "Created SQLite storage instance");
        Ok(())
    }

    async fn apply_baseline_schema(&self, instance: &str, owner: &TenantId) -> TenancyResult<u32> {
        let mut conn = self.open_connection(instance, false)?;
        let version = schema::apply_baseline(&mut conn, instance, owner)?;
        tracing::debug!(
            storage_instance = %instance,
            tenant_id = %owner,
            version,
            "Applied baseline schema"
        );
        Ok(version)
    }

    async fn connect(&self, instance: &str) -> TenancyResult<SqlitePool> {
        self.build_pool(instance)
    }
}

/// r2d2 pool on one SQLite storage instance.
pub struct SqlitePool {
    instance: String,
    pool: Pool<SqliteConnectionManager>,
}

impl SqlitePool {
    /// Returns the storage instance this pool is connected to.
    pub fn storage_instance(&self) -> &str {
        &self.instance
    }

    pub(crate) fn into_inner(self) -> Pool<SqliteConnectionManager> {
        self.pool
    }

    /// Get a connection from the pool without going through the async trait.
    pub fn get(&self) -> TenancyResult<SqliteConnection> {
        self.pool
            .get()
            .map(SqliteConnection)
            .map_err(|e| TenancyError::unavailable(&self.instance, e))
    }
}

impl Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("instance", &self.instance)
            .field("state", &self.pool.state())
            .finish()
    }
}

#[async_trait]
impl ConnectionPool for SqlitePool {
    type Connection = SqliteConnection;

    async fn acquire(&self) -> TenancyResult<SqliteConnection> {
        self.get()
    }

    async fn health_check(&self) -> TenancyResult<()> {
        let conn = self.get()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| schema::sql_error(&self.instance, "Health check failed", e))
    }

    fn stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
            max_connections: self.pool.max_size(),
        }
    }
}

/// Connection wrapper for SQLite.
pub struct SqliteConnection(PooledConnection<SqliteConnectionManager>);

impl Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection").finish()
    }
}

impl Deref for SqliteConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.0
    }
}

impl DerefMut for SqliteConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.0
    }
}
