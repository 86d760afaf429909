//! PostgreSQL storage engine.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;
use tokio_postgres::error::SqlState;

use crate::config::parse_env;
use crate::core::{ConnectionPool, EngineKind, PoolStats, StorageEngine};
use crate::error::{TenancyError, TenancyResult};
use crate::naming::quote_identifier;
use crate::tenant::TenantId;

use super::schema::{self, pg_error};

/// Configuration for the PostgreSQL engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresEngineConfig {
    /// PostgreSQL host.
    #[serde(default = "default_host")]
    pub host: String,

    /// PostgreSQL port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database user. Must be allowed to `CREATE DATABASE`.
    #[serde(default = "default_user")]
    pub user: String,

    /// Database password.
    #[serde(default)]
    pub password: Option<String>,

    /// Existing database used for administrative statements.
    #[serde(default = "default_admin_database")]
    pub admin_database: String,

    /// Maximum number of connections per tenant pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connection checkout timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "helios".to_string()
}

fn default_admin_database() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> usize {
    5
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for PostgresEngineConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: None,
            admin_database: default_admin_database(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl PostgresEngineConfig {
    /// Creates a configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `HFS_PG_HOST` (default: "localhost")
    /// - `HFS_PG_PORT` (default: 5432)
    /// - `HFS_PG_USER` (default: "helios")
    /// - `HFS_PG_PASSWORD`
    /// - `HFS_PG_ADMIN_DBNAME` (default: "postgres")
    /// - `HFS_PG_MAX_CONNECTIONS` (default: 5)
    pub fn from_env() -> TenancyResult<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("HFS_PG_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_env::<u16>("HFS_PG_PORT")? {
            config.port = port;
        }
        if let Ok(user) = std::env::var("HFS_PG_USER") {
            config.user = user;
        }
        config.password = std::env::var("HFS_PG_PASSWORD").ok();
        if let Ok(dbname) = std::env::var("HFS_PG_ADMIN_DBNAME") {
            config.admin_database = dbname;
        }
        if let Some(max) = parse_env::<usize>("HFS_PG_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }

        Ok(config)
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// PostgreSQL engine: every storage instance is a database on one server.
pub struct PostgresEngine {
    config: PostgresEngineConfig,
    admin_pool: Pool,
}

impl Debug for PostgresEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresEngine")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("admin_database", &self.config.admin_database)
            .finish_non_exhaustive()
    }
}

impl PostgresEngine {
    /// Creates an engine and verifies it can reach the admin database.
    pub async fn new(config: PostgresEngineConfig) -> TenancyResult<Self> {
        let admin_pool = create_pool(&config, &config.admin_database, 2)?;

        // Verify connectivity
        let client = admin_pool
            .get()
            .await
            .map_err(|e| TenancyError::unavailable(&config.admin_database, e))?;
        drop(client);

        Ok(Self { config, admin_pool })
    }

    /// Creates an engine from environment variables.
    pub async fn from_env() -> TenancyResult<Self> {
        Self::new(PostgresEngineConfig::from_env()?).await
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &PostgresEngineConfig {
        &self.config
    }

    pub(crate) async fn admin_client(&self) -> TenancyResult<deadpool_postgres::Client> {
        self.admin_pool
            .get()
            .await
            .map_err(|e| TenancyError::unavailable(&self.config.admin_database, e))
    }

    /// Builds a pool on an existing database, verifying connectivity.
    pub(crate) async fn build_pool(&self, instance: &str) -> TenancyResult<PostgresPool> {
        if !self.instance_exists(instance).await? {
            return Err(TenancyError::unavailable(
                instance,
                "database does not exist",
            ));
        }

        let pool = create_pool(&self.config, instance, self.config.max_connections)?;
        let client = pool
            .get()
            .await
            .map_err(|e| TenancyError::unavailable(instance, e))?;
        drop(client);

        Ok(PostgresPool {
            instance: instance.to_string(),
            pool,
        })
    }
}

fn create_pool(config: &PostgresEngineConfig, dbname: &str, max_size: usize) -> TenancyResult<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(dbname.to_string());
    cfg.user = Some(config.user.clone());
    cfg.password = config.password.clone();

    cfg.builder(NoTls)
        .map_err(|e| TenancyError::Configuration {
            message: format!("Failed to create pool builder: {}", e),
        })?
        .max_size(max_size)
        .wait_timeout(Some(config.connect_timeout()))
        .create_timeout(Some(config.connect_timeout()))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| TenancyError::unavailable(dbname, e))
}

#[async_trait]
impl StorageEngine for PostgresEngine {
    type Pool = PostgresPool;

    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn reserved_instances(&self) -> Vec<String> {
        vec![
            self.config.admin_database.clone(),
            "postgres".to_string(),
            "template0".to_string(),
            "template1".to_string(),
        ]
    }

    async fn instance_exists(&self, instance: &str) -> TenancyResult<bool> {
        let client = self.admin_client().await?;
        let row = client
            .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&instance])
            .await
            .map_err(|e| pg_error(instance, "Failed to check pg_database", e))?;
        Ok(row.is_some())
    }

    async fn create_instance(&self, instance: &str) -> TenancyResult<()> {
        if self.instance_exists(instance).await? {
            tracing::debug!(storage_instance = %instance, "Storage instance already exists");
            return Ok(());
        }

        let client = self.admin_client().await?;
        let sql = format!(
            "CREATE DATABASE {} WITH ENCODING 'UTF8'",
            quote_identifier(instance)
        );
        match client.batch_execute(&sql).await {
            Ok(()) => {
                tracing::info!(storage_instance = %instance, "Created PostgreSQL database");
                Ok(())
            }
            // Lost a race with another creator; the database exists either way.
            Err(e) if e.code() == Some(&SqlState::DUPLICATE_DATABASE) => {
                tracing::debug!(storage_instance = %instance, "Database created concurrently");
                Ok(())
            }
            Err(e) => Err(pg_error(instance, "Failed to create database", e)),
        }
    }

    async fn apply_baseline_schema(&self, instance: &str, owner: &TenantId) -> TenancyResult<u32> {
        let pool = create_pool(&self.config, instance, 1)?;
        let mut client = pool
            .get()
            .await
            .map_err(|e| TenancyError::unavailable(instance, e))?;
        let version = schema::apply_baseline(&mut client, instance, owner).await?;
        drop(client);
        pool.close();

        tracing::debug!(
            storage_instance = %instance,
            tenant_id = %owner,
            version,
            "Applied baseline schema"
        );
        Ok(version)
    }

    async fn connect(&self, instance: &str) -> TenancyResult<PostgresPool> {
        self.build_pool(instance).await
    }
}

/// deadpool pool on one PostgreSQL storage instance.
pub struct PostgresPool {
    instance: String,
    pool: Pool,
}

impl PostgresPool {
    /// Returns the storage instance this pool is connected to.
    pub fn storage_instance(&self) -> &str {
        &self.instance
    }

    pub(crate) fn inner(&self) -> &Pool {
        &self.pool
    }
}

impl Debug for PostgresPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresPool")
            .field("instance", &self.instance)
            .field("status", &self.pool.status())
            .finish()
    }
}

#[async_trait]
impl ConnectionPool for PostgresPool {
    type Connection = deadpool_postgres::Client;

    async fn acquire(&self) -> TenancyResult<deadpool_postgres::Client> {
        self.pool
            .get()
            .await
            .map_err(|e| TenancyError::unavailable(&self.instance, e))
    }

    async fn health_check(&self) -> TenancyResult<()> {
        let client = self.acquire().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| pg_error(&self.instance, "Health check failed", e))?;
        Ok(())
    }

    fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            connections: status.size as u32,
            idle_connections: status.available as u32,
            max_connections: status.max_size as u32,
        }
    }

    fn close(&self) {
        self.pool.close();
    }
}
