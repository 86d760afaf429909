//! Storage engine abstraction.
//!
//! This module defines the [`StorageEngine`] trait, which knows how to bring a
//! tenant's physical storage instance into existence and how to open a
//! connection pool on it, and the [`ConnectionPool`] trait those pools
//! implement. The routing layer never issues SQL of its own; everything
//! engine-specific sits behind these two traits.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::TenancyResult;
use crate::tenant::TenantId;

/// Version of the baseline schema every tenant instance is created with.
///
/// Every engine creates the same logical tables:
///
/// - `schema_version` - the applied baseline version
/// - `tenant_owner` - the tenant the instance belongs to
/// - `user_data (id, data, created_at)` - tenant application data
pub const BASELINE_SCHEMA_VERSION: u32 = 1;

/// Identifies the type of storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// SQLite, one database file per storage instance.
    Sqlite,
    /// PostgreSQL, one database per storage instance.
    Postgres,
    /// Custom or test engine.
    Custom(&'static str),
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Sqlite => write!(f, "sqlite"),
            EngineKind::Postgres => write!(f, "postgres"),
            EngineKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// A live connection pool on one storage instance.
#[async_trait]
pub trait ConnectionPool: Send + Sync + Debug + 'static {
    /// The type of connection handed out by this pool.
    type Connection: Send;

    /// Acquires a connection, waiting at most the configured connection timeout.
    async fn acquire(&self) -> TenancyResult<Self::Connection>;

    /// Checks that the pool can still reach its storage instance.
    async fn health_check(&self) -> TenancyResult<()>;

    /// Returns current pool utilization.
    fn stats(&self) -> PoolStats;

    /// Stops handing out connections and releases idle ones.
    ///
    /// Called by the registry when the last reference to an evicted pool is
    /// dropped. Pools that close themselves on drop can keep the default.
    fn close(&self) {}
}

/// Point-in-time connection counts for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Connections currently open (idle or checked out).
    pub connections: u32,
    /// Open connections not currently checked out.
    pub idle_connections: u32,
    /// Maximum pool size.
    pub max_connections: u32,
}

/// Creates storage instances and opens pools on them.
///
/// Every method is keyed by a storage instance name produced by
/// [`InstanceNamer`](crate::naming::InstanceNamer). Implementations must make
/// [`create_instance`](StorageEngine::create_instance) and
/// [`apply_baseline_schema`](StorageEngine::apply_baseline_schema) safe to
/// repeat, since provisioning retries re-enter at instance creation.
///
/// The control-plane instance is created through the same engine but is never
/// reachable through tenant routing.
#[async_trait]
pub trait StorageEngine: Send + Sync + Debug + 'static {
    /// The pool type produced by [`connect`](StorageEngine::connect).
    type Pool: ConnectionPool;

    /// Returns the kind of engine.
    fn kind(&self) -> EngineKind;

    /// Returns instance names the engine owns itself and that no tenant may
    /// take, such as an administrative database.
    fn reserved_instances(&self) -> Vec<String> {
        Vec::new()
    }

    /// Returns `true` if the storage instance already exists.
    async fn instance_exists(&self, instance: &str) -> TenancyResult<bool>;

    /// Creates the storage instance. Succeeds if it already exists.
    async fn create_instance(&self, instance: &str) -> TenancyResult<()>;

    /// Applies the baseline schema and stamps the instance as owned by `owner`.
    ///
    /// Returns the schema version now in place. Fails if the instance is
    /// already stamped with a different owner.
    async fn apply_baseline_schema(&self, instance: &str, owner: &TenantId) -> TenancyResult<u32>;

    /// Opens a connection pool on an existing storage instance.
    ///
    /// Fails with [`StorageUnavailable`](crate::TenancyError::StorageUnavailable)
    /// if the instance does not exist or cannot be reached.
    async fn connect(&self, instance: &str) -> TenancyResult<Self::Pool>;
}
