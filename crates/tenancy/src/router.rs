//! Tenant routing facade.
//!
//! [`TenantRouter`] is the single entry point for tenant-scoped work. It
//! opens the tenant context, resolves (or transparently provisions) the
//! tenant's pool and hands the operation a [`TenantSession`] bound to that
//! pool. The context is cleared on every exit path of the operation.
//!
//! # Example
//!
//! ```no_run
//! use helios_tenancy::{TenancyConfig, TenantRouter};
//! use helios_tenancy::backends::sqlite::SqliteEngineConfig;
//!
//! # async fn example() -> Result<(), helios_tenancy::TenancyError> {
//! let router = TenantRouter::sqlite(
//!     SqliteEngineConfig::new("./data/tenants"),
//!     TenancyConfig::default(),
//! )?;
//!
//! let acme = router.create_tenant("Acme Corp").await?;
//!
//! router
//!     .with_tenant(&acme.id, |session| async move {
//!         let conn = session.connection().await?;
//!         conn.execute("INSERT INTO user_data (data) VALUES (?1)", ["hello"])
//!             .map_err(helios_tenancy::TenancyError::operation)?;
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::TenancyConfig;
use crate::core::{ConnectionPool, StorageEngine, TenantDirectory};
use crate::error::{TenancyError, TenancyResult};
use crate::naming::InstanceNamer;
use crate::provisioning::{Provisioner, ReconcileOutcome};
use crate::registry::{PoolEntry, PoolRegistry};
use crate::tenant::{TenantContext, TenantId, TenantRecord, context};

/// A tenant-bound handle passed to routed operations.
pub struct TenantSession<P: ConnectionPool> {
    context: TenantContext,
    entry: Arc<PoolEntry<P>>,
}

impl<P: ConnectionPool> TenantSession<P> {
    /// Returns the tenant this session is bound to.
    pub fn tenant_id(&self) -> &TenantId {
        self.context.tenant_id()
    }

    /// Returns the tenant context of the unit of work.
    pub fn context(&self) -> &TenantContext {
        &self.context
    }

    /// Returns the storage instance backing the tenant.
    pub fn storage_instance(&self) -> &str {
        self.entry.storage_instance()
    }

    /// Returns the tenant's pool.
    pub fn pool(&self) -> &P {
        self.entry.pool()
    }

    /// Returns the registry entry the session holds.
    pub fn entry(&self) -> &Arc<PoolEntry<P>> {
        &self.entry
    }

    /// Checks a connection out of the tenant's pool.
    pub async fn connection(&self) -> TenancyResult<P::Connection> {
        self.entry.pool().acquire().await
    }
}

impl<P: ConnectionPool> Clone for TenantSession<P> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<P: ConnectionPool> Debug for TenantSession<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantSession")
            .field("tenant_id", self.tenant_id())
            .field("storage_instance", &self.storage_instance())
            .finish()
    }
}

/// Routes tenant-scoped operations to per-tenant storage instances.
pub struct TenantRouter<E: StorageEngine> {
    provisioner: Provisioner<E>,
    config: TenancyConfig,
}

impl<E: StorageEngine> Clone for TenantRouter<E> {
    fn clone(&self) -> Self {
        Self {
            provisioner: self.provisioner.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: StorageEngine> Debug for TenantRouter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRouter")
            .field("provisioner", &self.provisioner)
            .field("pools", &self.provisioner.registry().len())
            .finish()
    }
}

impl<E: StorageEngine> TenantRouter<E> {
    /// Creates a router over `engine`, recording tenants in `directory`.
    pub fn new(
        engine: E,
        directory: Arc<dyn TenantDirectory>,
        config: TenancyConfig,
    ) -> TenancyResult<Self> {
        config
            .validate()
            .map_err(|errors| TenancyError::Configuration {
                message: errors.join("; "),
            })?;

        let namer =
            InstanceNamer::from_config(&config)?.with_reserved(engine.reserved_instances());
        let registry = Arc::new(PoolRegistry::from_config(&config));
        let provisioner = Provisioner::new(Arc::new(engine), directory, registry, namer);

        tracing::info!(
            engine = %provisioner.engine().kind(),
            prefix = %config.storage_prefix,
            max_pools = ?config.max_pools,
            "Tenant router initialized"
        );

        Ok(Self {
            provisioner,
            config,
        })
    }

    /// Returns the router configuration.
    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    /// Returns the provisioner.
    pub fn provisioner(&self) -> &Provisioner<E> {
        &self.provisioner
    }

    /// Returns the tenant directory.
    pub fn directory(&self) -> &Arc<dyn TenantDirectory> {
        self.provisioner.directory()
    }

    /// Returns the pool registry.
    pub fn registry(&self) -> &Arc<PoolRegistry<E::Pool>> {
        self.provisioner.registry()
    }

    /// Runs `operation` as a unit of work for `tenant_id`.
    ///
    /// The tenant context is set for the duration of the operation and
    /// cleared when it completes, fails or is cancelled. Fails with
    /// [`TenancyError::MissingTenantId`] for a blank id.
    pub async fn with_tenant<T, F, Fut>(&self, tenant_id: &TenantId, operation: F) -> TenancyResult<T>
    where
        F: FnOnce(TenantSession<E::Pool>) -> Fut,
        Fut: Future<Output = TenancyResult<T>>,
    {
        if tenant_id.is_blank() {
            return Err(TenancyError::MissingTenantId);
        }

        let tenant = TenantContext::new(tenant_id.clone());
        context::scope(tenant.clone(), async move {
            let session = self.session(tenant).await?;
            operation(session).await
        })
        .await
    }

    /// Runs `operation` for the tenant already bound to the current unit of work.
    ///
    /// Fails with [`TenancyError::ContextMisuse`] when no tenant is set.
    pub async fn with_current_tenant<T, F, Fut>(&self, operation: F) -> TenancyResult<T>
    where
        F: FnOnce(TenantSession<E::Pool>) -> Fut,
        Fut: Future<Output = TenancyResult<T>>,
    {
        let tenant_id = context::require_current()?;
        let tenant = context::current_context().unwrap_or_else(|| TenantContext::new(tenant_id));
        let session = self.session(tenant).await?;
        operation(session).await
    }

    /// Returns the tenant's pool, provisioning it if needed.
    pub async fn resolve(&self, tenant_id: &TenantId) -> TenancyResult<Arc<PoolEntry<E::Pool>>> {
        if tenant_id.is_blank() {
            return Err(TenancyError::MissingTenantId);
        }
        self.provisioner.resolve(tenant_id).await
    }

    async fn session(&self, tenant: TenantContext) -> TenancyResult<TenantSession<E::Pool>> {
        let entry = self.resolve(tenant.tenant_id()).await?;

        let active = context::current();
        if active.as_ref() != Some(entry.tenant_id()) {
            tracing::error!(
                expected = ?active,
                resolved = %entry.tenant_id(),
                "Resolved pool does not belong to the active tenant"
            );
            return Err(TenancyError::ContextMisuse {
                message: format!(
                    "pool for tenant {} resolved under context {:?}",
                    entry.tenant_id(),
                    active
                ),
            });
        }

        Ok(TenantSession {
            context: tenant,
            entry,
        })
    }

    /// Creates a tenant and provisions its storage instance.
    pub async fn create_tenant(&self, display_name: &str) -> TenancyResult<TenantRecord> {
        self.provisioner.provision_tenant(display_name).await
    }

    /// Deactivates a tenant and evicts its pool.
    pub async fn deactivate_tenant(&self, tenant_id: &TenantId) -> TenancyResult<TenantRecord> {
        self.provisioner.deactivate(tenant_id).await
    }

    /// Lists every tenant in the directory.
    pub async fn list_tenants(&self) -> TenancyResult<Vec<TenantRecord>> {
        self.directory().list().await
    }

    /// Looks up a tenant by ID.
    pub async fn find_tenant(&self, tenant_id: &TenantId) -> TenancyResult<Option<TenantRecord>> {
        self.directory().find_by_id(tenant_id).await
    }

    /// Re-drives provisioning for one tenant.
    pub async fn retry_provisioning(&self, tenant_id: &TenantId) -> TenancyResult<TenantRecord> {
        self.provisioner.retry_provisioning(tenant_id).await
    }

    /// Re-drives every unfinished tenant.
    pub async fn reconcile(&self) -> TenancyResult<Vec<ReconcileOutcome>> {
        self.provisioner.reconcile().await
    }

    /// Evicts pools idle for longer than the configured idle timeout.
    ///
    /// Does nothing when no idle timeout is configured.
    pub async fn evict_idle_pools(&self) -> Vec<TenantId> {
        match self.config.idle_timeout() {
            Some(timeout) => self.evict_idle_for(timeout).await,
            None => Vec::new(),
        }
    }

    /// Evicts pools idle for longer than `timeout`.
    pub async fn evict_idle_for(&self, timeout: Duration) -> Vec<TenantId> {
        self.registry().evict_idle(timeout).await
    }
}

#[cfg(feature = "sqlite")]
impl TenantRouter<crate::backends::sqlite::SqliteEngine> {
    /// Creates a router over SQLite files, with the directory in the
    /// configured control-plane instance.
    pub fn sqlite(
        engine_config: crate::backends::sqlite::SqliteEngineConfig,
        config: TenancyConfig,
    ) -> TenancyResult<Self> {
        use crate::backends::sqlite::{SqliteEngine, SqliteTenantDirectory};

        let engine = SqliteEngine::new(engine_config)?;
        let directory = SqliteTenantDirectory::open(&engine, &config.control_plane_instance)?;
        Self::new(engine, Arc::new(directory), config)
    }
}

#[cfg(feature = "postgres")]
impl TenantRouter<crate::backends::postgres::PostgresEngine> {
    /// Creates a router over one PostgreSQL server, with the directory in
    /// the configured control-plane database.
    pub async fn postgres(
        engine_config: crate::backends::postgres::PostgresEngineConfig,
        config: TenancyConfig,
    ) -> TenancyResult<Self> {
        use crate::backends::postgres::{PostgresEngine, PostgresTenantDirectory};

        let engine = PostgresEngine::new(engine_config).await?;
        let directory =
            PostgresTenantDirectory::open(&engine, &config.control_plane_instance).await?;
        Self::new(engine, Arc::new(directory), config)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::backends::sqlite::{SqliteEngine, SqliteEngineConfig};
    use crate::tenant::TenantStatus;

    fn router() -> (tempfile::TempDir, TenantRouter<SqliteEngine>) {
        let dir = tempfile::tempdir().unwrap();
        let router =
            TenantRouter::sqlite(SqliteEngineConfig::new(dir.path()), TenancyConfig::default())
                .unwrap();
        (dir, router)
    }

    #[tokio::test]
    async fn test_blank_tenant_id_is_missing() {
        let (_dir, router) = router();
        let result = router
            .with_tenant(&TenantId::new("  "), |_session| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(TenancyError::MissingTenantId)));
    }

    #[tokio::test]
    async fn test_with_tenant_sets_and_clears_context() {
        let (_dir, router) = router();
        let acme = router.create_tenant("Acme").await.unwrap();

        let seen = router
            .with_tenant(&acme.id, |session| async move {
                assert_eq!(session.storage_instance(), "tenant_acme");
                Ok(context::current())
            })
            .await
            .unwrap();

        assert_eq!(seen, Some(acme.id));
        assert_eq!(context::current(), None);
    }

    #[tokio::test]
    async fn test_with_current_tenant_requires_context() {
        let (_dir, router) = router();
        let result = router
            .with_current_tenant(|_session| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(TenancyError::ContextMisuse { .. })));
    }

    #[tokio::test]
    async fn test_with_current_tenant_uses_open_scope() {
        let (_dir, router) = router();
        let acme = router.create_tenant("Acme").await.unwrap();

        let instance = context::unit_of_work(async {
            context::set_current(acme.id.clone()).unwrap();
            router
                .with_current_tenant(|session| async move {
                    Ok(session.storage_instance().to_string())
                })
                .await
        })
        .await
        .unwrap();

        assert_eq!(instance, "tenant_acme");
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = TenancyConfig::default().with_control_plane_instance("tenant_control");
        let result = TenantRouter::sqlite(SqliteEngineConfig::new(dir.path()), config);
        assert!(matches!(result, Err(TenancyError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_admin_operations() {
        let (_dir, router) = router();
        let acme = router.create_tenant("Acme").await.unwrap();
        router.create_tenant("Globex").await.unwrap();

        assert_eq!(router.list_tenants().await.unwrap().len(), 2);
        assert_eq!(
            router.find_tenant(&acme.id).await.unwrap().unwrap().status,
            TenantStatus::Active
        );

        router.deactivate_tenant(&acme.id).await.unwrap();
        let result = router.with_tenant(&acme.id, |_s| async { Ok(()) }).await;
        assert!(matches!(result, Err(TenancyError::TenantDeactivated { .. })));
    }
}
