//! Tenant provisioning.
//!
//! Provisioning is a state machine persisted in the tenant directory:
//!
//! ```text
//! 1. name check ─► 2. insert PROVISIONING ─► 3. create instance
//!        ─► 4. baseline schema ─► 5. pool ─► 6. ACTIVE
//! ```
//!
//! A failure in steps 3–6 leaves the record `FAILED` (it is never deleted)
//! and surfaces [`TenancyError::ProvisioningFailed`]. Every step is
//! idempotent, so [`Provisioner::retry_provisioning`] and
//! [`Provisioner::reconcile`] simply re-enter at step 3.
//!
//! Steps 3 and 4 run in a spawned task: if the caller is cancelled the
//! instance is still finished, and the record stays `PROVISIONING` until
//! the next resolve or reconciliation completes it.

use std::fmt::Debug;
use std::sync::Arc;

use crate::core::{StorageEngine, TenantDirectory};
use crate::error::{ProvisioningStep, TenancyError, TenancyResult};
use crate::naming::InstanceNamer;
use crate::registry::{PoolEntry, PoolRegistry};
use crate::tenant::{TenantId, TenantRecord, TenantStatus};

type StepResult<T> = Result<T, (ProvisioningStep, TenancyError)>;

/// Result of re-driving one unfinished tenant during [`Provisioner::reconcile`].
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// The tenant that was re-driven.
    pub tenant_id: TenantId,
    /// The tenant's display name.
    pub display_name: String,
    /// The status the tenant ended in, or why it could not be completed.
    pub result: TenancyResult<TenantStatus>,
}

impl ReconcileOutcome {
    /// Returns `true` if the tenant reached `ACTIVE`.
    pub fn is_active(&self) -> bool {
        matches!(self.result, Ok(TenantStatus::Active))
    }
}

/// Creates tenants and brings their storage instances to a routable state.
pub struct Provisioner<E: StorageEngine> {
    engine: Arc<E>,
    directory: Arc<dyn TenantDirectory>,
    registry: Arc<PoolRegistry<E::Pool>>,
    namer: InstanceNamer,
}

impl<E: StorageEngine> Clone for Provisioner<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            directory: Arc::clone(&self.directory),
            registry: Arc::clone(&self.registry),
            namer: self.namer.clone(),
        }
    }
}

impl<E: StorageEngine> Debug for Provisioner<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("engine", &self.engine)
            .field("directory", &self.directory)
            .field("prefix", &self.namer.prefix())
            .finish_non_exhaustive()
    }
}

impl<E: StorageEngine> Provisioner<E> {
    /// Creates a provisioner that registers pools in `registry`.
    pub fn new(
        engine: Arc<E>,
        directory: Arc<dyn TenantDirectory>,
        registry: Arc<PoolRegistry<E::Pool>>,
        namer: InstanceNamer,
    ) -> Self {
        Self {
            engine,
            directory,
            registry,
            namer,
        }
    }

    /// Returns the storage engine.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Returns the tenant directory.
    pub fn directory(&self) -> &Arc<dyn TenantDirectory> {
        &self.directory
    }

    /// Returns the pool registry.
    pub fn registry(&self) -> &Arc<PoolRegistry<E::Pool>> {
        &self.registry
    }

    /// Returns the instance namer.
    pub fn namer(&self) -> &InstanceNamer {
        &self.namer
    }

    /// Registers a new tenant and provisions its storage instance.
    ///
    /// Returns the tenant's record, `ACTIVE` on success. Fails with
    /// [`TenancyError::NameConflict`] if the display name or its storage
    /// instance is already taken, with [`TenancyError::ProvisioningFailed`]
    /// if a step after the directory insert failed.
    pub async fn provision_tenant(&self, display_name: &str) -> TenancyResult<TenantRecord> {
        let display_name = display_name.trim();
        let instance = self.namer.instance_name(display_name)?;

        if self.directory.find_by_name(display_name).await?.is_some()
            || self
                .directory
                .find_by_storage_instance(&instance)
                .await?
                .is_some()
        {
            tracing::info!(
                display_name = %display_name,
                storage_instance = %instance,
                "Tenant name already taken"
            );
            return Err(TenancyError::NameConflict {
                display_name: display_name.to_string(),
                storage_instance: instance,
            });
        }

        // The directory's uniqueness constraints arbitrate between concurrent
        // creators; the checks above only give an early answer.
        let record = TenantRecord::provisioning(display_name, &instance);
        self.directory.insert(&record).await?;
        tracing::info!(
            tenant_id = %record.id,
            display_name = %display_name,
            storage_instance = %instance,
            "Registered tenant"
        );

        self.resolve(&record.id).await?;
        self.require_record(&record.id).await
    }

    /// Returns the tenant's pool, provisioning it first if the record is not
    /// yet `ACTIVE`.
    pub async fn resolve(&self, tenant_id: &TenantId) -> TenancyResult<Arc<PoolEntry<E::Pool>>> {
        self.registry
            .get_or_create(tenant_id, || self.open_pool(tenant_id))
            .await
    }

    /// Re-drives provisioning for a `PROVISIONING` or `FAILED` tenant.
    ///
    /// Safe to call repeatedly; for an `ACTIVE` tenant it only makes sure a
    /// pool is registered.
    pub async fn retry_provisioning(&self, tenant_id: &TenantId) -> TenancyResult<TenantRecord> {
        tracing::info!(tenant_id = %tenant_id, "Retrying tenant provisioning");
        self.resolve(tenant_id).await?;
        self.require_record(tenant_id).await
    }

    /// Re-drives every tenant left `PROVISIONING` or `FAILED`, e.g. after a
    /// crash, and reports the outcome per tenant.
    pub async fn reconcile(&self) -> TenancyResult<Vec<ReconcileOutcome>> {
        let mut pending = self
            .directory
            .list_by_status(TenantStatus::Provisioning)
            .await?;
        pending.extend(self.directory.list_by_status(TenantStatus::Failed).await?);

        tracing::info!(pending = pending.len(), "Reconciling unfinished tenants");

        let mut outcomes = Vec::with_capacity(pending.len());
        for record in pending {
            let result = self
                .retry_provisioning(&record.id)
                .await
                .map(|record| record.status);
            if let Err(e) = &result {
                tracing::warn!(
                    tenant_id = %record.id,
                    error = %e,
                    "Tenant still unfinished after reconciliation"
                );
            }
            outcomes.push(ReconcileOutcome {
                tenant_id: record.id,
                display_name: record.display_name,
                result,
            });
        }

        Ok(outcomes)
    }

    /// Marks a tenant `DEACTIVATED` and evicts its pool.
    ///
    /// In-flight operations keep their pool until they finish; new resolves
    /// fail with [`TenancyError::TenantDeactivated`].
    pub async fn deactivate(&self, tenant_id: &TenantId) -> TenancyResult<TenantRecord> {
        let record = self
            .directory
            .update_status(tenant_id, TenantStatus::Deactivated)
            .await?;
        let evicted = self.registry.evict(tenant_id).await;

        tracing::info!(
            tenant_id = %tenant_id,
            storage_instance = %record.storage_instance_name,
            evicted,
            "Deactivated tenant"
        );
        Ok(record)
    }

    /// Opens a pool for the tenant, completing provisioning if needed.
    ///
    /// Runs under the registry's per-tenant creation lock.
    async fn open_pool(&self, tenant_id: &TenantId) -> TenancyResult<(String, E::Pool)> {
        let record = self.require_record(tenant_id).await?;

        match record.status {
            TenantStatus::Deactivated => Err(TenancyError::TenantDeactivated {
                tenant_id: tenant_id.clone(),
            }),
            status if status.needs_provisioning() => self.complete(record).await,
            _ => {
                let pool = self.engine.connect(&record.storage_instance_name).await?;
                Ok((record.storage_instance_name, pool))
            }
        }
    }

    async fn complete(&self, record: TenantRecord) -> TenancyResult<(String, E::Pool)> {
        let tenant_id = record.id;
        let instance = record.storage_instance_name;

        if record.status == TenantStatus::Failed {
            self.directory
                .update_status(&tenant_id, TenantStatus::Provisioning)
                .await?;
        }

        tracing::info!(
            tenant_id = %tenant_id,
            storage_instance = %instance,
            engine = %self.engine.kind(),
            "Provisioning storage instance"
        );

        match self.run_steps(&tenant_id, &instance).await {
            Ok(pool) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    storage_instance = %instance,
                    "Tenant provisioned"
                );
                Ok((instance, pool))
            }
            Err((step, source)) => {
                self.mark_failed(&tenant_id, &instance, step, &source).await;
                Err(TenancyError::ProvisioningFailed {
                    tenant_id,
                    step,
                    source: Box::new(source),
                })
            }
        }
    }

    async fn run_steps(&self, tenant_id: &TenantId, instance: &str) -> StepResult<E::Pool> {
        let engine = Arc::clone(&self.engine);
        let owner = tenant_id.clone();
        let name = instance.to_string();

        let prepared = tokio::spawn(async move {
            let exists = engine
                .instance_exists(&name)
                .await
                .map_err(|e| (ProvisioningStep::CreateInstance, e))?;
            if !exists {
                engine
                    .create_instance(&name)
                    .await
                    .map_err(|e| (ProvisioningStep::CreateInstance, e))?;
            }
            engine
                .apply_baseline_schema(&name, &owner)
                .await
                .map_err(|e| (ProvisioningStep::ApplySchema, e))?;
            Ok::<(), (ProvisioningStep, TenancyError)>(())
        });

        match prepared.await {
            Ok(result) => result?,
            Err(e) => {
                return Err((ProvisioningStep::CreateInstance, TenancyError::operation(e)));
            }
        }

        let pool = self
            .engine
            .connect(instance)
            .await
            .map_err(|e| (ProvisioningStep::RegisterPool, e))?;

        self.directory
            .update_status(tenant_id, TenantStatus::Active)
            .await
            .map_err(|e| (ProvisioningStep::Activate, e))?;

        Ok(pool)
    }

    async fn mark_failed(
        &self,
        tenant_id: &TenantId,
        instance: &str,
        step: ProvisioningStep,
        source: &TenancyError,
    ) {
        tracing::warn!(
            tenant_id = %tenant_id,
            storage_instance = %instance,
            step = %step,
            error = %source,
            "Tenant provisioning failed"
        );

        if let Err(e) = self
            .directory
            .update_status(tenant_id, TenantStatus::Failed)
            .await
        {
            tracing::warn!(
                tenant_id = %tenant_id,
                error = %e,
                "Failed to record FAILED status"
            );
        }
    }

    async fn require_record(&self, tenant_id: &TenantId) -> TenancyResult<TenantRecord> {
        self.directory
            .find_by_id(tenant_id)
            .await?
            .ok_or_else(|| TenancyError::UnknownTenant {
                tenant_id: tenant_id.clone(),
            })
    }
}
