//! Tenant-keyed connection pool registry.
//!
//! The registry maps each [`TenantId`] to at most one live [`PoolEntry`].
//! Lookups take a read lock on the cache; creation runs under a per-tenant
//! async lock, so concurrent first requests for the same tenant collapse into
//! a single pool creation while distinct tenants never wait on each other.
//!
//! ```text
//! get_or_create(t)
//!   ├─ read lock: healthy entry for t? ──────────────► return Arc
//!   └─ lock(t)
//!        ├─ re-check cache ───────────────────────────► return Arc
//!        └─ create() ─► insert ─► unlock ─► LRU cap ─► return Arc
//! ```
//!
//! Entries are handed out as `Arc<PoolEntry>`. Evicting an entry only removes
//! it from the cache; the pool is closed when the last in-flight holder drops
//! its reference.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::config::TenancyConfig;
use crate::core::ConnectionPool;
use crate::error::TenancyResult;
use crate::tenant::TenantId;

type CreationLocks = Mutex<HashMap<TenantId, Arc<tokio::sync::Mutex<()>>>>;

/// A tenant's creation lock, dropped from the lock map once nobody else
/// holds it.
struct CreationLease<'a> {
    locks: &'a CreationLocks,
    tenant_id: &'a TenantId,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> CreationLease<'a> {
    fn acquire(locks: &'a CreationLocks, tenant_id: &'a TenantId) -> Self {
        let lock = Arc::clone(locks.lock().entry(tenant_id.clone()).or_default());
        Self {
            locks,
            tenant_id,
            lock,
        }
    }
}

impl Drop for CreationLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // One reference in the map, one here: no other task is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(self.tenant_id);
        }
    }
}

/// A cached pool for one tenant.
pub struct PoolEntry<P: ConnectionPool> {
    tenant_id: TenantId,
    storage_instance: String,
    pool: P,
    created_at: DateTime<Utc>,
    last_access: Mutex<Instant>,
    healthy: AtomicBool,
}

impl<P: ConnectionPool> PoolEntry<P> {
    fn new(tenant_id: TenantId, storage_instance: String, pool: P) -> Self {
        Self {
            tenant_id,
            storage_instance,
            pool,
            created_at: Utc::now(),
            last_access: Mutex::new(Instant::now()),
            healthy: AtomicBool::new(true),
        }
    }

    /// Returns the tenant this pool belongs to.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the storage instance the pool is connected to.
    pub fn storage_instance(&self) -> &str {
        &self.storage_instance
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Returns when the pool was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns how long ago the entry was last resolved.
    pub fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    /// Returns `false` once the entry has been evicted or invalidated.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
    }
}

impl<P: ConnectionPool> std::fmt::Debug for PoolEntry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEntry")
            .field("tenant_id", &self.tenant_id)
            .field("storage_instance", &self.storage_instance)
            .field("created_at", &self.created_at)
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

impl<P: ConnectionPool> Drop for PoolEntry<P> {
    fn drop(&mut self) {
        self.pool.close();
        tracing::info!(
            tenant_id = %self.tenant_id,
            storage_instance = %self.storage_instance,
            "Closed tenant pool"
        );
    }
}

/// Thread-safe map from tenant to live connection pool.
pub struct PoolRegistry<P: ConnectionPool> {
    entries: RwLock<HashMap<TenantId, Arc<PoolEntry<P>>>>,
    /// Only present while some task holds or waits on the lock.
    creation_locks: CreationLocks,
    max_pools: Option<usize>,
    pools_created: AtomicU64,
}

impl<P: ConnectionPool> PoolRegistry<P> {
    /// Creates an empty registry holding at most `max_pools` pools.
    pub fn new(max_pools: Option<usize>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
            max_pools,
            pools_created: AtomicU64::new(0),
        }
    }

    /// Creates an empty registry sized from the configuration.
    pub fn from_config(config: &TenancyConfig) -> Self {
        Self::new(config.max_pools)
    }

    /// Returns the cached entry for a tenant, if present and healthy.
    pub fn get(&self, tenant_id: &TenantId) -> Option<Arc<PoolEntry<P>>> {
        let entries = self.entries.read();
        let entry = entries.get(tenant_id).filter(|e| e.is_healthy())?;
        entry.touch();
        tracing::debug!(tenant_id = %tenant_id, "Pool cache hit");
        Some(Arc::clone(entry))
    }

    /// Returns the cached entry for a tenant, creating it with `create` if absent.
    ///
    /// `create` runs at most once per tenant at a time and returns the storage
    /// instance name together with the new pool. If it fails nothing is cached
    /// and the error is returned unchanged.
    pub async fn get_or_create<F, Fut>(
        &self,
        tenant_id: &TenantId,
        create: F,
    ) -> TenancyResult<Arc<PoolEntry<P>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TenancyResult<(String, P)>>,
    {
        if let Some(entry) = self.get(tenant_id) {
            return Ok(entry);
        }

        let entry = {
            let lease = CreationLease::acquire(&self.creation_locks, tenant_id);
            let _guard = lease.lock.lock().await;

            if let Some(entry) = self.get(tenant_id) {
                return Ok(entry);
            }

            let (storage_instance, pool) = create().await?;
            let entry = Arc::new(PoolEntry::new(tenant_id.clone(), storage_instance, pool));
            let replaced = self
                .entries
                .write()
                .insert(tenant_id.clone(), Arc::clone(&entry));
            if let Some(stale) = replaced {
                stale.mark_unhealthy();
            }
            self.pools_created.fetch_add(1, Ordering::Relaxed);

            tracing::info!(
                tenant_id = %tenant_id,
                storage_instance = %entry.storage_instance(),
                "Registered tenant pool"
            );
            entry
        };

        self.enforce_capacity(tenant_id);
        Ok(entry)
    }

    /// Removes a tenant's pool from the cache.
    ///
    /// Runs under the tenant's creation lock, so it never interleaves with a
    /// creation in progress. Returns `true` if an entry was removed.
    pub async fn evict(&self, tenant_id: &TenantId) -> bool {
        let lease = CreationLease::acquire(&self.creation_locks, tenant_id);
        let _guard = lease.lock.lock().await;
        self.remove_entry(tenant_id)
    }

    /// Like [`evict`](Self::evict), but gives up instead of waiting when the
    /// tenant's pool is being created.
    fn try_evict(&self, tenant_id: &TenantId) -> bool {
        let lease = CreationLease::acquire(&self.creation_locks, tenant_id);
        let Ok(_guard) = lease.lock.try_lock() else {
            tracing::debug!(tenant_id = %tenant_id, "Skipping eviction of busy tenant pool");
            return false;
        };
        self.remove_entry(tenant_id)
    }

    fn remove_entry(&self, tenant_id: &TenantId) -> bool {
        let removed = self.entries.write().remove(tenant_id);
        match removed {
            Some(entry) => {
                entry.mark_unhealthy();
                tracing::info!(
                    tenant_id = %tenant_id,
                    storage_instance = %entry.storage_instance(),
                    in_flight = Arc::strong_count(&entry) - 1,
                    "Evicted tenant pool"
                );
                true
            }
            None => false,
        }
    }

    /// Marks a tenant's pool unhealthy so the next resolve rebuilds it.
    pub fn invalidate(&self, tenant_id: &TenantId) {
        if let Some(entry) = self.entries.read().get(tenant_id) {
            entry.mark_unhealthy();
            tracing::warn!(tenant_id = %tenant_id, "Invalidated tenant pool");
        }
    }

    /// Health-checks every cached pool, invalidating the ones that fail.
    ///
    /// Returns the tenants whose pools were invalidated.
    pub async fn check_health(&self) -> Vec<TenantId> {
        let snapshot: Vec<_> = self.entries.read().values().cloned().collect();
        let mut failed = Vec::new();

        for entry in snapshot {
            if let Err(e) = entry.pool().health_check().await {
                tracing::warn!(
                    tenant_id = %entry.tenant_id(),
                    error = %e,
                    "Tenant pool failed health check"
                );
                entry.mark_unhealthy();
                failed.push(entry.tenant_id().clone());
            }
        }

        failed
    }

    /// Evicts every pool not resolved within `idle_timeout`.
    ///
    /// Returns the evicted tenants.
    pub async fn evict_idle(&self, idle_timeout: Duration) -> Vec<TenantId> {
        let idle: Vec<_> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.idle_for() > idle_timeout)
            .map(|entry| entry.tenant_id().clone())
            .collect();

        let mut evicted = Vec::with_capacity(idle.len());
        for tenant_id in idle {
            if self.evict(&tenant_id).await {
                evicted.push(tenant_id);
            }
        }
        evicted
    }

    /// Returns `true` if a pool is cached for the tenant, healthy or not.
    pub fn contains(&self, tenant_id: &TenantId) -> bool {
        self.entries.read().contains_key(tenant_id)
    }

    /// Returns the number of cached pools.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no pools are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the tenants with cached pools.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<_> = self.entries.read().keys().cloned().collect();
        tenants.sort();
        tenants
    }

    /// Returns the total number of pools created over the registry's lifetime.
    pub fn pools_created(&self) -> u64 {
        self.pools_created.load(Ordering::Relaxed)
    }

    /// Evicts least recently used pools over the limit, never `keep`.
    ///
    /// Returns the evicted tenants.
    fn evict_least_recently_used(&self, keep: &TenantId) -> Vec<TenantId> {
        let Some(max_pools) = self.max_pools else {
            return Vec::new();
        };

        let entries = self.entries.read();
        if entries.len() <= max_pools {
            return Vec::new();
        }

        let mut candidates: Vec<_> = entries
            .values()
            .filter(|entry| entry.tenant_id() != keep)
            .map(|entry| (entry.last_access(), entry.tenant_id().clone()))
            .collect();
        candidates.sort_by_key(|(last_access, _)| *last_access);

        let excess = entries.len() - max_pools;
        drop(entries);

        // Oldest first; a tenant mid-creation is skipped in favour of the next.
        let mut evicted = Vec::with_capacity(excess);
        for (_, tenant_id) in candidates {
            if evicted.len() == excess {
                break;
            }
            if self.try_evict(&tenant_id) {
                evicted.push(tenant_id);
            }
        }
        evicted
    }

    fn enforce_capacity(&self, keep: &TenantId) {
        let evicted = self.evict_least_recently_used(keep);
        if !evicted.is_empty() {
            tracing::debug!(
                evicted = evicted.len(),
                "Pool limit reached, evicted least recently used"
            );
        }
    }
}

impl<P: ConnectionPool> std::fmt::Debug for PoolRegistry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.len())
            .field("max_pools", &self.max_pools)
            .field("pools_created", &self.pools_created())
            .finish_non_exhaustive()
    }
}
