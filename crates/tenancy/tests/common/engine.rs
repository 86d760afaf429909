//! A SQLite engine that counts calls and fails on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use helios_tenancy::backends::sqlite::{SqliteEngine, SqlitePool};
use helios_tenancy::core::EngineKind;
use helios_tenancy::{StorageEngine, TenancyError, TenancyResult, TenantId};

/// Engine operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    CreateInstance,
    ApplySchema,
    Connect,
}

/// Wraps [`SqliteEngine`], counting every call and injecting failures.
#[derive(Debug)]
pub struct FaultyEngine {
    inner: SqliteEngine,
    create_calls: AtomicUsize,
    schema_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    failures: Mutex<HashMap<Fault, usize>>,
    create_delay: Mutex<Option<Duration>>,
}

impl FaultyEngine {
    pub fn new(inner: SqliteEngine) -> Self {
        Self {
            inner,
            create_calls: AtomicUsize::new(0),
            schema_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            failures: Mutex::new(HashMap::new()),
            create_delay: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &SqliteEngine {
        &self.inner
    }

    /// Makes the next `times` calls of `fault` fail.
    pub fn fail(&self, fault: Fault, times: usize) {
        self.failures.lock().insert(fault, times);
    }

    /// Delays every `create_instance` call, widening race windows.
    pub fn delay_create(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    fn check(&self, fault: Fault, instance: &str) -> TenancyResult<()> {
        let mut failures = self.failures.lock();
        match failures.get_mut(&fault) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(TenancyError::unavailable(
                    instance,
                    format!("injected {:?} failure", fault),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StorageEngine for FaultyEngine {
    type Pool = SqlitePool;

    fn kind(&self) -> EngineKind {
        EngineKind::Custom("faulty-sqlite")
    }

    async fn instance_exists(&self, instance: &str) -> TenancyResult<bool> {
        self.inner.instance_exists(instance).await
    }

    async fn create_instance(&self, instance: &str) -> TenancyResult<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(Fault::CreateInstance, instance)?;
        self.inner.create_instance(instance).await
    }

    async fn apply_baseline_schema(&self, instance: &str, owner: &TenantId) -> TenancyResult<u32> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Fault::ApplySchema, instance)?;
        self.inner.apply_baseline_schema(instance, owner).await
    }

    async fn connect(&self, instance: &str) -> TenancyResult<SqlitePool> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Fault::Connect, instance)?;
        self.inner.connect(instance).await
    }
}
