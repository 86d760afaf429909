//! Helios Multi-Tenant Storage Routing
//!
//! This crate routes every data operation to an isolated, dynamically
//! provisioned storage instance for its tenant. It creates those instances on
//! demand, keeps one connection pool per tenant and prevents cross-tenant data
//! leakage under concurrent load.
//!
//! # Features
//!
//! - **Database per tenant**: each tenant gets its own storage instance,
//!   named deterministically from its display name
//! - **Implicit tenant context**: a task-local slot set for one unit of work
//!   and cleared on every exit path
//! - **Pool registry**: lazily created, cached per tenant, with at most one
//!   pool creation per tenant under any concurrency
//! - **Crash-safe provisioning**: a persisted state machine that can always
//!   be retried or reconciled
//!
//! # Backend Features
//!
//! ```toml
//! [dependencies]
//! helios-tenancy = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! - `sqlite` (default) - one database file per tenant
//! - `postgres` - one PostgreSQL database per tenant
//! - `admin` - the `tenant-admin` command line tool
//!
//! # Architecture
//!
//! - [`tenant`] - tenant IDs, directory records and the per-task context
//! - [`core`] - storage engine, connection pool and directory traits
//! - [`registry`] - the tenant-keyed pool cache
//! - [`provisioning`] - the provisioning state machine
//! - [`router`] - the routing facade
//! - [`backends`] - SQLite and PostgreSQL implementations
//!
//! # Quick Start
//!
//! ```no_run
//! use helios_tenancy::{TenancyConfig, TenantId, TenantRouter};
//! use helios_tenancy::backends::sqlite::SqliteEngineConfig;
//!
//! # async fn example() -> Result<(), helios_tenancy::TenancyError> {
//! let router = TenantRouter::sqlite(
//!     SqliteEngineConfig::new("./data/tenants"),
//!     TenancyConfig::default(),
//! )?;
//!
//! let acme = router.create_tenant("Acme Corp").await?;
//! assert_eq!(acme.storage_instance_name, "tenant_acme_corp");
//!
//! // Inbound requests carry the tenant ID.
//! let tenant_id = TenantId::from_header(Some(acme.id.as_str()))?;
//! let instance = router
//!     .with_tenant(&tenant_id, |session| async move {
//!         Ok(session.storage_instance().to_string())
//!     })
//!     .await?;
//! assert_eq!(instance, "tenant_acme_corp");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod naming;
pub mod provisioning;
pub mod registry;
pub mod router;
pub mod tenant;

// Re-export commonly used types
pub use config::TenancyConfig;
pub use error::{ProvisioningStep, TenancyError, TenancyResult};
pub use tenant::{TenantContext, TenantId, TenantRecord, TenantStatus};

// Re-export core traits
pub use core::{ConnectionPool, PoolStats, StorageEngine, TenantDirectory};

pub use provisioning::{Provisioner, ReconcileOutcome};
pub use registry::{PoolEntry, PoolRegistry};
pub use router::{TenantRouter, TenantSession};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
