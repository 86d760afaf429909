//! Core routing traits and abstractions.
//!
//! This module provides the seams the routing layer is generic over:
//!
//! - [`StorageEngine`] - Creates storage instances and opens pools on them
//! - [`ConnectionPool`] - A live pool on one storage instance
//! - [`TenantDirectory`] - Durable catalog of tenants in the control plane
//!
//! # Example: Routing over an Engine
//!
//! ```ignore
//! use helios_tenancy::core::{ConnectionPool, StorageEngine};
//!
//! async fn touch<E: StorageEngine>(engine: &E, instance: &str) -> helios_tenancy::TenancyResult<()> {
//!     engine.create_instance(instance).await?;
//!     let pool = engine.connect(instance).await?;
//!     pool.health_check().await
//! }
//! ```

mod directory;
mod engine;

pub(crate) use directory::rejected_update;
pub use directory::TenantDirectory;
pub use engine::{BASELINE_SCHEMA_VERSION, ConnectionPool, EngineKind, PoolStats, StorageEngine};
