//! PostgreSQL backend implementation.
//!
//! Every storage instance is a separate database on one server, created with
//! `CREATE DATABASE` through an admin connection. Each tenant gets its own
//! deadpool-postgres pool; the control-plane directory is one more database
//! on the same server.
//!
//! # Example
//!
//! ```no_run
//! use helios_tenancy::backends::postgres::{
//!     PostgresEngine, PostgresEngineConfig, PostgresTenantDirectory,
//! };
//!
//! # async fn main_example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = PostgresEngine::new(PostgresEngineConfig::default()).await?;
//! let directory = PostgresTenantDirectory::open(&engine, "helios_control").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! Tenant databases:
//!
//! ```sql
//! CREATE TABLE tenant_owner (
//!     tenant_id TEXT NOT NULL PRIMARY KEY,
//!     stamped_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! CREATE TABLE user_data (
//!     id BIGSERIAL PRIMARY KEY,
//!     data VARCHAR(255) NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```

mod directory;
mod engine;
pub mod schema;

pub use directory::PostgresTenantDirectory;
pub use engine::{PostgresEngine, PostgresEngineConfig, PostgresPool};
