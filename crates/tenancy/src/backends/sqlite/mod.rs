//! SQLite backend implementation.
//!
//! Every storage instance is a database file `<data_dir>/<instance>.db`; the
//! control-plane directory is one more file in the same directory. Pools are
//! r2d2 pools opened without the create flag, so routing can never bring a
//! tenant database into existence by accident.
//!
//! # Example
//!
//! ```no_run
//! use helios_tenancy::backends::sqlite::{SqliteEngine, SqliteTenantDirectory};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SqliteEngine::open("./data/tenants")?;
//! let directory = SqliteTenantDirectory::open(&engine, "helios_control")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! Control plane:
//!
//! ```sql
//! CREATE TABLE tenants (
//!     id TEXT NOT NULL PRIMARY KEY,
//!     display_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
//!     storage_instance_name TEXT NOT NULL UNIQUE,
//!     status TEXT NOT NULL,
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL
//! );
//! ```
//!
//! Tenant instances:
//!
//! ```sql
//! CREATE TABLE tenant_owner (tenant_id TEXT NOT NULL PRIMARY KEY, stamped_at TEXT NOT NULL);
//! CREATE TABLE user_data (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     data TEXT NOT NULL,
//!     created_at TEXT NOT NULL
//! );
//! ```

mod directory;
mod engine;
pub mod schema;

pub use directory::SqliteTenantDirectory;
pub use engine::{SqliteConnection, SqliteEngine, SqliteEngineConfig, SqlitePool};
