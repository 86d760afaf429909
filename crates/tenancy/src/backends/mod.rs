//! Storage engine and tenant directory implementations.
//!
//! Each backend is gated behind a feature flag.
//!
//! # Available Backends
//!
//! | Backend | Feature | Storage instance |
//! |---------|---------|------------------|
//! | SQLite | `sqlite` | One database file per tenant |
//! | PostgreSQL | `postgres` | One database per tenant |
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! use helios_tenancy::backends::sqlite::SqliteEngine;
//!
//! # #[cfg(feature = "sqlite")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SqliteEngine::open("./data/tenants")?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;
