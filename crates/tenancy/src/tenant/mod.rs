//! Tenant identity, lifecycle records and the per-unit-of-work tenant context.
//!
//! # Core Types
//!
//! - [`TenantId`] - Opaque, immutable tenant identifier and routing key
//! - [`TenantRecord`] - A tenant as stored in the control-plane directory
//! - [`TenantStatus`] - Provisioning lifecycle (`PROVISIONING`, `ACTIVE`, `FAILED`, `DEACTIVATED`)
//! - [`TenantContext`] - The tenant bound to the current unit of work
//!
//! # Examples
//!
//! ## Scoping a Unit of Work
//!
//! ```
//! use helios_tenancy::tenant::{context, TenantContext, TenantId};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let tenant = TenantId::from_header(Some("acme")).unwrap();
//!
//! context::scope(TenantContext::new(tenant.clone()), async {
//!     assert_eq!(context::current(), Some(tenant));
//! })
//! .await;
//!
//! assert!(!context::is_set());
//! # }
//! ```
//!
//! ## Status Transitions
//!
//! ```
//! use helios_tenancy::tenant::TenantStatus;
//!
//! assert!(TenantStatus::Provisioning.can_transition_to(TenantStatus::Active));
//! assert!(!TenantStatus::Deactivated.can_transition_to(TenantStatus::Active));
//! ```

pub mod context;
mod id;
mod record;

pub use context::TenantContext;
pub use id::TenantId;
pub use record::{TenantRecord, TenantStatus};
