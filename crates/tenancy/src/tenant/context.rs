//! Per-unit-of-work tenant context.
//!
//! The active tenant lives in a tokio task-local slot. A unit of work opens
//! the slot with [`scope`] (or [`unit_of_work`] when the tenant is only known
//! later); everything awaited inside that future can read the tenant with
//! [`current`] without threading a parameter through every call. The slot is
//! dropped when the scoped future completes, fails, panics or is cancelled,
//! so a value can never leak into the next unit of work.
//!
//! Tasks spawned from inside a scope do **not** inherit the slot. A child
//! task that needs the tenant must be given it explicitly, typically by
//! wrapping its future in [`scope`] again.
//!
//! ```
//! use helios_tenancy::tenant::{TenantContext, TenantId, context};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! assert_eq!(context::current(), None);
//!
//! let seen = context::scope(TenantContext::new(TenantId::new("acme")), async {
//!     context::current()
//! })
//! .await;
//!
//! assert_eq!(seen, Some(TenantId::new("acme")));
//! assert_eq!(context::current(), None);
//! # }
//! ```

use std::cell::RefCell;
use std::future::Future;

use super::id::TenantId;
use crate::error::{TenancyError, TenancyResult};

tokio::task_local! {
    static CURRENT_TENANT: RefCell<Option<TenantContext>>;
}

/// The tenant a unit of work is operating on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    /// The tenant identifier.
    tenant_id: TenantId,
    /// Optional correlation ID for request tracing.
    correlation_id: Option<String>,
}

impl TenantContext {
    /// Creates a context for the given tenant.
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            correlation_id: None,
        }
    }

    /// Creates a context with the specified correlation ID for tracing.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Returns the tenant ID.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

/// Runs `future` as a unit of work bound to `context`.
///
/// The slot is cleared on every exit path of `future`.
pub async fn scope<F>(context: TenantContext, future: F) -> F::Output
where
    F: Future,
{
    tracing::debug!(tenant_id = %context.tenant_id, "Entering tenant scope");
    CURRENT_TENANT
        .scope(RefCell::new(Some(context)), future)
        .await
}

/// Runs `future` as a unit of work whose tenant is not known yet.
///
/// Inside the future, [`set_current`] and [`clear`] may be used to bind the
/// tenant once it has been identified (e.g. after authentication).
pub async fn unit_of_work<F>(future: F) -> F::Output
where
    F: Future,
{
    CURRENT_TENANT.scope(RefCell::new(None), future).await
}

/// Synchronous counterpart of [`scope`] for blocking code paths.
pub fn sync_scope<R>(context: TenantContext, f: impl FnOnce() -> R) -> R {
    CURRENT_TENANT.sync_scope(RefCell::new(Some(context)), f)
}

/// Returns the tenant of the current unit of work, or `None` when unset.
///
/// `None` means "control plane", never "whatever the last request used".
pub fn current() -> Option<TenantId> {
    current_context().map(|ctx| ctx.tenant_id)
}

/// Returns the full context of the current unit of work, or `None` when unset.
pub fn current_context() -> Option<TenantContext> {
    CURRENT_TENANT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Returns the current tenant or fails with [`TenancyError::ContextMisuse`].
pub fn require_current() -> TenancyResult<TenantId> {
    current().ok_or_else(|| {
        tracing::error!("Tenant-scoped operation attempted with no tenant context set");
        TenancyError::ContextMisuse {
            message: "no tenant context is set for this unit of work".to_string(),
        }
    })
}

/// Binds `tenant_id` to the current unit of work.
///
/// Fails with [`TenancyError::ContextMisuse`] when called outside of
/// [`scope`]/[`unit_of_work`], since there is no slot to write to.
pub fn set_current(tenant_id: TenantId) -> TenancyResult<()> {
    tracing::debug!(tenant_id = %tenant_id, "Setting current tenant");
    CURRENT_TENANT
        .try_with(|slot| {
            *slot.borrow_mut() = Some(TenantContext::new(tenant_id));
        })
        .map_err(|_| {
            tracing::error!("set_current called outside of a unit of work");
            TenancyError::ContextMisuse {
                message: "set_current called outside of a tenant unit of work".to_string(),
            }
        })
}

/// Clears the tenant of the current unit of work.
///
/// Outside of a unit of work nothing is set, so this is a no-op.
pub fn clear() {
    let _ = CURRENT_TENANT.try_with(|slot| {
        if let Some(previous) = slot.borrow_mut().take() {
            tracing::debug!(tenant_id = %previous.tenant_id, "Cleared tenant context");
        }
    });
}

/// Returns `true` if a tenant is bound to the current unit of work.
pub fn is_set() -> bool {
    current().is_some()
}
