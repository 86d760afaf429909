//! The durable tenant catalog.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::{TenancyError, TenancyResult};
use crate::tenant::{TenantId, TenantRecord, TenantStatus};

/// Durable catalog of tenants, stored in the control-plane instance.
///
/// The directory is the arbiter for name collisions: `display_name` (compared
/// case-insensitively) and `storage_instance_name` must each be unique at the
/// storage layer, so several processes sharing one control plane still agree.
/// Status changes are compare-and-set against
/// [`TenantStatus::allowed_sources`].
#[async_trait]
pub trait TenantDirectory: Send + Sync + Debug + 'static {
    /// Inserts a new record.
    ///
    /// Fails with [`TenancyError::NameConflict`] if the display name or
    /// storage instance name is already taken.
    async fn insert(&self, record: &TenantRecord) -> TenancyResult<()>;

    /// Looks a tenant up by ID.
    async fn find_by_id(&self, id: &TenantId) -> TenancyResult<Option<TenantRecord>>;

    /// Looks a tenant up by display name, ignoring case.
    async fn find_by_name(&self, display_name: &str) -> TenancyResult<Option<TenantRecord>>;

    /// Looks a tenant up by storage instance name.
    async fn find_by_storage_instance(&self, instance: &str)
        -> TenancyResult<Option<TenantRecord>>;

    /// Moves a tenant to `status` and returns the updated record.
    ///
    /// Updating to the current status is a no-op. Disallowed transitions fail
    /// with [`TenancyError::InvalidStatusTransition`].
    async fn update_status(&self, id: &TenantId, status: TenantStatus)
        -> TenancyResult<TenantRecord>;

    /// Returns `true` if a tenant with this ID exists.
    async fn exists(&self, id: &TenantId) -> TenancyResult<bool> {
        Ok(self.find_by_id(id).await?.is_some())
    }

    /// Lists all tenants, oldest first.
    async fn list(&self) -> TenancyResult<Vec<TenantRecord>>;

    /// Lists tenants in the given status, oldest first.
    async fn list_by_status(&self, status: TenantStatus) -> TenancyResult<Vec<TenantRecord>>;
}

/// Explains why a conditional status update touched no rows.
///
/// `current` is the status read in the same transaction as the update, or
/// `None` if the tenant does not exist.
pub(crate) fn rejected_update(
    id: &TenantId,
    current: Option<TenantStatus>,
    requested: TenantStatus,
) -> TenancyResult<()> {
    match current {
        None => Err(TenancyError::UnknownTenant {
            tenant_id: id.clone(),
        }),
        Some(status) if status == requested => Ok(()),
        Some(status) => Err(TenancyError::InvalidStatusTransition {
            tenant_id: id.clone(),
            from: status,
            to: requested,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_update_unknown() {
        let id = TenantId::new("t1");
        assert!(matches!(
            rejected_update(&id, None, TenantStatus::Active),
            Err(TenancyError::UnknownTenant { .. })
        ));
    }

    #[test]
    fn test_rejected_update_same_status_is_noop() {
        let id = TenantId::new("t1");
        assert!(rejected_update(&id, Some(TenantStatus::Active), TenantStatus::Active).is_ok());
    }

    #[test]
    fn test_rejected_update_invalid_transition() {
        let id = TenantId::new("t1");
        let err =
            rejected_update(&id, Some(TenantStatus::Deactivated), TenantStatus::Active).unwrap_err();
        assert!(matches!(
            err,
            TenancyError::InvalidStatusTransition {
                from: TenantStatus::Deactivated,
                to: TenantStatus::Active,
                ..
            }
        ));
    }
}
