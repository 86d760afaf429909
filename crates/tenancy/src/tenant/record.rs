//! Tenant directory records and the provisioning state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::TenantId;
use crate::error::TenancyError;

/// Lifecycle status of a tenant.
///
/// ```text
/// PROVISIONING ──► ACTIVE ──► DEACTIVATED
///      │  ▲                       ▲
///      ▼  │                       │
///     FAILED ─────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantStatus {
    /// Directory row exists; storage instance and pool are being set up.
    Provisioning,
    /// Storage instance, schema and pool are ready; routable.
    Active,
    /// One of the provisioning steps failed; retry re-enters provisioning.
    Failed,
    /// No longer routable. Terminal.
    Deactivated,
}

impl TenantStatus {
    /// All statuses, in declaration order.
    pub const ALL: [TenantStatus; 4] = [
        TenantStatus::Provisioning,
        TenantStatus::Active,
        TenantStatus::Failed,
        TenantStatus::Deactivated,
    ];

    /// Returns the canonical upper-case name stored in the directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Provisioning => "PROVISIONING",
            TenantStatus::Active => "ACTIVE",
            TenantStatus::Failed => "FAILED",
            TenantStatus::Deactivated => "DEACTIVATED",
        }
    }

    /// Returns the statuses a record may move to `self` from.
    ///
    /// Same-status updates are handled separately as no-ops.
    pub fn allowed_sources(&self) -> &'static [TenantStatus] {
        match self {
            TenantStatus::Provisioning => &[TenantStatus::Failed],
            TenantStatus::Active => &[TenantStatus::Provisioning, TenantStatus::Failed],
            TenantStatus::Failed => &[TenantStatus::Provisioning],
            TenantStatus::Deactivated => &[
                TenantStatus::Provisioning,
                TenantStatus::Active,
                TenantStatus::Failed,
            ],
        }
    }

    /// Returns `true` if a record in `self` may move to `next`.
    pub fn can_transition_to(&self, next: TenantStatus) -> bool {
        *self == next || next.allowed_sources().contains(self)
    }

    /// Returns `true` if provisioning has not completed for this status.
    pub fn needs_provisioning(&self) -> bool {
        matches!(self, TenantStatus::Provisioning | TenantStatus::Failed)
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TenancyError::Configuration {
                message: format!("unrecognized tenant status '{}'", s),
            })
    }
}

/// A tenant as recorded in the control-plane directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    /// The tenant identifier.
    pub id: TenantId,
    /// Human-readable name the tenant was created with.
    pub display_name: String,
    /// Physical storage instance (database) backing this tenant.
    pub storage_instance_name: String,
    /// Current lifecycle status.
    pub status: TenantStatus,
    /// When the record was inserted.
    pub created_at: DateTime<Utc>,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

impl TenantRecord {
    /// Creates a fresh `PROVISIONING` record with a generated ID.
    pub fn provisioning(
        display_name: impl Into<String>,
        storage_instance_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TenantId::generate(),
            display_name: display_name.into(),
            storage_instance_name: storage_instance_name.into(),
            status: TenantStatus::Provisioning,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` if the tenant can be routed to.
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}
