//! Error types for tenant routing and provisioning.
//!
//! Every fallible operation in this crate returns [`TenancyResult`]. The
//! variants follow the routing taxonomy: infrastructure failures
//! ([`TenancyError::StorageUnavailable`], [`TenancyError::ProvisioningFailed`])
//! are retryable, data-integrity failures ([`TenancyError::NameConflict`]) are
//! terminal, and [`TenancyError::ContextMisuse`] always indicates a bug in the
//! caller.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::tenant::{TenantId, TenantStatus};

/// Result alias used throughout the crate.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// The primary error type for routing, provisioning and directory operations.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// Routing was requested for a tenant the directory does not know.
    #[error("unknown tenant: {tenant_id}")]
    UnknownTenant { tenant_id: TenantId },

    /// A tenant with the same display name or storage instance already exists.
    #[error("tenant name conflict: '{display_name}' (storage instance {storage_instance})")]
    NameConflict {
        display_name: String,
        storage_instance: String,
    },

    /// The underlying storage could not be reached.
    #[error("storage unavailable for {storage_instance}: {message}")]
    StorageUnavailable {
        storage_instance: String,
        message: String,
    },

    /// One of the provisioning steps after the directory insert failed.
    ///
    /// The tenant record has been left in `FAILED` and can be retried.
    #[error("provisioning failed for tenant {tenant_id} during {step}: {source}")]
    ProvisioningFailed {
        tenant_id: TenantId,
        step: ProvisioningStep,
        #[source]
        source: Box<TenancyError>,
    },

    /// A tenant-scoped operation ran without (or with a mismatched) tenant context.
    #[error("tenant context misuse: {message}")]
    ContextMisuse { message: String },

    /// The inbound unit of work did not carry a tenant identifier.
    #[error("missing tenant identifier")]
    MissingTenantId,

    /// The tenant exists but has been deactivated.
    #[error("tenant deactivated: {tenant_id}")]
    TenantDeactivated { tenant_id: TenantId },

    /// The storage instance is already stamped as owned by a different tenant.
    #[error("storage instance {storage_instance} is owned by tenant {owner}")]
    InstanceOwnershipConflict {
        storage_instance: String,
        owner: TenantId,
    },

    /// The display name cannot be turned into a storage instance name.
    #[error("invalid tenant name '{display_name}': {reason}")]
    InvalidTenantName { display_name: String, reason: String },

    /// The requested status change is not allowed by the provisioning state machine.
    #[error("invalid status transition for tenant {tenant_id}: {from} -> {to}")]
    InvalidStatusTransition {
        tenant_id: TenantId,
        from: TenantStatus,
        to: TenantStatus,
    },

    /// An error raised by the caller's tenant-scoped operation.
    #[error("operation failed: {message}")]
    Operation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid engine or registry configuration.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },
}

impl TenancyError {
    /// Builds a [`TenancyError::StorageUnavailable`] for the given instance.
    pub fn unavailable(storage_instance: impl Into<String>, message: impl fmt::Display) -> Self {
        TenancyError::StorageUnavailable {
            storage_instance: storage_instance.into(),
            message: message.to_string(),
        }
    }

    /// Wraps an arbitrary error raised inside a tenant-scoped operation.
    pub fn operation<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TenancyError::Operation {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Returns `true` if the caller may retry the request with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TenancyError::StorageUnavailable { .. } | TenancyError::ProvisioningFailed { .. }
        )
    }

    /// Returns `true` for data-integrity failures that must be reported verbatim.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TenancyError::NameConflict { .. }
                | TenancyError::InstanceOwnershipConflict { .. }
                | TenancyError::InvalidTenantName { .. }
                | TenancyError::TenantDeactivated { .. }
        )
    }

    /// Returns the provisioning step that failed, if this is a provisioning error.
    pub fn failed_step(&self) -> Option<ProvisioningStep> {
        match self {
            TenancyError::ProvisioningFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// The provisioning steps that may fail after the directory insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningStep {
    /// Creating the physical storage instance.
    CreateInstance,
    /// Applying the baseline schema.
    ApplySchema,
    /// Constructing and registering the connection pool.
    RegisterPool,
    /// Marking the tenant record ACTIVE.
    Activate,
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningStep::CreateInstance => write!(f, "create-instance"),
            ProvisioningStep::ApplySchema => write!(f, "apply-schema"),
            ProvisioningStep::RegisterPool => write!(f, "register-pool"),
            ProvisioningStep::Activate => write!(f, "activate"),
        }
    }
}
