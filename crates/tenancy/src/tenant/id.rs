//! Tenant identifier type.
//!
//! This module defines the [`TenantId`] type, the opaque routing key used by
//! the directory, the pool registry and the tenant context.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TenancyError, TenancyResult};

/// An opaque, immutable tenant identifier.
///
/// Identifiers are assigned once when a tenant is registered (see
/// [`TenantId::generate`]) and never change afterwards. Every routing
/// decision is keyed by this value.
///
/// # Examples
///
/// ```
/// use helios_tenancy::tenant::TenantId;
///
/// let tenant = TenantId::new("8d3f0b9e-acme");
/// assert_eq!(tenant.as_str(), "8d3f0b9e-acme");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant ID from an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh identifier for a newly registered tenant.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Builds a tenant ID from an inbound value such as an `X-Tenant-ID` header.
    ///
    /// An absent or blank value is a caller error and yields
    /// [`TenancyError::MissingTenantId`]; it is never defaulted to a shared
    /// instance.
    ///
    /// ```
    /// use helios_tenancy::tenant::TenantId;
    ///
    /// assert!(TenantId::from_header(Some(" t-42 ")).is_ok());
    /// assert!(TenantId::from_header(Some("   ")).is_err());
    /// assert!(TenantId::from_header(None).is_err());
    /// ```
    pub fn from_header(value: Option<&str>) -> TenancyResult<Self> {
        match value.map(str::trim) {
            Some(id) if !id.is_empty() => Ok(Self::new(id)),
            _ => Err(TenancyError::MissingTenantId),
        }
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantId::from_header(Some(s))
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        TenantId::new(s)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
