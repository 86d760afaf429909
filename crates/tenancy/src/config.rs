//! Routing and provisioning configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HFS_TENANT_PREFIX` | tenant_ | Prefix for storage instance names |
//! | `HFS_TENANT_MAX_NAME_LENGTH` | 63 | Maximum storage instance name length |
//! | `HFS_TENANT_CONTROL_PLANE` | helios_control | Control-plane instance name |
//! | `HFS_TENANT_MAX_POOLS` | (unbounded) | Maximum number of cached tenant pools |
//! | `HFS_TENANT_IDLE_TIMEOUT` | (none) | Idle pool eviction, e.g. `10m`, `90s` |
//!
//! # Example
//!
//! ```
//! use helios_tenancy::TenancyConfig;
//!
//! let config = TenancyConfig::default()
//!     .with_storage_prefix("org_")
//!     .with_max_pools(100);
//!
//! assert_eq!(config.storage_prefix, "org_");
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TenancyError, TenancyResult};
use crate::naming::MAX_IDENTIFIER_LENGTH;

/// Configuration shared by the registry, provisioner and router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Prefix prepended to every normalized tenant name.
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,

    /// Maximum length of a storage instance name, prefix included.
    #[serde(default = "default_max_instance_name_length")]
    pub max_instance_name_length: usize,

    /// Name of the storage instance holding the tenant directory.
    #[serde(default = "default_control_plane_instance")]
    pub control_plane_instance: String,

    /// Maximum number of tenant pools to keep open.
    ///
    /// If exceeded, least recently used pools are evicted.
    #[serde(default)]
    pub max_pools: Option<usize>,

    /// Pools unused for this long are evicted by
    /// [`PoolRegistry::evict_idle`](crate::registry::PoolRegistry::evict_idle).
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
}

fn default_storage_prefix() -> String {
    "tenant_".to_string()
}

fn default_max_instance_name_length() -> usize {
    MAX_IDENTIFIER_LENGTH
}

fn default_control_plane_instance() -> String {
    "helios_control".to_string()
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            storage_prefix: default_storage_prefix(),
            max_instance_name_length: default_max_instance_name_length(),
            control_plane_instance: default_control_plane_instance(),
            max_pools: None,
            idle_timeout_ms: None,
        }
    }
}

impl TenancyConfig {
    /// Creates a configuration from environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are errors
    /// rather than silently ignored.
    pub fn from_env() -> TenancyResult<Self> {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("HFS_TENANT_PREFIX") {
            config.storage_prefix = prefix;
        }
        if let Some(len) = parse_env::<usize>("HFS_TENANT_MAX_NAME_LENGTH")? {
            config.max_instance_name_length = len;
        }
        if let Ok(name) = std::env::var("HFS_TENANT_CONTROL_PLANE") {
            config.control_plane_instance = name;
        }
        config.max_pools = parse_env::<usize>("HFS_TENANT_MAX_POOLS")?;
        if let Some(timeout) = parse_duration_env("HFS_TENANT_IDLE_TIMEOUT")? {
            config.idle_timeout_ms = Some(duration_millis(timeout));
        }

        if let Err(errors) = config.validate() {
            return Err(TenancyError::Configuration {
                message: errors.join("; "),
            });
        }

        Ok(config)
    }

    /// Sets the storage instance prefix.
    pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    /// Sets the control-plane instance name.
    pub fn with_control_plane_instance(mut self, name: impl Into<String>) -> Self {
        self.control_plane_instance = name.into();
        self
    }

    /// Sets the maximum number of cached pools.
    pub fn with_max_pools(mut self, max_pools: usize) -> Self {
        self.max_pools = Some(max_pools);
        self
    }

    /// Sets the idle timeout after which unused pools are evicted.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = Some(duration_millis(timeout));
        self
    }

    /// Returns the idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_instance_name_length == 0 {
            errors.push("Max instance name length cannot be 0".to_string());
        }

        if self.max_instance_name_length <= self.storage_prefix.len() {
            errors.push("Storage prefix leaves no room for the tenant name".to_string());
        }

        if self.control_plane_instance.trim().is_empty() {
            errors.push("Control-plane instance name cannot be empty".to_string());
        }

        if self.control_plane_instance.starts_with(&self.storage_prefix)
            && !self.storage_prefix.is_empty()
        {
            errors.push(
                "Control-plane instance name cannot share the tenant storage prefix".to_string(),
            );
        }

        if self.max_pools == Some(0) {
            errors.push("Max pools cannot be 0".to_string());
        }

        if self.idle_timeout_ms == Some(0) {
            errors.push("Idle timeout cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub(crate) fn parse_env<T: std::str::FromStr>(name: &str) -> TenancyResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| TenancyError::Configuration {
                message: format!("{} '{}': {}", name, raw, e),
            }),
        Err(_) => Ok(None),
    }
}

/// Reads a humantime duration such as `500ms` or `10m` from the environment.
pub(crate) fn parse_duration_env(name: &str) -> TenancyResult<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => humantime::parse_duration(raw.trim())
            .map(Some)
            .map_err(|e| TenancyError::Configuration {
                message: format!("{} '{}': {}", name, raw, e),
            }),
        Err(_) => Ok(None),
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
