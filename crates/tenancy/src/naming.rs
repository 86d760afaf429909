//! Storage instance naming.
//!
//! Every tenant gets its own storage instance whose name is derived
//! deterministically from the tenant's display name:
//!
//! ```text
//! display name: "Acme Corp"
//! instance:     "tenant_acme_corp"   (with the default prefix)
//! ```
//!
//! The instance name doubles as the natural key for idempotent re-creation,
//! so two display names that normalize to the same value are the same
//! tenant as far as storage is concerned.

use regex::Regex;

use crate::config::TenancyConfig;
use crate::error::{TenancyError, TenancyResult};

/// PostgreSQL's identifier length limit, also used as the default cap.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Derives storage instance names from tenant display names.
#[derive(Debug, Clone)]
pub struct InstanceNamer {
    prefix: String,
    max_length: usize,
    separators: Regex,
    reserved: Vec<String>,
}

impl InstanceNamer {
    /// Creates a namer with the given prefix and maximum instance name length.
    pub fn new(prefix: impl Into<String>, max_length: usize) -> TenancyResult<Self> {
        let prefix = prefix.into();
        let prefix_pattern = Regex::new(r"^[a-z_][a-z0-9_]*$").map_err(config_error)?;
        if !prefix.is_empty() && !prefix_pattern.is_match(&prefix) {
            return Err(TenancyError::Configuration {
                message: format!(
                    "storage prefix '{}' must be lower-case alphanumerics or '_'",
                    prefix
                ),
            });
        }
        if max_length <= prefix.len() {
            return Err(TenancyError::Configuration {
                message: format!(
                    "max instance name length {} leaves no room after prefix '{}'",
                    max_length, prefix
                ),
            });
        }

        Ok(Self {
            prefix,
            max_length,
            separators: Regex::new("[^a-z0-9]+").map_err(config_error)?,
            reserved: Vec::new(),
        })
    }

    /// Creates a namer from the crate configuration.
    ///
    /// The control-plane instance is reserved.
    pub fn from_config(config: &TenancyConfig) -> TenancyResult<Self> {
        Ok(
            Self::new(config.storage_prefix.clone(), config.max_instance_name_length)?
                .with_reserved([config.control_plane_instance.clone()]),
        )
    }

    /// Adds instance names that no tenant may be given.
    pub fn with_reserved(mut self, names: impl IntoIterator<Item = String>) -> Self {
        for name in names {
            if !self.reserved.contains(&name) {
                self.reserved.push(name);
            }
        }
        self
    }

    /// Returns `true` if `instance` is reserved.
    pub fn is_reserved(&self, instance: &str) -> bool {
        self.reserved.iter().any(|name| name.eq_ignore_ascii_case(instance))
    }

    /// Returns the configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Normalizes a display name: lower-case, every run of non-alphanumeric
    /// characters collapsed to a single `_`, no leading or trailing `_`.
    pub fn normalize(&self, display_name: &str) -> String {
        let lowered = display_name.trim().to_lowercase();
        let collapsed = self.separators.replace_all(&lowered, "_");
        collapsed.trim_matches('_').to_string()
    }

    /// Returns the storage instance name for a display name.
    ///
    /// ```
    /// use helios_tenancy::naming::InstanceNamer;
    ///
    /// let namer = InstanceNamer::new("tenant_", 63).unwrap();
    /// assert_eq!(namer.instance_name("Acme Corp").unwrap(), "tenant_acme_corp");
    /// assert_eq!(namer.instance_name("acme-corp").unwrap(), "tenant_acme_corp");
    /// assert!(namer.instance_name("  --  ").is_err());
    /// ```
    pub fn instance_name(&self, display_name: &str) -> TenancyResult<String> {
        let normalized = self.normalize(display_name);
        if normalized.is_empty() {
            return Err(TenancyError::InvalidTenantName {
                display_name: display_name.to_string(),
                reason: "name contains no letters or digits".to_string(),
            });
        }

        let name = format!("{}{}", self.prefix, normalized);
        if name.len() > self.max_length {
            return Err(TenancyError::InvalidTenantName {
                display_name: display_name.to_string(),
                reason: format!(
                    "storage instance name '{}' exceeds {} characters",
                    name, self.max_length
                ),
            });
        }

        if self.is_reserved(&name) {
            return Err(TenancyError::InvalidTenantName {
                display_name: display_name.to_string(),
                reason: format!("storage instance name '{}' is reserved", name),
            });
        }

        Ok(name)
    }
}

/// Quotes an identifier for safe use in SQL.
pub fn quote_identifier(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}

fn config_error(e: regex::Error) -> TenancyError {
    TenancyError::Configuration {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namer() -> InstanceNamer {
        InstanceNamer::new("tenant_", MAX_IDENTIFIER_LENGTH).unwrap()
    }

    #[test]
    fn test_normalize() {
        let namer = namer();
        assert_eq!(namer.normalize("Acme Corp"), "acme_corp");
        assert_eq!(namer.normalize("Acme--Corp  Inc."), "acme_corp_inc");
        assert_eq!(namer.normalize("  Acme  "), "acme");
        assert_eq!(namer.normalize("ACME"), "acme");
    }

    #[test]
    fn test_instance_name_default_prefix() {
        let namer = namer();
        assert_eq!(namer.instance_name("Acme Corp").unwrap(), "tenant_acme_corp");
        assert_eq!(namer.instance_name("Acme").unwrap(), "tenant_acme");
    }

    #[test]
    fn test_equivalent_names_collide() {
        let namer = namer();
        assert_eq!(
            namer.instance_name("Acme Corp").unwrap(),
            namer.instance_name("acme-corp").unwrap()
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        let namer = namer();
        assert!(matches!(
            namer.instance_name("!!!"),
            Err(TenancyError::InvalidTenantName { .. })
        ));
    }

    #[test]
    fn test_long_name_rejected() {
        let namer = InstanceNamer::new("db_", 10).unwrap();
        assert_eq!(namer.instance_name("short").unwrap(), "db_short");
        assert!(namer.instance_name("much too long for this").is_err());
    }

    #[test]
    fn test_invalid_prefix() {
        assert!(InstanceNamer::new("Tenant-", 63).is_err());
        assert!(InstanceNamer::new("tenant_", 7).is_err());
        assert!(InstanceNamer::new("", 63).is_ok());
    }

    #[test]
    fn test_reserved_names_rejected() {
        let config = TenancyConfig::default().with_storage_prefix("");
        let namer = InstanceNamer::from_config(&config)
            .unwrap()
            .with_reserved(["postgres".to_string(), "template1".to_string()]);

        for name in ["Helios Control", "helios-control", "Postgres", "template1"] {
            assert!(
                matches!(
                    namer.instance_name(name),
                    Err(TenancyError::InvalidTenantName { .. })
                ),
                "{} should be reserved",
                name
            );
        }
        assert_eq!(namer.instance_name("Acme").unwrap(), "acme");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("tenant_acme"), "\"tenant_acme\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
