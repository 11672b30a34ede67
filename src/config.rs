//! Driver Configuration
//!
//! Backend configuration as supplied by the operator, with the defaults the
//! SAN driver applies when a field is omitted.

use crate::domain::types::{attributes, UpdateFlags};
use crate::error::{Error, Result};
use crate::sizing::SizeLimits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Driver name of the block (iSCSI) driver
pub const SAN_DRIVER_NAME: &str = "ontap-san";

/// Where the driver is running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverContext {
    /// Controller-side plugin; attachment is handled elsewhere
    #[default]
    Csi,
    /// Host-attached plugin; devices live on this host
    Docker,
}

impl std::fmt::Display for DriverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverContext::Csi => write!(f, "csi"),
            DriverContext::Docker => write!(f, "docker"),
        }
    }
}

// =============================================================================
// Pool Defaults
// =============================================================================

/// Attribute defaults inherited by every volume in a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolDefaults {
    pub size: String,
    pub space_allocation: String,
    pub space_reserve: String,
    pub snapshot_policy: String,
    pub snapshot_reserve: String,
    pub unix_permissions: String,
    pub export_policy: String,
    pub security_style: String,
    pub encryption: String,
    pub tiering_policy: String,
    pub file_system_type: String,
    pub split_on_clone: String,
}

impl Default for PoolDefaults {
    fn default() -> Self {
        Self {
            size: "1G".to_string(),
            space_allocation: "true".to_string(),
            space_reserve: "none".to_string(),
            snapshot_policy: "none".to_string(),
            snapshot_reserve: String::new(),
            unix_permissions: "---rwxrwxrwx".to_string(),
            export_policy: "default".to_string(),
            security_style: "unix".to_string(),
            encryption: "false".to_string(),
            tiering_policy: String::new(),
            file_system_type: "ext4".to_string(),
            split_on_clone: "false".to_string(),
        }
    }
}

impl PoolDefaults {
    /// Flatten into the attribute map carried by a storage pool
    pub fn to_attributes(&self) -> BTreeMap<String, String> {
        [
            (attributes::SIZE, &self.size),
            (attributes::SPACE_ALLOCATION, &self.space_allocation),
            (attributes::SPACE_RESERVE, &self.space_reserve),
            (attributes::SNAPSHOT_POLICY, &self.snapshot_policy),
            (attributes::SNAPSHOT_RESERVE, &self.snapshot_reserve),
            (attributes::UNIX_PERMISSIONS, &self.unix_permissions),
            (attributes::EXPORT_POLICY, &self.export_policy),
            (attributes::SECURITY_STYLE, &self.security_style),
            (attributes::ENCRYPTION, &self.encryption),
            (attributes::TIERING_POLICY, &self.tiering_policy),
            (attributes::FILE_SYSTEM_TYPE, &self.file_system_type),
            (attributes::SPLIT_ON_CLONE, &self.split_on_clone),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
    }
}

/// A virtual pool layered over the physical aggregates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualPoolConfig {
    /// Restrict the pool to one aggregate
    pub aggregate: Option<String>,
    /// Attribute overrides on top of the backend defaults
    pub defaults: BTreeMap<String, String>,
}

// =============================================================================
// Driver Configuration
// =============================================================================

/// Configuration for the SAN driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverConfig {
    pub version: u32,
    pub storage_driver_name: String,
    pub backend_name: Option<String>,
    #[serde(rename = "managementLIF")]
    pub management_lif: String,
    #[serde(rename = "dataLIF")]
    pub data_lif: Option<String>,
    pub svm: String,
    pub username: String,
    pub password: String,
    pub igroup_name: String,
    pub storage_prefix: String,
    pub limit_volume_size: Option<String>,
    /// Maximum aggregate usage, as a percentage ("80" or "80%")
    pub limit_aggregate_usage: Option<String>,
    pub driver_context: DriverContext,
    /// Physical pools, in placement order
    pub aggregates: Vec<String>,
    pub defaults: PoolDefaults,
    /// Virtual pools; when empty each aggregate is its own pool
    pub storage: Vec<VirtualPoolConfig>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            version: 1,
            storage_driver_name: SAN_DRIVER_NAME.to_string(),
            backend_name: None,
            management_lif: String::new(),
            data_lif: None,
            svm: String::new(),
            username: String::new(),
            password: String::new(),
            igroup_name: "trident".to_string(),
            storage_prefix: "trident_".to_string(),
            limit_volume_size: None,
            limit_aggregate_usage: None,
            driver_context: DriverContext::Csi,
            aggregates: Vec::new(),
            defaults: PoolDefaults::default(),
            storage: Vec::new(),
        }
    }
}

impl DriverConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load from a file; `.json` files are read as JSON, anything else as YAML
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_yaml_str(&contents),
        }
    }

    /// Validate fields that need no controller access
    pub fn validate(&self) -> Result<()> {
        if self.igroup_name.trim().is_empty() {
            return Err(Error::Configuration("igroupName must not be empty".into()));
        }
        if !is_valid_storage_prefix(&self.storage_prefix) {
            return Err(Error::Configuration(format!(
                "storage prefix may only contain letters/digits/underscore/dash/dot and must not start with a digit: {}",
                self.storage_prefix
            )));
        }
        if self.aggregates.is_empty() {
            return Err(Error::Configuration("no aggregates configured".into()));
        }
        for pool in &self.storage {
            if let Some(aggregate) = &pool.aggregate {
                if !self.aggregates.contains(aggregate) {
                    return Err(Error::Configuration(format!(
                        "virtual pool references unknown aggregate {}",
                        aggregate
                    )));
                }
            }
        }
        self.size_limits()?;
        self.aggregate_usage_limit()?;
        Ok(())
    }

    pub fn size_limits(&self) -> Result<SizeLimits> {
        SizeLimits::from_limit(self.limit_volume_size.as_deref())
    }

    /// Aggregate usage limit in percent, if configured
    pub fn aggregate_usage_limit(&self) -> Result<Option<f64>> {
        let raw = match self.limit_aggregate_usage.as_deref() {
            None => return Ok(None),
            Some(raw) => raw.replace('%', ""),
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<f64>().map(Some).map_err(|_| {
            Error::Configuration(format!("invalid value for limitAggregateUsage: {}", raw))
        })
    }

    /// Copy with credentials blanked, safe to log
    pub fn sanitized(&self) -> Self {
        let mut copy = self.clone();
        if !copy.username.is_empty() {
            copy.username = "<REDACTED>".into();
        }
        if !copy.password.is_empty() {
            copy.password = "<REDACTED>".into();
        }
        copy
    }

    /// Field-by-field comparison against the configuration being replaced
    pub fn diff(&self, original: &DriverConfig) -> UpdateFlags {
        UpdateFlags {
            invalid_update: self.storage_driver_name != original.storage_driver_name,
            volume_access_info_changed: self.data_lif != original.data_lif,
            password_changed: self.password != original.password,
            username_changed: self.username != original.username,
        }
    }
}

fn is_valid_storage_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    match chars.next() {
        None => true,
        Some(first) if first.is_ascii_alphabetic() || matches!(first, '_' | '.' | '-') => chars
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')),
        Some(_) => false,
    }
}
