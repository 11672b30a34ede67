//! Domain value types shared by the driver, the API and the controller port

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// LUN attribute holding the filesystem type to create at attach time
pub const LUN_ATTRIBUTE_FSTYPE: &str = "com.netapp.ndvp.fstype";

/// LUN attribute holding the context of the creating driver
pub const LUN_ATTRIBUTE_CONTEXT: &str = "context";

/// Canonical path of the single LUN inside a volume
pub fn lun_path(volume: &str) -> String {
    format!("/vol/{}/lun0", volume)
}

/// Pool attribute keys
pub mod attributes {
    pub const SIZE: &str = "size";
    pub const SPACE_ALLOCATION: &str = "spaceAllocation";
    pub const SPACE_RESERVE: &str = "spaceReserve";
    pub const SNAPSHOT_POLICY: &str = "snapshotPolicy";
    pub const SNAPSHOT_RESERVE: &str = "snapshotReserve";
    pub const UNIX_PERMISSIONS: &str = "unixPermissions";
    pub const EXPORT_POLICY: &str = "exportPolicy";
    pub const SECURITY_STYLE: &str = "securityStyle";
    pub const ENCRYPTION: &str = "encryption";
    pub const TIERING_POLICY: &str = "tieringPolicy";
    pub const FILE_SYSTEM_TYPE: &str = "fileSystemType";
    pub const SPLIT_ON_CLONE: &str = "splitOnClone";
}

// =============================================================================
// Protocol / Access
// =============================================================================

/// Data protocol served by a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Block,
    File,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Block => write!(f, "block"),
            Protocol::File => write!(f, "file"),
        }
    }
}

/// Access mode reported for inventoried volumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
}

// =============================================================================
// Requests
// =============================================================================

/// Caller intent for a single volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequest {
    /// Logical (orchestrator-side) name
    pub name: String,
    /// Storage-side name of the container
    pub internal_name: String,
    /// Requested size, before parsing (e.g. "1Gi", "1073741824")
    pub size: String,
    /// Free-form per-volume options overriding pool defaults
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Adopt a volume without taking over its naming or mappings
    #[serde(default)]
    pub import_not_managed: bool,
    /// Source volume for clones
    #[serde(default)]
    pub clone_source_internal: Option<String>,
    /// Source snapshot for clones
    #[serde(default)]
    pub clone_source_snapshot: Option<String>,
}

impl VolumeRequest {
    pub fn new(
        name: impl Into<String>,
        internal_name: impl Into<String>,
        size: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            internal_name: internal_name.into(),
            size: size.into(),
            options: BTreeMap::new(),
            import_not_managed: false,
            clone_source_internal: None,
            clone_source_snapshot: None,
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// A storage pool with its inherited attribute defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePool {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    /// Restricts placement to a single aggregate
    pub aggregate: Option<String>,
}

impl StoragePool {
    pub fn attribute(&self, key: &str) -> &str {
        self.attributes.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Fully resolved creation options for one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeOptions {
    pub space_allocation: bool,
    pub space_reserve: String,
    pub snapshot_policy: String,
    /// `None` lets the controller choose its default
    pub snapshot_reserve: Option<u8>,
    pub unix_permissions: String,
    pub export_policy: String,
    pub security_style: String,
    pub encryption: bool,
    pub tiering_policy: String,
    pub fstype: String,
}

/// One physical target plus the options to apply there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementCandidate {
    pub aggregate: String,
    pub options: VolumeOptions,
}

impl PlacementCandidate {
    pub fn new(aggregate: impl Into<String>, options: VolumeOptions) -> Self {
        Self {
            aggregate: aggregate.into(),
            options,
        }
    }
}

/// Host identity used when publishing a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub name: String,
    #[serde(default)]
    pub iqns: Vec<String>,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a successful create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The volume was created on `aggregate`; `size_bytes` is the reconciled size
    Created {
        aggregate: String,
        size_bytes: u64,
        warnings: Vec<crate::san::ReconcileWarning>,
    },
    /// A volume with this name already existed; nothing was changed
    AlreadyExists,
    /// A concurrent, identical create job was already submitted
    CreateJobExists,
}

impl CreateOutcome {
    pub fn size_bytes(&self) -> Option<u64> {
        match self {
            CreateOutcome::Created { size_bytes, .. } => Some(*size_bytes),
            _ => None,
        }
    }
}

/// Result of a successful destroy call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    Destroyed,
    AlreadyAbsent,
}

/// Result of a successful resize call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeOutcome {
    /// Caller-visible size after the call
    pub size_bytes: u64,
    /// False when the request was within tolerance and nothing was mutated
    pub resized: bool,
    pub warnings: Vec<crate::san::ReconcileWarning>,
}

/// Result of a successful import call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Size adopted from the LUN
    pub size_bytes: u64,
    pub managed: bool,
}

/// Access information published for a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessInfo {
    pub target_iqn: String,
    pub target_portal: String,
    pub portals: Vec<String>,
    pub lun_number: u32,
    pub igroup: String,
    pub filesystem: String,
    pub lun_serial: String,
}

/// A managed volume as seen by inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRecord {
    pub name: String,
    pub internal_name: String,
    pub size_bytes: u64,
    pub protocol: Protocol,
    pub snapshot_policy: String,
    pub access_mode: AccessMode,
    /// Aggregate hosting the container
    pub pool: String,
}

/// A point-in-time snapshot of a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub name: String,
    pub volume: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub size_bytes: u64,
}

/// What changed between two driver instances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFlags {
    pub invalid_update: bool,
    pub volume_access_info_changed: bool,
    pub password_changed: bool,
    pub username_changed: bool,
}

impl UpdateFlags {
    pub fn invalid() -> Self {
        Self {
            invalid_update: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
