//! Controller API response model
//!
//! Every controller verb yields an [`AttemptResult`]: either a transport
//! failure, or a response whose [`ApiStatus`] may still report a failed
//! domain operation. [`extract`] folds both layers into one `Result`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Controller error codes the provisioner special-cases
pub mod codes {
    /// Generic API error; carries "Job exists" for duplicate create jobs
    pub const EAPIERROR: &str = "13001";
    /// The named volume does not exist
    pub const EVOLUMEDOESNOTEXIST: &str = "13040";
    /// The named object does not exist
    pub const EOBJECTNOTFOUND: &str = "15661";
    /// The initiator group already exists
    pub const EVDISK_ERROR_INITGROUP_EXISTS: &str = "9012";
    /// The initiator is already a member of the group
    pub const EVDISK_ERROR_INITGROUP_HAS_NODE: &str = "9008";
    /// The LUN is already mapped to the group
    pub const EVDISK_ERROR_INITGROUP_HAS_VDISK: &str = "9029";
    /// Not enough space on the aggregate
    pub const ENOSPC: &str = "13062";
}

/// Domain status attached to every controller response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiStatus {
    pub passed: bool,
    pub code: String,
    pub reason: String,
}

impl ApiStatus {
    pub fn passed() -> Self {
        Self {
            passed: true,
            code: String::new(),
            reason: String::new(),
        }
    }

    pub fn failed(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            code: code.into(),
            reason: reason.into(),
        }
    }
}

/// A controller response: status plus the value on success
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: ApiStatus,
    pub value: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(value: T) -> Self {
        Self {
            status: ApiStatus::passed(),
            value: Some(value),
        }
    }

    pub fn failed(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::failed(code, reason),
            value: None,
        }
    }
}

/// Error surfaced by a controller call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("API status: failed, reason: {reason}, code: {code}")]
    Status { code: String, reason: String },

    #[error("API response carried no value")]
    EmptyResult,
}

impl ApiError {
    /// Controller error code, if the failure came from a domain status
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Status { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Controller reason text, if the failure came from a domain status
    pub fn reason(&self) -> Option<&str> {
        match self {
            ApiError::Status { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.code() == Some(code)
    }

    /// A concurrent, identical create job was already submitted
    pub fn is_job_exists(&self) -> bool {
        self.has_code(codes::EAPIERROR)
            && self
                .reason()
                .map(|r| r.trim().ends_with("Job exists"))
                .unwrap_or(false)
    }

    /// The volume is already gone
    pub fn is_volume_not_found(&self) -> bool {
        self.has_code(codes::EVOLUMEDOESNOTEXIST)
    }
}

/// Outcome of one controller verb; `Err` is a transport failure
pub type AttemptResult<T> = std::result::Result<ApiResponse<T>, ApiError>;

/// Extract the value of a controller call, surfacing a failed domain status
/// even when the transport succeeded.
pub fn extract<T>(attempt: AttemptResult<T>) -> std::result::Result<T, ApiError> {
    let response = attempt?;
    if !response.status.passed {
        return Err(ApiError::Status {
            code: response.status.code,
            reason: response.status.reason,
        });
    }
    response.value.ok_or(ApiError::EmptyResult)
}

// =============================================================================
// Controller object model
// =============================================================================

/// Container ("flexible volume") attributes as reported by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexvolAttributes {
    pub name: String,
    pub aggregate: String,
    /// Volume type (`rw`, `dp`, `ls`); `None` when the controller omitted it
    pub volume_type: Option<String>,
    pub size_bytes: u64,
    pub space_reserve: String,
    pub snapshot_policy: String,
    pub snapshot_reserve_percent: Option<u8>,
    pub encrypted: bool,
    pub tiering_policy: String,
    pub export_policy: String,
    pub security_style: String,
    pub unix_permissions: String,
    /// Whether the id attribute block was present in the response
    pub has_id_attributes: bool,
}

/// Parameters of a container create call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCreateSpec {
    pub name: String,
    pub aggregate: String,
    pub size_bytes: u64,
    pub space_reserve: String,
    pub snapshot_policy: String,
    pub unix_permissions: String,
    pub export_policy: String,
    pub security_style: String,
    pub tiering_policy: String,
    pub encrypt: bool,
    /// `None` lets the controller apply its own default
    pub snapshot_reserve: Option<u8>,
}

/// Device ("LUN") attributes as reported by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunInfo {
    pub path: String,
    /// Name of the containing volume
    pub volume: String,
    pub size_bytes: Option<u64>,
    pub online: Option<bool>,
    pub mapped: Option<bool>,
    pub os_type: String,
    pub serial: String,
}

/// Parameters of a device create call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunCreateSpec {
    pub path: String,
    pub size_bytes: u64,
    pub os_type: String,
    pub space_reserved: bool,
    pub space_allocated: bool,
}

/// Result of a device create call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunCreateResult {
    /// Size the controller actually allocated, possibly rounded up
    pub actual_size_bytes: u64,
}

/// Device geometry as reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunGeometry {
    pub max_resize_size_bytes: u64,
}

/// One (initiator group, LUN id) mapping of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunMapping {
    pub igroup: String,
    pub lun_id: u32,
}

/// Space accounting of an aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpace {
    /// `None` when the controller did not report a size
    pub size_bytes: Option<u64>,
    pub used_including_snapshot_reserve_bytes: u64,
    pub snapshot_reserve_bytes: u64,
}

/// A snapshot as reported by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub volume: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Optional controller capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// The controller does not report LUN geometry; skip the ceiling check
    LunGeometrySkip,
    /// Tiering policies are supported on volume create
    FabricPoolTiering,
}
