//! Domain Ports - Core trait definitions for the provisioner
//!
//! These traits define the boundaries between the provisioning engine and
//! external systems: the storage controller, pool selection, the local host
//! and the orchestrator-facing driver surface.

use crate::controller::api::{
    AggregateSpace, AttemptResult, Feature, FlexvolAttributes, LunCreateResult, LunCreateSpec,
    LunGeometry, LunInfo, LunMapping, SnapshotInfo, VolumeCreateSpec,
};
use crate::domain::types::{
    AccessInfo, CreateOutcome, DestroyOutcome, HostInfo, ImportOutcome, Protocol,
    ResizeOutcome, Snapshot, StoragePool, UpdateFlags, VolumeRecord, VolumeRequest,
};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::any::Any;
use std::sync::Arc;

// =============================================================================
// Controller API Port
// =============================================================================

/// Port for the remote storage controller
///
/// Every verb is a separate remote call. Implementations report transport
/// failures as `Err` and domain failures through the response status; callers
/// fold both with [`crate::controller::api::extract`].
#[async_trait]
pub trait ControllerApi: Send + Sync {
    // Volumes
    async fn volume_exists(&self, name: &str) -> AttemptResult<bool>;
    async fn volume_get(&self, name: &str) -> AttemptResult<Option<FlexvolAttributes>>;
    async fn volume_get_all(&self, prefix: &str) -> AttemptResult<Vec<FlexvolAttributes>>;
    async fn volume_create(&self, spec: &VolumeCreateSpec) -> AttemptResult<()>;
    async fn volume_size(&self, name: &str) -> AttemptResult<u64>;
    async fn volume_set_size(&self, name: &str, size_bytes: u64) -> AttemptResult<()>;
    async fn volume_rename(&self, name: &str, new_name: &str) -> AttemptResult<()>;
    async fn volume_destroy(&self, name: &str, force: bool) -> AttemptResult<()>;
    async fn volume_clone_create(
        &self,
        name: &str,
        source: &str,
        snapshot: &str,
    ) -> AttemptResult<()>;
    async fn volume_clone_split_start(&self, name: &str) -> AttemptResult<()>;

    // LUNs
    async fn lun_create(&self, spec: &LunCreateSpec) -> AttemptResult<LunCreateResult>;
    /// List LUNs whose path matches a glob pattern (e.g. `/vol/trident_*/lun0`)
    async fn lun_get_all(&self, pattern: &str) -> AttemptResult<Vec<LunInfo>>;
    async fn lun_set_attribute(&self, path: &str, name: &str, value: &str) -> AttemptResult<()>;
    async fn lun_get_attribute(&self, path: &str, name: &str) -> AttemptResult<Option<String>>;
    async fn lun_destroy(&self, path: &str) -> AttemptResult<()>;
    async fn lun_rename(&self, path: &str, new_path: &str) -> AttemptResult<()>;
    /// Resize a LUN, returning the size the controller actually applied
    async fn lun_resize(&self, path: &str, size_bytes: u64) -> AttemptResult<u64>;
    async fn lun_get_geometry(&self, path: &str) -> AttemptResult<LunGeometry>;

    // Mappings
    async fn lun_map_list_info(&self, path: &str) -> AttemptResult<Vec<LunMapping>>;
    /// Map a LUN to an igroup, returning the assigned LUN id
    async fn lun_map(&self, igroup: &str, path: &str, lun_id: Option<u32>) -> AttemptResult<u32>;
    async fn lun_unmap(&self, igroup: &str, path: &str) -> AttemptResult<()>;
    async fn igroup_create(&self, name: &str, os_type: &str) -> AttemptResult<()>;
    async fn igroup_add(&self, name: &str, initiator: &str) -> AttemptResult<()>;

    // Network / service
    async fn iscsi_node_name(&self) -> AttemptResult<String>;
    async fn net_interface_get_data_lifs(&self, protocol: &str) -> AttemptResult<Vec<String>>;
    async fn aggr_space_get(&self, aggregate: &str) -> AttemptResult<Option<AggregateSpace>>;

    // Snapshots
    async fn snapshot_create(&self, volume: &str, name: &str) -> AttemptResult<()>;
    async fn snapshot_list(&self, volume: &str) -> AttemptResult<Vec<SnapshotInfo>>;
    async fn snapshot_restore(&self, volume: &str, name: &str) -> AttemptResult<()>;
    async fn snapshot_delete(&self, volume: &str, name: &str) -> AttemptResult<()>;

    /// Whether the controller offers an optional capability
    fn supports_feature(&self, feature: Feature) -> bool;

    /// Tiering policy applied when none is configured
    fn tiering_policy_value(&self) -> String;
}

// =============================================================================
// Pool Selector Port
// =============================================================================

/// Port yielding the ordered aggregates a volume may be placed on
pub trait PoolSelector: Send + Sync {
    /// Candidate aggregates for a create request, in attempt order
    fn pools_for_create(&self, request: &VolumeRequest, pool: &StoragePool) -> Result<Vec<String>>;
}

// =============================================================================
// Host Device Port
// =============================================================================

/// Port for host-local device handling in attached contexts
#[async_trait]
pub trait HostDeviceNotifier: Send + Sync {
    /// Tell the host a mapped device is about to disappear
    async fn prepare_device_for_removal(&self, lun_id: u32, target_iqn: &str);
}

// =============================================================================
// Volume Driver Port
// =============================================================================

/// Capability interface shared by protocol-specific drivers
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Driver type name (e.g. `ontap-san`)
    fn name(&self) -> &str;

    /// Name of the backend managed by this instance
    fn backend_name(&self) -> String;

    fn protocol(&self) -> Protocol;

    /// Storage-side name for a logical volume name
    fn internal_volume_name(&self, name: &str) -> String;

    fn as_any(&self) -> &dyn Any;

    /// Pools volumes may be requested against
    fn storage_pools(&self) -> Vec<StoragePool>;

    /// Create a volume in the given pool
    async fn create(&self, request: &VolumeRequest, pool: &StoragePool) -> Result<CreateOutcome>;

    /// Create a volume as a clone of another
    async fn create_clone(&self, request: &VolumeRequest, pool: Option<&StoragePool>) -> Result<()>;

    /// Post-create step binding the volume for attachment
    async fn create_followup(&self, request: &VolumeRequest) -> Result<Option<AccessInfo>>;

    async fn resize(&self, internal_name: &str, size_bytes: u64) -> Result<ResizeOutcome>;

    async fn destroy(&self, internal_name: &str) -> Result<DestroyOutcome>;

    async fn rename(&self, internal_name: &str, new_name: &str) -> Result<()>;

    /// Adopt a pre-existing volume
    async fn import(&self, request: &VolumeRequest, original_name: &str) -> Result<ImportOutcome>;

    async fn publish(&self, internal_name: &str, host: &HostInfo) -> Result<AccessInfo>;

    async fn exists(&self, internal_name: &str) -> Result<bool>;

    async fn get_volume_external(&self, internal_name: &str) -> Result<VolumeRecord>;

    /// Lazily enumerate every managed volume
    fn enumerate(&self) -> BoxStream<'static, Result<VolumeRecord>>;

    async fn create_snapshot(&self, volume: &str, name: &str) -> Result<Snapshot>;

    async fn get_snapshot(&self, volume: &str, name: &str) -> Result<Option<Snapshot>>;

    async fn list_snapshots(&self, volume: &str) -> Result<Vec<Snapshot>>;

    async fn restore_snapshot(&self, volume: &str, name: &str) -> Result<()>;

    async fn delete_snapshot(&self, volume: &str, name: &str) -> Result<()>;

    /// Compare against the instance this one replaces
    fn update_flags(&self, original: &dyn VolumeDriver) -> UpdateFlags;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ControllerApiRef = Arc<dyn ControllerApi>;
pub type HostDeviceNotifierRef = Arc<dyn HostDeviceNotifier>;
pub type VolumeDriverRef = Arc<dyn VolumeDriver>;
