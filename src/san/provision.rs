//! Provisioning Engine
//!
//! Creates a (volume, LUN) pair on the first aggregate that accepts it.
//! All validation happens before the first mutation; once candidates are
//! being tried, a failing candidate is recorded and abandoned without
//! rollback and the next one is attempted.

use super::limits::check_aggregate_limits;
use super::options::{get_v, require_bool, resolve_volume_options};
use super::reconcile::CapacityReconciler;
use super::SanSettingsRef;
use crate::controller::api::{codes, extract, ApiError, LunCreateSpec, VolumeCreateSpec};
use crate::domain::ports::ControllerApiRef;
use crate::domain::types::{
    attributes, lun_path, CreateOutcome, PlacementCandidate, StoragePool, VolumeRequest,
    LUN_ATTRIBUTE_CONTEXT, LUN_ATTRIBUTE_FSTYPE,
};
use crate::error::{Error, PlacementFailure, Result};
use crate::sizing::{check_size_limits, parse_size, volume_size_or_default};
use tracing::{debug, error, info, warn};

/// OS type of every LUN the driver creates
const LUN_OS_TYPE: &str = "linux";

/// Format of snapshot names generated for clones
const SNAPSHOT_NAME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Name for a snapshot taken now
pub fn generated_snapshot_name() -> String {
    chrono::Utc::now().format(SNAPSHOT_NAME_FORMAT).to_string()
}

pub struct ProvisioningEngine {
    api: ControllerApiRef,
    reconciler: CapacityReconciler,
    settings: SanSettingsRef,
}

impl ProvisioningEngine {
    pub fn new(api: ControllerApiRef, settings: SanSettingsRef) -> Self {
        Self {
            reconciler: CapacityReconciler::new(api.clone()),
            api,
            settings,
        }
    }

    /// Create a volume on the first of `aggregates` that accepts it
    pub async fn create(
        &self,
        request: &VolumeRequest,
        pool: &StoragePool,
        aggregates: &[String],
    ) -> Result<CreateOutcome> {
        let name = &request.internal_name;

        let exists = extract(self.api.volume_exists(name).await)
            .map_err(|e| Error::remote("volume-exists", name, e))?;
        if exists {
            info!(volume = %name, "Volume already exists, nothing to create");
            return Ok(CreateOutcome::AlreadyExists);
        }

        let size_bytes = self.plan_size(request, pool)?;
        let options = resolve_volume_options(
            name,
            &request.options,
            pool,
            &self.api.tiering_policy_value(),
        )?;

        debug!(
            volume = %name,
            size = size_bytes,
            pool = %pool.name,
            options = ?options,
            "Creating volume"
        );

        let candidates: Vec<PlacementCandidate> = aggregates
            .iter()
            .map(|aggregate| PlacementCandidate::new(aggregate.as_str(), options.clone()))
            .collect();

        self.place(name, size_bytes, &pool.name, &candidates).await
    }

    /// Size in bytes a create request resolves to, checked against policy
    fn plan_size(&self, request: &VolumeRequest, pool: &StoragePool) -> Result<u64> {
        let requested = if request.size.trim().is_empty() {
            0
        } else {
            parse_size(&request.size)?
        };
        let size_bytes = volume_size_or_default(requested, pool.attribute(attributes::SIZE))?;
        check_size_limits(size_bytes, &self.settings.size_limits)?;
        Ok(size_bytes)
    }

    /// Try each candidate in order until one hosts the volume
    pub async fn place(
        &self,
        name: &str,
        size_bytes: u64,
        pool_name: &str,
        candidates: &[PlacementCandidate],
    ) -> Result<CreateOutcome> {
        let mut failures = Vec::with_capacity(candidates.len());
        let mut pools = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let aggregate = &candidate.aggregate;
            let options = &candidate.options;
            pools.push(aggregate.clone());

            let mut record = |reason: String| {
                error!(
                    pool = %pool_name,
                    aggregate = %aggregate,
                    volume = %name,
                    "{}", reason
                );
                failures.push(PlacementFailure {
                    aggregate: aggregate.clone(),
                    reason,
                });
            };

            if let Err(e) = check_aggregate_limits(
                self.api.as_ref(),
                aggregate,
                &options.space_reserve,
                size_bytes,
                self.settings.aggregate_usage_limit,
            )
            .await
            {
                record(e.to_string());
                continue;
            }

            let spec = VolumeCreateSpec {
                name: name.to_string(),
                aggregate: aggregate.clone(),
                size_bytes,
                space_reserve: options.space_reserve.clone(),
                snapshot_policy: options.snapshot_policy.clone(),
                unix_permissions: options.unix_permissions.clone(),
                export_policy: options.export_policy.clone(),
                security_style: options.security_style.clone(),
                tiering_policy: options.tiering_policy.clone(),
                encrypt: options.encryption,
                snapshot_reserve: options.snapshot_reserve,
            };
            if let Err(e) = extract(self.api.volume_create(&spec).await) {
                if e.is_job_exists() {
                    warn!(volume = %name, "Volume create job already exists, skipping volume create");
                    return Ok(CreateOutcome::CreateJobExists);
                }
                record(format!("error creating volume {}: {}", name, e));
                continue;
            }

            let path = lun_path(name);
            let lun = match extract(
                self.api
                    .lun_create(&LunCreateSpec {
                        path: path.clone(),
                        size_bytes,
                        os_type: LUN_OS_TYPE.to_string(),
                        space_reserved: false,
                        space_allocated: options.space_allocation,
                    })
                    .await,
            ) {
                Ok(lun) => lun,
                Err(e) => {
                    record(format!("error creating LUN {}: {}", path, e));
                    continue;
                }
            };

            if let Err(e) = extract(
                self.api
                    .lun_set_attribute(&path, LUN_ATTRIBUTE_FSTYPE, &options.fstype)
                    .await,
            ) {
                if let Err(cleanup) = extract(self.api.lun_destroy(&path).await) {
                    warn!(lun = %path, error = %cleanup, "Failed to clean up LUN");
                }
                return Err(Error::remote("lun-set-attribute", path, e));
            }
            if let Err(e) = extract(
                self.api
                    .lun_set_attribute(
                        &path,
                        LUN_ATTRIBUTE_CONTEXT,
                        &self.settings.driver_context.to_string(),
                    )
                    .await,
            ) {
                warn!(volume = %name, error = %e, "Failed to save the driver context attribute for new volume");
            }

            let reconciled = self.reconciler.reconcile(name, lun.actual_size_bytes).await;

            info!(
                volume = %name,
                aggregate = %aggregate,
                size = reconciled.size_bytes,
                "Created volume"
            );
            return Ok(CreateOutcome::Created {
                aggregate: aggregate.clone(),
                size_bytes: reconciled.size_bytes,
                warnings: reconciled.warnings,
            });
        }

        Err(Error::BackendIneligible {
            volume: name.to_string(),
            failures,
            pools,
        })
    }

    /// Create a volume as a clone of `request.clone_source_internal`.
    ///
    /// `source_pool` is the pool of the source volume; its `splitOnClone`
    /// attribute applies when the request does not set one.
    pub async fn create_clone(
        &self,
        request: &VolumeRequest,
        source_pool: Option<&StoragePool>,
    ) -> Result<()> {
        let name = &request.internal_name;
        let source = request
            .clone_source_internal
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidOption {
                name: "cloneSourceVolume".to_string(),
                reason: "no clone source given".to_string(),
            })?;

        let pool_split = source_pool
            .map(|p| p.attribute(attributes::SPLIT_ON_CLONE))
            .filter(|v| !v.is_empty())
            .unwrap_or(self.settings.split_on_clone.as_str());
        let split = require_bool(
            attributes::SPLIT_ON_CLONE,
            get_v(&request.options, attributes::SPLIT_ON_CLONE, pool_split),
        )?;

        debug!(volume = %name, source = %source, split = split, "Creating volume clone");

        let exists = extract(self.api.volume_exists(name).await)
            .map_err(|e| Error::remote("volume-exists", name, e))?;
        if exists {
            return Err(Error::VolumeExists(name.clone()));
        }

        let snapshot = match request.clone_source_snapshot.as_deref() {
            Some(snapshot) if !snapshot.is_empty() => snapshot.to_string(),
            _ => {
                let snapshot = generated_snapshot_name();
                extract(self.api.snapshot_create(source, &snapshot).await)
                    .map_err(|e| Error::remote("snapshot-create", source, e))?;
                snapshot
            }
        };

        match extract(self.api.volume_clone_create(name, source, &snapshot).await) {
            Ok(()) => {}
            Err(ApiError::Status { ref code, .. }) if code == codes::EOBJECTNOTFOUND => {
                return Err(Error::SnapshotNotFound {
                    volume: source.to_string(),
                    snapshot,
                })
            }
            Err(e) => return Err(Error::remote("volume-clone-create", name, e)),
        }

        if split {
            extract(self.api.volume_clone_split_start(name).await)
                .map_err(|e| Error::remote("volume-clone-split-start", name, e))?;
        }

        info!(volume = %name, source = %source, snapshot = %snapshot, "Created volume clone");
        Ok(())
    }
}
