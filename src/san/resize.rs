//! Resize Coordinator
//!
//! Grows a volume and its LUN. Volumes never shrink; requests within
//! [`SAN_RESIZE_DELTA_BYTES`] of the current size are no-ops.

use super::limits::check_aggregate_limits_for_flexvol;
use super::reconcile::CapacityReconciler;
use super::SanSettingsRef;
use crate::controller::api::{extract, Feature};
use crate::domain::ports::ControllerApiRef;
use crate::domain::types::{lun_path, ResizeOutcome};
use crate::error::{Error, Result};
use crate::sizing::{check_size_limits, within_tolerance, SAN_RESIZE_DELTA_BYTES};
use tracing::{error, info};

pub struct ResizeCoordinator {
    api: ControllerApiRef,
    reconciler: CapacityReconciler,
    settings: SanSettingsRef,
}

impl ResizeCoordinator {
    pub fn new(api: ControllerApiRef, settings: SanSettingsRef) -> Self {
        Self {
            reconciler: CapacityReconciler::new(api.clone()),
            api,
            settings,
        }
    }

    pub async fn resize(&self, name: &str, requested_bytes: u64) -> Result<ResizeOutcome> {
        let exists = extract(self.api.volume_exists(name).await)
            .map_err(|e| Error::remote("volume-exists", name, e))?;
        if !exists {
            return Err(Error::VolumeNotFound(name.to_string()));
        }

        let current_bytes = extract(self.api.volume_size(name).await)
            .map_err(|e| Error::remote("volume-size", name, e))?;

        if within_tolerance(requested_bytes, current_bytes, SAN_RESIZE_DELTA_BYTES) {
            info!(
                volume = %name,
                requested = requested_bytes,
                current = current_bytes,
                delta = SAN_RESIZE_DELTA_BYTES,
                "Requested size is within the resize delta of the current size, nothing to do"
            );
            return Ok(ResizeOutcome {
                size_bytes: current_bytes,
                resized: false,
                warnings: Vec::new(),
            });
        }

        if requested_bytes < current_bytes {
            return Err(Error::ShrinkNotSupported {
                requested: requested_bytes,
                current: current_bytes,
            });
        }

        check_aggregate_limits_for_flexvol(
            self.api.as_ref(),
            name,
            requested_bytes,
            self.settings.aggregate_usage_limit,
        )
        .await?;
        check_size_limits(requested_bytes, &self.settings.size_limits)?;

        let path = lun_path(name);
        if !self.api.supports_feature(Feature::LunGeometrySkip) {
            let geometry = extract(self.api.lun_get_geometry(&path).await)
                .map_err(|e| Error::remote("lun-get-geometry", &path, e))?;
            if geometry.max_resize_size_bytes < requested_bytes {
                error!(
                    lun = %path,
                    requested = requested_bytes,
                    maximum = geometry.max_resize_size_bytes,
                    "Requested size is larger than the LUN's maximum capacity"
                );
                return Err(Error::ExceedsDeviceCapacity {
                    requested: requested_bytes,
                    maximum: geometry.max_resize_size_bytes,
                });
            }
        }

        extract(self.api.volume_set_size(name, requested_bytes).await)
            .map_err(|e| Error::remote("volume-set-size", name, e))?;

        let device_bytes = extract(self.api.lun_resize(&path, requested_bytes).await)
            .map_err(|e| Error::remote("lun-resize", &path, e))?;

        let reconciled = self.reconciler.reconcile(name, device_bytes).await;

        info!(
            volume = %name,
            previous = current_bytes,
            size = reconciled.size_bytes,
            lun_size = device_bytes,
            "Resized volume"
        );
        Ok(ResizeOutcome {
            size_bytes: reconciled.size_bytes,
            resized: true,
            warnings: reconciled.warnings,
        })
    }
}
