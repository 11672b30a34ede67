//! Lifecycle Manager
//!
//! Existence checks, idempotent teardown, rename and adoption of volumes
//! created outside the driver.

use super::inventory::volume_record;
use super::SanSettingsRef;
use crate::config::DriverContext;
use crate::controller::api::{extract, LunInfo};
use crate::domain::ports::{ControllerApiRef, HostDeviceNotifierRef};
use crate::domain::types::{lun_path, DestroyOutcome, ImportOutcome, VolumeRecord, VolumeRequest};
use crate::error::{Error, Result};
use tracing::{debug, error, info, warn};

pub struct LifecycleManager {
    api: ControllerApiRef,
    settings: SanSettingsRef,
    notifier: Option<HostDeviceNotifierRef>,
}

impl LifecycleManager {
    pub fn new(
        api: ControllerApiRef,
        settings: SanSettingsRef,
        notifier: Option<HostDeviceNotifierRef>,
    ) -> Self {
        Self {
            api,
            settings,
            notifier,
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        extract(self.api.volume_exists(name).await)
            .map_err(|e| Error::remote("volume-exists", name, e))
    }

    /// Succeeds only if the volume exists
    pub async fn get(&self, name: &str) -> Result<()> {
        if self.exists(name).await? {
            Ok(())
        } else {
            Err(Error::VolumeNotFound(name.to_string()))
        }
    }

    /// Destroy a volume and its LUN; an absent volume is not an error
    pub async fn destroy(&self, name: &str) -> Result<DestroyOutcome> {
        if !self.exists(name).await? {
            debug!(volume = %name, "Volume already deleted, skipping destroy");
            return Ok(DestroyOutcome::AlreadyAbsent);
        }

        if self.settings.driver_context == DriverContext::Docker {
            self.notify_device_removal(name).await?;
        }

        match extract(self.api.volume_destroy(name, true).await) {
            Ok(()) => {
                info!(volume = %name, "Destroyed volume");
                Ok(DestroyOutcome::Destroyed)
            }
            Err(e) if e.is_volume_not_found() => {
                warn!(volume = %name, "Volume already deleted");
                Ok(DestroyOutcome::AlreadyAbsent)
            }
            Err(e) => Err(Error::remote("volume-destroy", name, e)),
        }
    }

    /// Warn the local host before a mapped LUN disappears
    async fn notify_device_removal(&self, name: &str) -> Result<()> {
        let target_iqn = extract(self.api.iscsi_node_name().await).map_err(|e| {
            error!(error = %e, "Could not get target info");
            Error::remote("iscsi-node-get-name", name, e)
        })?;

        let path = lun_path(name);
        let mappings = extract(self.api.lun_map_list_info(&path).await)
            .map_err(|e| Error::remote("lun-map-list-info", &path, e))?;
        let lun_id = mappings
            .iter()
            .filter(|m| m.igroup == self.settings.igroup_name)
            .map(|m| m.lun_id)
            .last();

        match (lun_id, &self.notifier) {
            (Some(lun_id), Some(notifier)) => {
                debug!(volume = %name, lun_id = lun_id, "Preparing device for removal");
                notifier.prepare_device_for_removal(lun_id, &target_iqn).await;
            }
            (Some(lun_id), None) => {
                debug!(volume = %name, lun_id = lun_id, "No host notifier configured, skipping removal notice");
            }
            (None, _) => {}
        }
        Ok(())
    }

    pub async fn rename(&self, name: &str, new_name: &str) -> Result<()> {
        extract(self.api.volume_rename(name, new_name).await).map_err(|e| {
            warn!(volume = %name, error = %e, "Could not rename volume");
            Error::remote("volume-rename", name, e)
        })?;
        info!(volume = %name, new_name = %new_name, "Renamed volume");
        Ok(())
    }

    /// Every LUN inside a volume
    async fn luns_of(&self, volume: &str) -> Result<Vec<LunInfo>> {
        let pattern = format!("/vol/{}/*", volume);
        extract(self.api.lun_get_all(&pattern).await)
            .map_err(|e| Error::remote("lun-get-iter", pattern, e))
    }

    /// Adopt `original_name` as `request.internal_name`.
    ///
    /// The volume must be read-write and hold exactly one online LUN of
    /// known size, which becomes the adopted size. Managed imports move the
    /// LUN to its canonical path and rename the volume; unmanaged imports
    /// require the LUN to already be canonical and mapped.
    pub async fn import(&self, request: &VolumeRequest, original_name: &str) -> Result<ImportOutcome> {
        let invalid = |reason: String| {
            error!(volume = %original_name, "Could not import volume: {}", reason);
            Error::ImportValidation {
                volume: original_name.to_string(),
                reason,
            }
        };

        let volume = extract(self.api.volume_get(original_name).await)
            .map_err(|e| Error::remote("volume-get", original_name, e))?
            .ok_or_else(|| invalid("volume not found".to_string()))?;

        let mut luns = self.luns_of(original_name).await?;
        if luns.len() != 1 {
            return Err(invalid(format!(
                "volume must contain exactly one LUN, found {}",
                luns.len()
            )));
        }
        let lun = luns.remove(0);
        let target_path = lun_path(original_name);

        if let Some(volume_type) = volume.volume_type.as_deref() {
            if volume_type != "rw" {
                return Err(invalid(format!("volume type is {}, not rw", volume_type)));
            }
        }
        if lun.online == Some(false) {
            return Err(invalid(format!("LUN {} is not online", lun.path)));
        }
        let size_bytes = lun
            .size_bytes
            .ok_or_else(|| invalid("LUN size not available".to_string()))?;

        if request.import_not_managed {
            if !volume.has_id_attributes {
                return Err(invalid("unable to read volume id attributes".to_string()));
            }
            if lun.path != target_path {
                return Err(invalid(format!("LUN is named incorrectly: {}", lun.path)));
            }
            if lun.mapped == Some(false) {
                return Err(invalid(format!("LUN is not mapped: {}", lun.path)));
            }
        } else {
            if lun.path != target_path {
                extract(self.api.lun_rename(&lun.path, &target_path).await)
                    .map_err(|e| Error::remote("lun-rename", &lun.path, e))?;
            }
            extract(
                self.api
                    .volume_rename(original_name, &request.internal_name)
                    .await,
            )
            .map_err(|e| Error::remote("volume-rename", original_name, e))?;
        }

        info!(
            volume = %original_name,
            internal_name = %request.internal_name,
            size = size_bytes,
            managed = !request.import_not_managed,
            "Imported volume"
        );
        Ok(ImportOutcome {
            size_bytes,
            managed: !request.import_not_managed,
        })
    }

    /// Inventory record of one volume
    pub async fn get_volume_external(&self, name: &str) -> Result<VolumeRecord> {
        let volume = extract(self.api.volume_get(name).await)
            .map_err(|e| Error::remote("volume-get", name, e))?
            .ok_or_else(|| Error::VolumeNotFound(name.to_string()))?;
        let lun = self
            .luns_of(name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::VolumeNotFound(lun_path(name)))?;
        Ok(volume_record(&self.settings.storage_prefix, &lun, &volume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::api::{codes, ApiError, FlexvolAttributes};
    use crate::controller::memory::{SimulatedConfig, SimulatedController};
    use crate::domain::ports::HostDeviceNotifier;
    use crate::san::fixtures::{self, GI};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingNotifier {
        removed: Mutex<Vec<(u32, String)>>,
    }

    #[async_trait]
    impl HostDeviceNotifier for RecordingNotifier {
        async fn prepare_device_for_removal(&self, lun_id: u32, target_iqn: &str) {
            self.removed.lock().push((lun_id, target_iqn.to_string()));
        }
    }

    fn manager(controller: &Arc<SimulatedController>) -> LifecycleManager {
        LifecycleManager::new(controller.clone(), fixtures::settings(), None)
    }

    fn foreign_volume(name: &str, volume_type: Option<&str>) -> FlexvolAttributes {
        FlexvolAttributes {
            name: name.into(),
            aggregate: "aggr1".into(),
            volume_type: volume_type.map(str::to_string),
            size_bytes: 2 * GI,
            space_reserve: "none".into(),
            snapshot_policy: "default".into(),
            snapshot_reserve_percent: Some(5),
            encrypted: false,
            tiering_policy: "none".into(),
            export_policy: "default".into(),
            security_style: "unix".into(),
            unix_permissions: "---rwxrwxrwx".into(),
            has_id_attributes: true,
        }
    }

    fn foreign_lun(path: &str, volume: &str) -> LunInfo {
        LunInfo {
            path: path.into(),
            volume: volume.into(),
            size_bytes: Some(GI),
            online: Some(true),
            mapped: Some(false),
            os_type: "linux".into(),
            serial: "abc123".into(),
        }
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let controller = fixtures::controller(SimulatedConfig::default());
        fixtures::provision(&controller, "pvc1", "1Gi").await;
        let manager = manager(&controller);

        assert_eq!(manager.destroy("trident_pvc1").await.unwrap(), DestroyOutcome::Destroyed);
        assert!(controller.volume("trident_pvc1").is_none());
        assert!(controller.lun("/vol/trident_pvc1/lun0").is_none());

        assert_eq!(
            manager.destroy("trident_pvc1").await.unwrap(),
            DestroyOutcome::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn test_destroy_race_with_concurrent_delete() {
        let controller = fixtures::controller(SimulatedConfig::default());
        fixtures::provision(&controller, "pvc1", "1Gi").await;
        controller.fail_next(
            "volume_destroy",
            None,
            ApiError::Status {
                code: codes::EVOLUMEDOESNOTEXIST.into(),
                reason: "gone".into(),
            },
        );
        assert_eq!(
            manager(&controller).destroy("trident_pvc1").await.unwrap(),
            DestroyOutcome::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn test_destroy_other_failure_is_fatal() {
        let controller = fixtures::controller(SimulatedConfig::default());
        fixtures::provision(&controller, "pvc1", "1Gi").await;
        controller.fail_next("volume_destroy", None, ApiError::Transport("reset".into()));
        assert_matches!(
            manager(&controller).destroy("trident_pvc1").await,
            Err(Error::RemoteOperationFailed { .. })
        );
    }

    #[tokio::test]
    async fn test_docker_destroy_notifies_host() {
        let controller = fixtures::controller(SimulatedConfig::default());
        fixtures::provision(&controller, "pvc1", "1Gi").await;
        controller.insert_mapping("/vol/trident_pvc1/lun0", "trident", 7);

        let notifier = Arc::new(RecordingNotifier::default());
        let manager = LifecycleManager::new(
            controller.clone(),
            fixtures::settings_with(|c| c.driver_context = DriverContext::Docker),
            Some(notifier.clone()),
        );
        manager.destroy("trident_pvc1").await.unwrap();

        let removed = notifier.removed.lock().clone();
        assert_eq!(
            removed,
            vec![(7, SimulatedConfig::default().iscsi_node_name)]
        );
    }

    #[tokio::test]
    async fn test_docker_destroy_unmapped_skips_notice() {
        let controller = fixtures::controller(SimulatedConfig::default());
        fixtures::provision(&controller, "pvc1", "1Gi").await;

        let notifier = Arc::new(RecordingNotifier::default());
        let manager = LifecycleManager::new(
            controller.clone(),
            fixtures::settings_with(|c| c.driver_context = DriverContext::Docker),
            Some(notifier.clone()),
        );
        manager.destroy("trident_pvc1").await.unwrap();
        assert!(notifier.removed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rename() {
        let controller = fixtures::controller(SimulatedConfig::default());
        fixtures::provision(&controller, "pvc1", "1Gi").await;
        let manager = manager(&controller);

        manager.rename("trident_pvc1", "trident_pvc2").await.unwrap();
        assert!(controller.volume("trident_pvc2").is_some());
        assert_matches!(
            manager.rename("trident_pvc1", "trident_pvc3").await,
            Err(Error::RemoteOperationFailed { .. })
        );
    }

    #[tokio::test]
    async fn test_get() {
        let controller = fixtures::controller(SimulatedConfig::default());
        fixtures::provision(&controller, "pvc1", "1Gi").await;
        let manager = manager(&controller);

        manager.get("trident_pvc1").await.unwrap();
        assert_matches!(manager.get("trident_nope").await, Err(Error::VolumeNotFound(_)));
    }

    #[tokio::test]
    async fn test_managed_import_renames_lun_and_volume() {
        let controller = Arc::new(SimulatedController::default());
        controller.insert_volume(foreign_volume("legacy", Some("rw")));
        controller.insert_lun(foreign_lun("/vol/legacy/data", "legacy"));

        let request = fixtures::request("adopted", "");
        let outcome = manager(&controller).import(&request, "legacy").await.unwrap();
        assert_eq!(outcome.size_bytes, GI);
        assert!(outcome.managed);

        assert!(controller.volume("legacy").is_none());
        assert!(controller.volume("trident_adopted").is_some());
        assert!(controller.lun("/vol/trident_adopted/lun0").is_some());
    }

    #[tokio::test]
    async fn test_import_validation() {
        let controller = Arc::new(SimulatedController::default());
        controller.insert_volume(foreign_volume("mirror", Some("dp")));
        controller.insert_lun(foreign_lun("/vol/mirror/lun0", "mirror"));

        controller.insert_volume(foreign_volume("offline", Some("rw")));
        controller.insert_lun(LunInfo {
            online: Some(false),
            ..foreign_lun("/vol/offline/lun0", "offline")
        });

        controller.insert_volume(foreign_volume("crowded", Some("rw")));
        controller.insert_lun(foreign_lun("/vol/crowded/lun0", "crowded"));
        controller.insert_lun(foreign_lun("/vol/crowded/lun1", "crowded"));

        controller.insert_volume(foreign_volume("unsized", Some("rw")));
        controller.insert_lun(LunInfo {
            size_bytes: None,
            ..foreign_lun("/vol/unsized/lun0", "unsized")
        });

        let manager = manager(&controller);
        let request = fixtures::request("adopted", "");
        for original in ["mirror", "offline", "crowded", "unsized", "missing"] {
            assert_matches!(
                manager.import(&request, original).await,
                Err(Error::ImportValidation { ref volume, .. }) if volume == original
            );
        }
        assert_eq!(controller.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_unmanaged_import_requirements() {
        let controller = Arc::new(SimulatedController::default());
        controller.insert_volume(foreign_volume("misnamed", Some("rw")));
        controller.insert_lun(foreign_lun("/vol/misnamed/data", "misnamed"));
        controller.insert_volume(foreign_volume("unmapped", Some("rw")));
        controller.insert_lun(foreign_lun("/vol/unmapped/lun0", "unmapped"));
        controller.insert_volume(foreign_volume("ready", None));
        controller.insert_lun(foreign_lun("/vol/ready/lun0", "ready"));
        controller.insert_mapping("/vol/ready/lun0", "hosts", 3);

        let manager = manager(&controller);
        let mut request = fixtures::request("adopted", "");
        request.import_not_managed = true;

        for original in ["misnamed", "unmapped"] {
            assert_matches!(
                manager.import(&request, original).await,
                Err(Error::ImportValidation { .. })
            );
        }

        let outcome = manager.import(&request, "ready").await.unwrap();
        assert!(!outcome.managed);
        assert!(controller.volume("ready").is_some());
        assert_eq!(controller.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_get_volume_external() {
        let controller = fixtures::controller(SimulatedConfig::default());
        fixtures::provision(&controller, "pvc1", "1Gi").await;

        let record = manager(&controller)
            .get_volume_external("trident_pvc1")
            .await
            .unwrap();
        assert_eq!(record.name, "pvc1");
        assert_eq!(record.size_bytes, GI);
        assert_eq!(record.pool, "aggr1");
    }
}
