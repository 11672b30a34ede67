//! SAN Volume Driver
//!
//! Composes the provisioning, resize, lifecycle, mapping, inventory and
//! snapshot components behind the [`VolumeDriver`] capability trait.

use super::{
    InventoryStreamer, LifecycleManager, MappingCoordinator, ProvisioningEngine,
    ResizeCoordinator, SanSettings, SanSettingsRef, SnapshotManager,
};
use crate::config::{DriverConfig, DriverContext, SAN_DRIVER_NAME};
use crate::controller::api::extract;
use crate::domain::ports::{ControllerApiRef, HostDeviceNotifierRef, PoolSelector, VolumeDriver};
use crate::domain::types::{
    AccessInfo, CreateOutcome, DestroyOutcome, HostInfo, ImportOutcome, Protocol, ResizeOutcome,
    Snapshot, StoragePool, UpdateFlags, VolumeRecord, VolumeRequest,
};
use crate::error::{Error, Result};
use crate::pools::PoolCatalog;
use crate::san::options::internal_volume_name;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::any::Any;
use std::sync::Arc;
use tracing::{info, instrument};

/// Replace characters not allowed in backend names with `-`
fn clean_backend_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Block storage driver for one controller backend
pub struct SanDriver {
    config: DriverConfig,
    settings: SanSettingsRef,
    backend_name: String,
    pools: PoolCatalog,
    provisioner: ProvisioningEngine,
    resizer: ResizeCoordinator,
    lifecycle: LifecycleManager,
    mapping: MappingCoordinator,
    inventory: InventoryStreamer,
    snapshots: SnapshotManager,
}

impl SanDriver {
    /// Validate the configuration against the controller and build the driver
    pub async fn initialize(
        config: DriverConfig,
        api: ControllerApiRef,
        notifier: Option<HostDeviceNotifierRef>,
    ) -> Result<Self> {
        config.validate()?;
        let settings: SanSettingsRef = Arc::new(SanSettings::from_config(&config)?);

        let lifs = extract(api.net_interface_get_data_lifs("iscsi").await)
            .map_err(|e| Error::remote("net-interface-get-iter", "iscsi", e))?;
        let first_lif = lifs
            .first()
            .cloned()
            .ok_or_else(|| Error::Configuration("no iSCSI data LIFs found".into()))?;
        if let Some(data_lif) = &config.data_lif {
            if !lifs.contains(data_lif) {
                return Err(Error::Configuration(format!(
                    "data LIF {} is not an iSCSI data LIF of this SVM ({})",
                    data_lif,
                    lifs.join(", ")
                )));
            }
        }

        let backend_name = match config.backend_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => clean_backend_name(&format!("ontapsan_{}", first_lif)),
        };
        let pools = PoolCatalog::from_config(&config, &backend_name)?;

        let mapping = MappingCoordinator::new(api.clone(), settings.clone(), lifs);
        if settings.driver_context == DriverContext::Csi {
            mapping.ensure_igroup(&settings.igroup_name).await?;
        }

        info!(
            backend = %backend_name,
            context = %settings.driver_context,
            config = ?config.sanitized(),
            "Initialized SAN driver"
        );

        Ok(Self {
            provisioner: ProvisioningEngine::new(api.clone(), settings.clone()),
            resizer: ResizeCoordinator::new(api.clone(), settings.clone()),
            lifecycle: LifecycleManager::new(api.clone(), settings.clone(), notifier),
            inventory: InventoryStreamer::new(api.clone(), settings.clone()),
            snapshots: SnapshotManager::new(api),
            mapping,
            pools,
            backend_name,
            settings,
            config,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn pool_catalog(&self) -> &PoolCatalog {
        &self.pools
    }
}

#[async_trait]
impl VolumeDriver for SanDriver {
    fn name(&self) -> &str {
        SAN_DRIVER_NAME
    }

    fn backend_name(&self) -> String {
        self.backend_name.clone()
    }

    fn protocol(&self) -> Protocol {
        Protocol::Block
    }

    fn internal_volume_name(&self, name: &str) -> String {
        internal_volume_name(&self.settings.storage_prefix, name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn storage_pools(&self) -> Vec<StoragePool> {
        self.pools.pools().cloned().collect()
    }

    #[instrument(skip_all, fields(volume = %request.internal_name, pool = %pool.name))]
    async fn create(&self, request: &VolumeRequest, pool: &StoragePool) -> Result<CreateOutcome> {
        let aggregates = self.pools.pools_for_create(request, pool)?;
        self.provisioner.create(request, pool, &aggregates).await
    }

    #[instrument(skip_all, fields(volume = %request.internal_name))]
    async fn create_clone(&self, request: &VolumeRequest, pool: Option<&StoragePool>) -> Result<()> {
        self.provisioner.create_clone(request, pool).await
    }

    #[instrument(skip_all, fields(volume = %request.internal_name))]
    async fn create_followup(&self, request: &VolumeRequest) -> Result<Option<AccessInfo>> {
        self.mapping.create_followup(request).await
    }

    #[instrument(skip(self))]
    async fn resize(&self, internal_name: &str, size_bytes: u64) -> Result<ResizeOutcome> {
        self.resizer.resize(internal_name, size_bytes).await
    }

    #[instrument(skip(self))]
    async fn destroy(&self, internal_name: &str) -> Result<DestroyOutcome> {
        self.lifecycle.destroy(internal_name).await
    }

    #[instrument(skip(self))]
    async fn rename(&self, internal_name: &str, new_name: &str) -> Result<()> {
        self.lifecycle.rename(internal_name, new_name).await
    }

    #[instrument(skip(self, request), fields(volume = %request.internal_name))]
    async fn import(&self, request: &VolumeRequest, original_name: &str) -> Result<ImportOutcome> {
        self.lifecycle.import(request, original_name).await
    }

    #[instrument(skip(self, host), fields(host = %host.name))]
    async fn publish(&self, internal_name: &str, host: &HostInfo) -> Result<AccessInfo> {
        self.mapping.publish(internal_name, host).await
    }

    async fn exists(&self, internal_name: &str) -> Result<bool> {
        self.lifecycle.exists(internal_name).await
    }

    async fn get_volume_external(&self, internal_name: &str) -> Result<VolumeRecord> {
        self.lifecycle.get_volume_external(internal_name).await
    }

    fn enumerate(&self) -> BoxStream<'static, Result<VolumeRecord>> {
        self.inventory.enumerate()
    }

    #[instrument(skip(self))]
    async fn create_snapshot(&self, volume: &str, name: &str) -> Result<Snapshot> {
        self.snapshots.create(volume, name).await
    }

    async fn get_snapshot(&self, volume: &str, name: &str) -> Result<Option<Snapshot>> {
        self.snapshots.get(volume, name).await
    }

    async fn list_snapshots(&self, volume: &str) -> Result<Vec<Snapshot>> {
        self.snapshots.list(volume).await
    }

    #[instrument(skip(self))]
    async fn restore_snapshot(&self, volume: &str, name: &str) -> Result<()> {
        self.snapshots.restore(volume, name).await
    }

    #[instrument(skip(self))]
    async fn delete_snapshot(&self, volume: &str, name: &str) -> Result<()> {
        self.snapshots.delete(volume, name).await
    }

    fn update_flags(&self, original: &dyn VolumeDriver) -> UpdateFlags {
        match original.as_any().downcast_ref::<SanDriver>() {
            Some(original) => self.config.diff(&original.config),
            None => UpdateFlags::invalid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::memory::{SimulatedConfig, SimulatedController};
    use crate::san::fixtures::{self, GI};
    use assert_matches::assert_matches;
    use futures::StreamExt;

    async fn driver(
        controller: &Arc<SimulatedController>,
        customize: impl FnOnce(&mut DriverConfig),
    ) -> Result<SanDriver> {
        let mut config = fixtures::config();
        customize(&mut config);
        SanDriver::initialize(config, controller.clone(), None).await
    }

    #[test]
    fn test_clean_backend_name() {
        assert_eq!(clean_backend_name("ontapsan_10.0.0.10"), "ontapsan_10.0.0.10");
        assert_eq!(clean_backend_name("ontapsan_fe80::1"), "ontapsan_fe80--1");
    }

    #[tokio::test]
    async fn test_initialize_requires_iscsi_lifs() {
        let controller = fixtures::controller(SimulatedConfig {
            data_lifs: Vec::new(),
            ..Default::default()
        });
        assert_matches!(
            driver(&controller, |_| {}).await.err(),
            Some(Error::Configuration(_))
        );
    }

    #[tokio::test]
    async fn test_initialize_rejects_unknown_data_lif() {
        let controller = fixtures::controller(SimulatedConfig::default());
        assert_matches!(
            driver(&controller, |c| c.data_lif = Some("10.9.9.9".into()))
                .await
                .err(),
            Some(Error::Configuration(_))
        );
    }

    #[tokio::test]
    async fn test_initialize_by_context() {
        let controller = fixtures::controller(SimulatedConfig::default());
        let san = driver(&controller, |_| {}).await.unwrap();
        assert_eq!(san.backend_name(), "ontapsan_10.0.0.10");
        assert!(controller.igroup_initiators("trident").is_some());
        assert_eq!(san.storage_pools().len(), 3);

        let docker = fixtures::controller(SimulatedConfig::default());
        driver(&docker, |c| {
            c.driver_context = DriverContext::Docker;
            c.backend_name = Some("docker-san".into());
        })
        .await
        .unwrap();
        assert!(docker.igroup_initiators("trident").is_none());
    }

    #[tokio::test]
    async fn test_volume_lifecycle_through_driver() {
        let controller = fixtures::controller(SimulatedConfig::default());
        let san = driver(&controller, |_| {}).await.unwrap();
        let pool = san.pool_catalog().pool("aggr2").unwrap().clone();
        let request = VolumeRequest::new("pvc-1", san.internal_volume_name("pvc-1"), "1Gi");
        assert_eq!(request.internal_name, "trident_pvc_1");

        let outcome = san.create(&request, &pool).await.unwrap();
        assert_matches!(outcome, CreateOutcome::Created { ref aggregate, .. } if aggregate == "aggr2");

        let access = san.create_followup(&request).await.unwrap().unwrap();
        assert_eq!(access.igroup, "trident");

        let resized = san.resize("trident_pvc_1", 2 * GI).await.unwrap();
        assert_eq!(resized.size_bytes, 2 * GI);

        let records: Vec<_> = san.enumerate().collect().await;
        assert_eq!(records.len(), 1);
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.name, "pvc_1");
        assert_eq!(record.pool, "aggr2");

        assert_eq!(san.destroy("trident_pvc_1").await.unwrap(), DestroyOutcome::Destroyed);
        assert_eq!(
            san.destroy("trident_pvc_1").await.unwrap(),
            DestroyOutcome::AlreadyAbsent
        );
        assert!(!san.exists("trident_pvc_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_flags_between_instances() {
        let controller = fixtures::controller(SimulatedConfig::default());
        let original = driver(&controller, |_| {}).await.unwrap();
        let same = driver(&controller, |_| {}).await.unwrap();
        assert!(same.update_flags(&original).is_empty());

        let rotated = driver(&controller, |c| c.password = "rotated".into())
            .await
            .unwrap();
        let flags = rotated.update_flags(&original);
        assert!(flags.password_changed);
        assert!(!flags.invalid_update);
    }

    struct OtherDriver;

    #[async_trait]
    impl VolumeDriver for OtherDriver {
        fn name(&self) -> &str {
            "other"
        }
        fn backend_name(&self) -> String {
            "other".into()
        }
        fn protocol(&self) -> Protocol {
            Protocol::File
        }
        fn internal_volume_name(&self, name: &str) -> String {
            name.into()
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn storage_pools(&self) -> Vec<StoragePool> {
            Vec::new()
        }
        async fn create(&self, _: &VolumeRequest, _: &StoragePool) -> Result<CreateOutcome> {
            unimplemented!()
        }
        async fn create_clone(&self, _: &VolumeRequest, _: Option<&StoragePool>) -> Result<()> {
            unimplemented!()
        }
        async fn create_followup(&self, _: &VolumeRequest) -> Result<Option<AccessInfo>> {
            unimplemented!()
        }
        async fn resize(&self, _: &str, _: u64) -> Result<ResizeOutcome> {
            unimplemented!()
        }
        async fn destroy(&self, _: &str) -> Result<DestroyOutcome> {
            unimplemented!()
        }
        async fn rename(&self, _: &str, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn import(&self, _: &VolumeRequest, _: &str) -> Result<ImportOutcome> {
            unimplemented!()
        }
        async fn publish(&self, _: &str, _: &HostInfo) -> Result<AccessInfo> {
            unimplemented!()
        }
        async fn exists(&self, _: &str) -> Result<bool> {
            unimplemented!()
        }
        async fn get_volume_external(&self, _: &str) -> Result<VolumeRecord> {
            unimplemented!()
        }
        fn enumerate(&self) -> BoxStream<'static, Result<VolumeRecord>> {
            unimplemented!()
        }
        async fn create_snapshot(&self, _: &str, _: &str) -> Result<Snapshot> {
            unimplemented!()
        }
        async fn get_snapshot(&self, _: &str, _: &str) -> Result<Option<Snapshot>> {
            unimplemented!()
        }
        async fn list_snapshots(&self, _: &str) -> Result<Vec<Snapshot>> {
            unimplemented!()
        }
        async fn restore_snapshot(&self, _: &str, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn delete_snapshot(&self, _: &str, _: &str) -> Result<()> {
            unimplemented!()
        }
        fn update_flags(&self, _: &dyn VolumeDriver) -> UpdateFlags {
            UpdateFlags::default()
        }
    }

    #[tokio::test]
    async fn test_update_flags_from_other_driver_type_is_invalid() {
        let controller = fixtures::controller(SimulatedConfig::default());
        let san = driver(&controller, |_| {}).await.unwrap();
        assert!(san.update_flags(&OtherDriver).invalid_update);
    }
}
