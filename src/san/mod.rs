//! SAN Driver
//!
//! Block volumes served over iSCSI. Each volume is a flexible volume on an
//! aggregate holding exactly one LUN at `/vol/<name>/lun0`.

pub mod driver;
pub mod inventory;
pub mod lifecycle;
pub mod limits;
pub mod mapping;
pub mod options;
pub mod provision;
pub mod reconcile;
pub mod resize;
pub mod snapshot;

pub use driver::SanDriver;
pub use inventory::InventoryStreamer;
pub use lifecycle::LifecycleManager;
pub use mapping::MappingCoordinator;
pub use provision::ProvisioningEngine;
pub use reconcile::{CapacityReconciler, ReconcileOutcome, ReconcileWarning};
pub use resize::ResizeCoordinator;
pub use snapshot::SnapshotManager;

use crate::config::{DriverConfig, DriverContext, SAN_DRIVER_NAME};
use crate::domain::ports::{ControllerApiRef, HostDeviceNotifierRef, VolumeDriverRef};
use crate::error::{Error, Result};
use crate::sizing::SizeLimits;
use std::sync::Arc;

/// Settings shared by the SAN components, resolved once from the config
#[derive(Debug, Clone, PartialEq)]
pub struct SanSettings {
    pub driver_context: DriverContext,
    pub igroup_name: String,
    pub storage_prefix: String,
    pub size_limits: SizeLimits,
    /// Maximum aggregate usage in percent
    pub aggregate_usage_limit: Option<f64>,
    /// Backend-wide default for splitting clones
    pub split_on_clone: String,
    /// Preferred iSCSI data LIF
    pub data_lif: Option<String>,
}

pub type SanSettingsRef = Arc<SanSettings>;

impl SanSettings {
    pub fn from_config(config: &DriverConfig) -> Result<Self> {
        Ok(Self {
            driver_context: config.driver_context,
            igroup_name: config.igroup_name.clone(),
            storage_prefix: config.storage_prefix.clone(),
            size_limits: config.size_limits()?,
            aggregate_usage_limit: config.aggregate_usage_limit()?,
            split_on_clone: config.defaults.split_on_clone.clone(),
            data_lif: config.data_lif.clone(),
        })
    }
}

/// Factory for volume drivers
pub struct DriverFactory;

impl DriverFactory {
    /// Initialize the driver named by `config.storage_driver_name`
    pub async fn create(
        config: DriverConfig,
        api: ControllerApiRef,
        notifier: Option<HostDeviceNotifierRef>,
    ) -> Result<VolumeDriverRef> {
        match config.storage_driver_name.to_lowercase().as_str() {
            SAN_DRIVER_NAME => Ok(Arc::new(SanDriver::initialize(config, api, notifier).await?)),
            other => Err(Error::Configuration(format!(
                "unsupported storage driver: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared setup for the SAN component tests

    use super::*;
    use crate::config::PoolDefaults;
    use crate::controller::memory::{SimulatedConfig, SimulatedController};
    use crate::domain::types::{CreateOutcome, StoragePool, VolumeRequest};

    pub const GI: u64 = 1024 * 1024 * 1024;

    /// Controller with three aggregates of unlimited size
    pub fn controller(config: SimulatedConfig) -> Arc<SimulatedController> {
        Arc::new(
            SimulatedController::new(config)
                .with_aggregate("aggr1", None)
                .with_aggregate("aggr2", None)
                .with_aggregate("aggr3", None),
        )
    }

    pub fn config() -> DriverConfig {
        DriverConfig {
            aggregates: vec!["aggr1".into(), "aggr2".into(), "aggr3".into()],
            ..Default::default()
        }
    }

    pub fn settings() -> SanSettingsRef {
        settings_with(|_| {})
    }

    pub fn settings_with(customize: impl FnOnce(&mut DriverConfig)) -> SanSettingsRef {
        let mut config = config();
        customize(&mut config);
        Arc::new(SanSettings::from_config(&config).unwrap())
    }

    pub fn pool() -> StoragePool {
        StoragePool {
            name: "aggr1".into(),
            attributes: PoolDefaults::default().to_attributes(),
            aggregate: Some("aggr1".into()),
        }
    }

    pub fn request(name: &str, size: &str) -> VolumeRequest {
        VolumeRequest::new(name, format!("trident_{}", name), size)
    }

    /// Create `trident_<name>` on aggr1
    pub async fn provision(controller: &Arc<SimulatedController>, name: &str, size: &str) {
        let engine = ProvisioningEngine::new(controller.clone(), settings());
        let outcome = engine
            .create(&request(name, size), &pool(), &["aggr1".to_string()])
            .await
            .unwrap();
        assert!(matches!(outcome, CreateOutcome::Created { .. }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::memory::{SimulatedConfig, SimulatedController};
    use assert_matches::assert_matches;

    #[test]
    fn test_settings_from_config() {
        let config = DriverConfig {
            aggregates: vec!["aggr1".into()],
            limit_aggregate_usage: Some("75%".into()),
            data_lif: Some("10.0.0.10".into()),
            ..Default::default()
        };
        let settings = SanSettings::from_config(&config).unwrap();
        assert_eq!(settings.igroup_name, "trident");
        assert_eq!(settings.storage_prefix, "trident_");
        assert_eq!(settings.aggregate_usage_limit, Some(75.0));
        assert_eq!(settings.split_on_clone, "false");
        assert_eq!(settings.data_lif.as_deref(), Some("10.0.0.10"));
    }

    #[tokio::test]
    async fn test_factory_rejects_unknown_driver() {
        let api: ControllerApiRef = Arc::new(
            SimulatedController::new(SimulatedConfig::default()).with_aggregate("aggr1", None),
        );
        let config = DriverConfig {
            storage_driver_name: "ontap-nas".into(),
            aggregates: vec!["aggr1".into()],
            ..Default::default()
        };
        assert_matches!(
            DriverFactory::create(config, api, None).await.err(),
            Some(Error::Configuration(_))
        );
    }

    #[tokio::test]
    async fn test_factory_builds_san_driver() {
        let api: ControllerApiRef = Arc::new(
            SimulatedController::new(SimulatedConfig::default()).with_aggregate("aggr1", None),
        );
        let config = DriverConfig {
            aggregates: vec!["aggr1".into()],
            ..Default::default()
        };
        let driver = DriverFactory::create(config, api, None).await.unwrap();
        assert_eq!(driver.name(), SAN_DRIVER_NAME);
        assert_eq!(driver.backend_name(), "ontapsan_10.0.0.10");
    }
}
