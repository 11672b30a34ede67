//! Storage Pools
//!
//! Builds the physical and virtual pools a backend offers from its
//! configuration, and selects candidate aggregates for new volumes.

use crate::config::DriverConfig;
use crate::domain::ports::PoolSelector;
use crate::domain::types::{StoragePool, VolumeRequest};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Pools derived from a driver configuration
#[derive(Debug, Clone)]
pub struct PoolCatalog {
    /// Aggregates in configured order
    physical: Vec<String>,
    /// Pools volumes are requested against
    pools: BTreeMap<String, StoragePool>,
}

impl PoolCatalog {
    /// Build the catalog for a backend.
    ///
    /// Without virtual pools every aggregate becomes a pool of its own,
    /// named after the aggregate. Virtual pools are named
    /// `<backend>_pool_<index>`.
    pub fn from_config(config: &DriverConfig, backend_name: &str) -> Result<Self> {
        if config.aggregates.is_empty() {
            return Err(Error::Configuration("no aggregates configured".into()));
        }

        let defaults = config.defaults.to_attributes();
        let mut pools = BTreeMap::new();

        if config.storage.is_empty() {
            for aggregate in &config.aggregates {
                pools.insert(
                    aggregate.clone(),
                    StoragePool {
                        name: aggregate.clone(),
                        attributes: defaults.clone(),
                        aggregate: Some(aggregate.clone()),
                    },
                );
            }
        } else {
            for (index, virtual_pool) in config.storage.iter().enumerate() {
                let name = format!("{}_pool_{}", backend_name, index);
                let mut attributes = defaults.clone();
                attributes.extend(
                    virtual_pool
                        .defaults
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
                pools.insert(
                    name.clone(),
                    StoragePool {
                        name,
                        attributes,
                        aggregate: virtual_pool.aggregate.clone(),
                    },
                );
            }
        }

        Ok(Self {
            physical: config.aggregates.clone(),
            pools,
        })
    }

    pub fn pool(&self, name: &str) -> Option<&StoragePool> {
        self.pools.get(name)
    }

    pub fn pools(&self) -> impl Iterator<Item = &StoragePool> {
        self.pools.values()
    }
}

impl PoolSelector for PoolCatalog {
    fn pools_for_create(&self, _request: &VolumeRequest, pool: &StoragePool) -> Result<Vec<String>> {
        match &pool.aggregate {
            Some(aggregate) if self.physical.contains(aggregate) => Ok(vec![aggregate.clone()]),
            Some(aggregate) => Err(Error::Configuration(format!(
                "pool {} references unknown aggregate {}",
                pool.name, aggregate
            ))),
            None => Ok(self.physical.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VirtualPoolConfig;
    use crate::domain::types::attributes;

    fn config() -> DriverConfig {
        DriverConfig {
            aggregates: vec!["aggr1".into(), "aggr2".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_physical_pools_only() {
        let catalog = PoolCatalog::from_config(&config(), "backend").unwrap();
        let pool = catalog.pool("aggr2").unwrap();
        assert_eq!(pool.attribute(attributes::FILE_SYSTEM_TYPE), "ext4");

        let request = VolumeRequest::new("pvc", "trident_pvc", "1Gi");
        assert_eq!(catalog.pools_for_create(&request, pool).unwrap(), vec!["aggr2"]);
    }

    #[test]
    fn test_virtual_pool_spans_all_aggregates_in_order() {
        let mut config = config();
        let mut overrides = BTreeMap::new();
        overrides.insert(attributes::SPACE_RESERVE.to_string(), "volume".to_string());
        config.storage = vec![VirtualPoolConfig {
            aggregate: None,
            defaults: overrides,
        }];

        let catalog = PoolCatalog::from_config(&config, "backend").unwrap();
        let pool = catalog.pool("backend_pool_0").unwrap();
        assert_eq!(pool.attribute(attributes::SPACE_RESERVE), "volume");
        assert_eq!(pool.attribute(attributes::SNAPSHOT_POLICY), "none");

        let request = VolumeRequest::new("pvc", "trident_pvc", "1Gi");
        assert_eq!(
            catalog.pools_for_create(&request, pool).unwrap(),
            vec!["aggr1", "aggr2"]
        );
    }

    #[test]
    fn test_unknown_aggregate_rejected() {
        let catalog = PoolCatalog::from_config(&config(), "backend").unwrap();
        let pool = StoragePool {
            name: "rogue".into(),
            attributes: BTreeMap::new(),
            aggregate: Some("aggr9".into()),
        };
        let request = VolumeRequest::new("pvc", "trident_pvc", "1Gi");
        assert!(catalog.pools_for_create(&request, &pool).is_err());
    }
}
