//! Mapping Coordinator
//!
//! Binds LUNs to initiator groups and assembles the access information a
//! host needs to attach them. Only controller-side identity is touched;
//! host mount state is out of reach here.

use super::SanSettingsRef;
use crate::config::DriverContext;
use crate::controller::api::{codes, extract};
use crate::domain::ports::ControllerApiRef;
use crate::domain::types::{
    lun_path, AccessInfo, HostInfo, VolumeRequest, LUN_ATTRIBUTE_FSTYPE,
};
use crate::error::{Error, Result};
use tracing::{debug, info};

/// OS type of initiator groups the driver creates
const IGROUP_OS_TYPE: &str = "linux";

pub struct MappingCoordinator {
    api: ControllerApiRef,
    settings: SanSettingsRef,
    /// iSCSI data LIFs, first one preferred
    portals: Vec<String>,
}

impl MappingCoordinator {
    pub fn new(api: ControllerApiRef, settings: SanSettingsRef, portals: Vec<String>) -> Self {
        Self {
            api,
            settings,
            portals,
        }
    }

    /// Create an initiator group unless it already exists
    pub async fn ensure_igroup(&self, igroup: &str) -> Result<()> {
        match extract(self.api.igroup_create(igroup, IGROUP_OS_TYPE).await) {
            Ok(()) => {
                info!(igroup = %igroup, "Created initiator group");
                Ok(())
            }
            Err(e) if e.has_code(codes::EVDISK_ERROR_INITGROUP_EXISTS) => {
                debug!(igroup = %igroup, "Initiator group already exists");
                Ok(())
            }
            Err(e) => Err(Error::remote("igroup-create", igroup, e)),
        }
    }

    async fn add_initiator(&self, igroup: &str, initiator: &str) -> Result<()> {
        match extract(self.api.igroup_add(igroup, initiator).await) {
            Ok(()) => Ok(()),
            Err(e) if e.has_code(codes::EVDISK_ERROR_INITGROUP_HAS_NODE) => Ok(()),
            Err(e) => Err(Error::remote("igroup-add", igroup, e)),
        }
    }

    /// Map `path` to `igroup` unless already mapped, returning the LUN id.
    ///
    /// Mappings to other groups are removed, except for unmanaged imports
    /// whose mappings belong to someone else.
    pub async fn map_if_not_mapped(
        &self,
        igroup: &str,
        path: &str,
        import_not_managed: bool,
    ) -> Result<u32> {
        let mappings = extract(self.api.lun_map_list_info(path).await)
            .map_err(|e| Error::remote("lun-map-list-info", path, e))?;

        let mut existing = None;
        for mapping in &mappings {
            if mapping.igroup == igroup {
                existing = Some(mapping.lun_id);
            } else if !import_not_managed {
                debug!(lun = %path, igroup = %mapping.igroup, "Unmapping LUN from foreign initiator group");
                extract(self.api.lun_unmap(&mapping.igroup, path).await)
                    .map_err(|e| Error::remote("lun-unmap", path, e))?;
            }
        }
        if let Some(lun_id) = existing {
            debug!(lun = %path, igroup = %igroup, lun_id = lun_id, "LUN already mapped");
            return Ok(lun_id);
        }

        match extract(self.api.lun_map(igroup, path, None).await) {
            Ok(lun_id) => {
                debug!(lun = %path, igroup = %igroup, lun_id = lun_id, "Mapped LUN");
                Ok(lun_id)
            }
            Err(e) if e.has_code(codes::EVDISK_ERROR_INITGROUP_HAS_VDISK) => {
                // Mapped concurrently; report the id that won
                extract(self.api.lun_map_list_info(path).await)
                    .map_err(|e| Error::remote("lun-map-list-info", path, e))?
                    .into_iter()
                    .find(|m| m.igroup == igroup)
                    .map(|m| m.lun_id)
                    .ok_or_else(|| Error::remote("lun-map", path, e))
            }
            Err(e) => Err(Error::remote("lun-map", path, e)),
        }
    }

    /// Access information for a mapped LUN
    pub async fn access_info(&self, name: &str, lun_id: u32, igroup: &str) -> Result<AccessInfo> {
        let path = lun_path(name);
        let target_iqn = extract(self.api.iscsi_node_name().await)
            .map_err(|e| Error::remote("iscsi-node-get-name", name, e))?;
        let filesystem = extract(self.api.lun_get_attribute(&path, LUN_ATTRIBUTE_FSTYPE).await)
            .map_err(|e| Error::remote("lun-get-attribute", &path, e))?
            .unwrap_or_default();
        let lun_serial = extract(self.api.lun_get_all(&path).await)
            .map_err(|e| Error::remote("lun-get-serial-number", &path, e))?
            .into_iter()
            .next()
            .map(|lun| lun.serial)
            .ok_or_else(|| Error::VolumeNotFound(path.clone()))?;

        let target_portal = self
            .settings
            .data_lif
            .clone()
            .or_else(|| self.portals.first().cloned())
            .unwrap_or_default();
        let portals = self
            .portals
            .iter()
            .filter(|p| **p != target_portal)
            .cloned()
            .collect();

        Ok(AccessInfo {
            target_iqn,
            target_portal,
            portals,
            lun_number: lun_id,
            igroup: igroup.to_string(),
            filesystem,
            lun_serial,
        })
    }

    /// Grant `host` access to a volume
    pub async fn publish(&self, name: &str, host: &HostInfo) -> Result<AccessInfo> {
        let igroup = self.settings.igroup_name.as_str();
        let path = lun_path(name);

        self.ensure_igroup(igroup).await?;
        for iqn in &host.iqns {
            self.add_initiator(igroup, iqn).await?;
        }
        let lun_id = self.map_if_not_mapped(igroup, &path, false).await?;

        info!(volume = %name, host = %host.name, lun_id = lun_id, "Published volume");
        self.access_info(name, lun_id, igroup).await
    }

    /// Post-create mapping to the driver's initiator group
    pub async fn create_followup(&self, request: &VolumeRequest) -> Result<Option<AccessInfo>> {
        if self.settings.driver_context == DriverContext::Docker {
            debug!("No follow-up create actions for Docker");
            return Ok(None);
        }

        let igroup = self.settings.igroup_name.as_str();
        let path = lun_path(&request.internal_name);
        let lun_id = self
            .map_if_not_mapped(igroup, &path, request.import_not_managed)
            .await?;
        self.access_info(&request.internal_name, lun_id, igroup)
            .await
            .map(Some)
    }
}
