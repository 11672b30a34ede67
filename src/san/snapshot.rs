//! Volume snapshots

use crate::controller::api::{codes, extract, ApiError, SnapshotInfo};
use crate::domain::ports::ControllerApiRef;
use crate::domain::types::Snapshot;
use crate::error::{Error, Result};
use tracing::info;

pub struct SnapshotManager {
    api: ControllerApiRef,
}

fn to_snapshot(info: SnapshotInfo, size_bytes: u64) -> Snapshot {
    Snapshot {
        name: info.name,
        volume: info.volume,
        created_at: info.created_at,
        size_bytes,
    }
}

impl SnapshotManager {
    pub fn new(api: ControllerApiRef) -> Self {
        Self { api }
    }

    /// Volume size, which is what every snapshot of the volume reports
    async fn volume_size(&self, volume: &str) -> Result<u64> {
        extract(self.api.volume_size(volume).await).map_err(|e| {
            if e.is_volume_not_found() {
                Error::VolumeNotFound(volume.to_string())
            } else {
                Error::remote("volume-size", volume, e)
            }
        })
    }

    async fn snapshot_infos(&self, volume: &str) -> Result<Vec<SnapshotInfo>> {
        extract(self.api.snapshot_list(volume).await)
            .map_err(|e| Error::remote("snapshot-get-iter", volume, e))
    }

    pub async fn create(&self, volume: &str, name: &str) -> Result<Snapshot> {
        let size_bytes = self.volume_size(volume).await?;
        extract(self.api.snapshot_create(volume, name).await)
            .map_err(|e| Error::remote("snapshot-create", volume, e))?;

        let created = self
            .snapshot_infos(volume)
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "could not find snapshot {} after creating it in volume {}",
                    name, volume
                ))
            })?;

        info!(volume = %volume, snapshot = %name, "Created snapshot");
        Ok(to_snapshot(created, size_bytes))
    }

    /// Look up one snapshot; `Ok(None)` when it does not exist
    pub async fn get(&self, volume: &str, name: &str) -> Result<Option<Snapshot>> {
        let size_bytes = self.volume_size(volume).await?;
        Ok(self
            .snapshot_infos(volume)
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .map(|s| to_snapshot(s, size_bytes)))
    }

    pub async fn list(&self, volume: &str) -> Result<Vec<Snapshot>> {
        let size_bytes = self.volume_size(volume).await?;
        Ok(self
            .snapshot_infos(volume)
            .await?
            .into_iter()
            .map(|s| to_snapshot(s, size_bytes))
            .collect())
    }

    pub async fn restore(&self, volume: &str, name: &str) -> Result<()> {
        extract(self.api.snapshot_restore(volume, name).await)
            .map_err(|e| snapshot_error("snapshot-restore-volume", volume, name, e))?;
        info!(volume = %volume, snapshot = %name, "Restored volume from snapshot");
        Ok(())
    }

    pub async fn delete(&self, volume: &str, name: &str) -> Result<()> {
        extract(self.api.snapshot_delete(volume, name).await)
            .map_err(|e| snapshot_error("snapshot-delete", volume, name, e))?;
        info!(volume = %volume, snapshot = %name, "Deleted snapshot");
        Ok(())
    }
}

fn snapshot_error(operation: &str, volume: &str, snapshot: &str, e: ApiError) -> Error {
    if e.has_code(codes::EOBJECTNOTFOUND) {
        Error::SnapshotNotFound {
            volume: volume.to_string(),
            snapshot: snapshot.to_string(),
        }
    } else if e.is_volume_not_found() {
        Error::VolumeNotFound(volume.to_string())
    } else {
        Error::remote(operation, volume, e)
    }
}
