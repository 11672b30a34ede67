//! Inventory Streamer
//!
//! Lists every managed volume as a lazy stream of records, correlating
//! LUNs with their volumes from two bulk listings.

use super::SanSettingsRef;
use crate::controller::api::{extract, FlexvolAttributes, LunInfo};
use crate::domain::ports::ControllerApiRef;
use crate::domain::types::{AccessMode, Protocol, VolumeRecord};
use crate::error::{Error, Result};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Record for a LUN and its containing volume; the size is the LUN size
pub fn volume_record(prefix: &str, lun: &LunInfo, volume: &FlexvolAttributes) -> VolumeRecord {
    let internal_name = volume.name.clone();
    let name = internal_name
        .strip_prefix(prefix)
        .unwrap_or(&internal_name)
        .to_string();
    VolumeRecord {
        name,
        internal_name,
        size_bytes: lun.size_bytes.unwrap_or(0),
        protocol: Protocol::Block,
        snapshot_policy: volume.snapshot_policy.clone(),
        access_mode: AccessMode::ReadWriteOnce,
        pool: volume.aggregate.clone(),
    }
}

/// Glob matching the canonical LUN of every prefixed volume
pub fn lun_path_pattern(prefix: &str) -> String {
    format!("/vol/{}*/lun0", prefix)
}

pub struct InventoryStreamer {
    api: ControllerApiRef,
    settings: SanSettingsRef,
}

impl InventoryStreamer {
    pub fn new(api: ControllerApiRef, settings: SanSettingsRef) -> Self {
        Self { api, settings }
    }

    /// Stream of all managed volumes.
    ///
    /// Nothing is requested until the stream is first polled. A failed
    /// listing yields that error as the only item.
    pub fn enumerate(&self) -> BoxStream<'static, Result<VolumeRecord>> {
        let api = self.api.clone();
        let prefix = self.settings.storage_prefix.clone();
        let record_prefix = prefix.clone();

        stream::once(async move { fetch(api, prefix).await })
            .flat_map(move |fetched| match fetched {
                Ok((volumes, luns)) => {
                    let prefix = record_prefix.clone();
                    stream::iter(luns.into_iter().filter_map(move |lun| {
                        match volumes.get(&lun.volume) {
                            Some(volume) => Some(Ok(volume_record(&prefix, &lun, volume))),
                            None => {
                                warn!(path = %lun.path, "Flexvol not found for LUN");
                                None
                            }
                        }
                    }))
                    .left_stream()
                }
                Err(e) => stream::iter(std::iter::once(Err(e))).right_stream(),
            })
            .boxed()
    }
}

async fn fetch(
    api: ControllerApiRef,
    prefix: String,
) -> Result<(HashMap<String, FlexvolAttributes>, Vec<LunInfo>)> {
    let volumes = extract(api.volume_get_all(&prefix).await)
        .map_err(|e| Error::remote("volume-get-iter", &prefix, e))?;

    let pattern = lun_path_pattern(&prefix);
    let luns = extract(api.lun_get_all(&pattern).await)
        .map_err(|e| Error::remote("lun-get-iter", &pattern, e))?;

    debug!(
        volumes = volumes.len(),
        luns = luns.len(),
        "Listed volumes for inventory"
    );

    let volumes = volumes
        .into_iter()
        .map(|volume| (volume.name.clone(), volume))
        .collect();
    Ok((volumes, luns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::api::ApiError;
    use crate::controller::memory::{SimulatedConfig, SimulatedController};
    use crate::san::fixtures::{self, GI};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    async fn populated() -> Arc<SimulatedController> {
        let controller = fixtures::controller(SimulatedConfig::default());
        fixtures::provision(&controller, "pvc1", "1Gi").await;
        fixtures::provision(&controller, "pvc2", "2Gi").await;
        controller
    }

    #[tokio::test]
    async fn test_enumerate_correlates_luns_and_volumes() {
        let controller = populated().await;
        let streamer = InventoryStreamer::new(controller.clone(), fixtures::settings());

        let records: Vec<_> = streamer.enumerate().collect().await;
        let records: Vec<VolumeRecord> = records.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "pvc1");
        assert_eq!(records[0].internal_name, "trident_pvc1");
        assert_eq!(records[0].size_bytes, GI);
        assert_eq!(records[0].protocol, Protocol::Block);
        assert_eq!(records[0].access_mode, AccessMode::ReadWriteOnce);
        assert_eq!(records[1].size_bytes, 2 * GI);
    }

    #[tokio::test]
    async fn test_enumerate_is_lazy() {
        let controller = populated().await;
        controller.reset_calls();
        let streamer = InventoryStreamer::new(controller.clone(), fixtures::settings());

        let mut stream = streamer.enumerate();
        assert!(controller.calls().is_empty());

        assert!(stream.next().await.is_some());
        assert_eq!(controller.call_count("volume_get_all"), 1);
        assert_eq!(controller.call_count("lun_get_all"), 1);
    }

    #[tokio::test]
    async fn test_orphan_lun_skipped() {
        let controller = populated().await;
        controller.insert_lun(LunInfo {
            path: "/vol/trident_orphan/lun0".into(),
            volume: "trident_orphan".into(),
            size_bytes: Some(GI),
            online: Some(true),
            mapped: Some(false),
            os_type: "linux".into(),
            serial: "x".into(),
        });
        let streamer = InventoryStreamer::new(controller.clone(), fixtures::settings());

        let records: Vec<_> = streamer.enumerate().collect().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_listing_failure_is_sole_item() {
        let controller = populated().await;
        controller.fail_next("lun_get_all", None, ApiError::Transport("reset".into()));
        let streamer = InventoryStreamer::new(controller.clone(), fixtures::settings());

        let records: Vec<_> = streamer.enumerate().collect().await;
        assert_eq!(records.len(), 1);
        assert_matches!(records[0], Err(Error::RemoteOperationFailed { .. }));
    }

    #[test]
    fn test_lun_path_pattern() {
        assert_eq!(lun_path_pattern("trident_"), "/vol/trident_*/lun0");
    }
}
