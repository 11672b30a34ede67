//! Capacity Reconciler
//!
//! The controller may allocate a LUN larger than requested. After a LUN is
//! created or resized its volume is realigned to the LUN's actual size so
//! the LUN stays writable. Failures here are warnings: the LUN operation
//! that triggered the realignment has already succeeded.

use crate::controller::api::extract;
use crate::domain::ports::ControllerApiRef;
use std::fmt;
use tracing::{debug, warn};

/// Non-fatal problem met while realigning a volume to its LUN
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileWarning {
    /// The volume size could not be read before realignment
    SizeUnavailable { volume: String, reason: String },
    /// The realigning volume resize failed
    ResizeFailed {
        volume: String,
        initial_size: u64,
        device_size: u64,
        reason: String,
    },
    /// The volume size could not be read after realignment
    AdjustedSizeUnavailable { volume: String, reason: String },
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileWarning::SizeUnavailable { volume, reason } => {
                write!(f, "failed to get size of volume {}: {}", volume, reason)
            }
            ReconcileWarning::ResizeFailed {
                volume,
                initial_size,
                device_size,
                reason,
            } => write!(
                f,
                "failed to resize volume {} from {} to LUN size {}: {}",
                volume, initial_size, device_size, reason
            ),
            ReconcileWarning::AdjustedSizeUnavailable { volume, reason } => write!(
                f,
                "failed to get size of volume {} after resize: {}",
                volume, reason
            ),
        }
    }
}

/// Result of one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Size to report to the caller
    pub size_bytes: u64,
    pub warnings: Vec<ReconcileWarning>,
}

impl ReconcileOutcome {
    fn clean(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            warnings: Vec::new(),
        }
    }

    fn warned(size_bytes: u64, warning: ReconcileWarning) -> Self {
        warn!("{}", warning);
        Self {
            size_bytes,
            warnings: vec![warning],
        }
    }
}

/// Realigns volume size to LUN size
#[derive(Clone)]
pub struct CapacityReconciler {
    api: ControllerApiRef,
}

impl CapacityReconciler {
    pub fn new(api: ControllerApiRef) -> Self {
        Self { api }
    }

    /// Make `volume` match `device_size` and report the resulting size.
    ///
    /// Reports the re-read volume size on success, the unchanged volume
    /// size when the resize failed, and `device_size` when the volume size
    /// could not be read.
    pub async fn reconcile(&self, volume: &str, device_size: u64) -> ReconcileOutcome {
        let initial_size = match extract(self.api.volume_size(volume).await) {
            Ok(size) => size,
            Err(e) => {
                return ReconcileOutcome::warned(
                    device_size,
                    ReconcileWarning::SizeUnavailable {
                        volume: volume.to_string(),
                        reason: e.to_string(),
                    },
                )
            }
        };

        if initial_size == device_size {
            return ReconcileOutcome::clean(initial_size);
        }

        if let Err(e) = extract(self.api.volume_set_size(volume, device_size).await) {
            return ReconcileOutcome::warned(
                initial_size,
                ReconcileWarning::ResizeFailed {
                    volume: volume.to_string(),
                    initial_size,
                    device_size,
                    reason: e.to_string(),
                },
            );
        }

        match extract(self.api.volume_size(volume).await) {
            Ok(adjusted_size) => {
                debug!(
                    volume = %volume,
                    initial_size = initial_size,
                    adjusted_size = adjusted_size,
                    "Volume resized to match LUN"
                );
                ReconcileOutcome::clean(adjusted_size)
            }
            Err(e) => ReconcileOutcome::warned(
                device_size,
                ReconcileWarning::AdjustedSizeUnavailable {
                    volume: volume.to_string(),
                    reason: e.to_string(),
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::api::{ApiError, FlexvolAttributes};
    use crate::controller::memory::{SimulatedConfig, SimulatedController};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const GI: u64 = 1024 * 1024 * 1024;

    fn seeded(config: SimulatedConfig, size_bytes: u64) -> Arc<SimulatedController> {
        let controller = Arc::new(SimulatedController::new(config));
        controller.insert_volume(FlexvolAttributes {
            name: "vol".into(),
            aggregate: "aggr1".into(),
            volume_type: Some("rw".into()),
            size_bytes,
            space_reserve: "none".into(),
            snapshot_policy: "none".into(),
            snapshot_reserve_percent: Some(0),
            encrypted: false,
            tiering_policy: "none".into(),
            export_policy: "default".into(),
            security_style: "unix".into(),
            unix_permissions: "---rwxrwxrwx".into(),
            has_id_attributes: true,
        });
        controller
    }

    #[tokio::test]
    async fn test_aligned_sizes_need_no_mutation() {
        let controller = seeded(SimulatedConfig::default(), GI);
        let outcome = CapacityReconciler::new(controller.clone())
            .reconcile("vol", GI)
            .await;
        assert_eq!(outcome, ReconcileOutcome::clean(GI));
        assert_eq!(controller.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_volume_grows_to_device_and_rounds() {
        let controller = seeded(
            SimulatedConfig {
                volume_granularity_bytes: 4096,
                ..Default::default()
            },
            GI,
        );
        let device_size = GI + 1000;
        let outcome = CapacityReconciler::new(controller.clone())
            .reconcile("vol", device_size)
            .await;
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.size_bytes, GI + 4096);
        assert!(outcome.size_bytes >= device_size);
        assert_eq!(controller.volume("vol").unwrap().size_bytes, GI + 4096);
    }

    #[tokio::test]
    async fn test_resize_failure_reports_initial_size() {
        let controller = seeded(SimulatedConfig::default(), GI);
        controller.fail_next(
            "volume_set_size",
            None,
            ApiError::Transport("timeout".into()),
        );
        let outcome = CapacityReconciler::new(controller.clone())
            .reconcile("vol", 2 * GI)
            .await;
        assert_eq!(outcome.size_bytes, GI);
        assert_matches!(
            outcome.warnings.as_slice(),
            [ReconcileWarning::ResizeFailed { device_size, .. }] if *device_size == 2 * GI
        );
    }

    #[tokio::test]
    async fn test_unreadable_size_reports_device_size() {
        let controller = seeded(SimulatedConfig::default(), GI);
        controller.fail_next("volume_size", None, ApiError::Transport("timeout".into()));
        let outcome = CapacityReconciler::new(controller.clone())
            .reconcile("vol", 2 * GI)
            .await;
        assert_eq!(outcome.size_bytes, 2 * GI);
        assert_matches!(
            outcome.warnings.as_slice(),
            [ReconcileWarning::SizeUnavailable { .. }]
        );
        assert_eq!(controller.mutation_count(), 0);
    }
}
