//! SAN Provisioner - Block Volume Provisioning Engine
//!
//! Provisions iSCSI block volumes on a storage controller. Each volume is a
//! flexible volume on an aggregate holding a single LUN; the engine keeps the
//! reported capacity of the pair consistent with what the controller actually
//! allocated.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         REST API (axum)                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                    VolumeDriver (SanDriver)                      │
//! │  ┌─────────────┐ ┌──────────┐ ┌───────────┐ ┌────────────────┐   │
//! │  │ Provisioning│ │  Resize  │ │ Lifecycle │ │    Mapping     │   │
//! │  │   Engine    │ │Coordinator│ │  Manager  │ │  Coordinator   │   │
//! │  └──────┬──────┘ └────┬─────┘ └─────┬─────┘ └───────┬────────┘   │
//! │         └──── Capacity Reconciler ──┘               │            │
//! │                   Inventory Streamer / Snapshots    │            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                  ControllerApi port (async)                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`san`]: The SAN driver and its components
//! - [`controller`]: Controller response model and a simulated controller
//! - [`domain`]: Core domain types and traits
//! - [`api`]: REST API
//! - [`config`]: Driver configuration
//! - [`error`]: Error types and handling

pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod pools;
pub mod san;
pub mod sizing;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use config::{DriverConfig, DriverContext, PoolDefaults, VirtualPoolConfig};

pub use controller::{SimulatedConfig, SimulatedController};

pub use domain::ports::{
    ControllerApi, ControllerApiRef, HostDeviceNotifier, PoolSelector, VolumeDriver,
    VolumeDriverRef,
};

pub use domain::types::{
    AccessInfo, CreateOutcome, DestroyOutcome, HostInfo, ImportOutcome, ResizeOutcome, Snapshot,
    StoragePool, UpdateFlags, VolumeRecord, VolumeRequest,
};

pub use error::{Error, ErrorKind, Result};

pub use metrics::DriverMetrics;

pub use san::{DriverFactory, ReconcileWarning, SanDriver, SanSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
