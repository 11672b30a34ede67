//! Error types for the SAN volume provisioner
//!
//! Provides structured error types for size validation, placement,
//! controller calls, volume adoption and configuration.

use crate::controller::api::ApiError;
use std::fmt;
use thiserror::Error;

/// One placement candidate that could not host a new volume
#[derive(Debug, Clone)]
pub struct PlacementFailure {
    /// Aggregate the attempt was made on
    pub aggregate: String,
    /// Why the attempt failed
    pub reason: String,
}

impl fmt::Display for PlacementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.aggregate, self.reason)
    }
}

fn join_failures(failures: &[PlacementFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid volume size: {0}")]
    InvalidSize(String),

    #[error("Invalid snapshot reserve: {0}")]
    InvalidReserve(String),

    #[error("Invalid value for option {name}: {reason}")]
    InvalidOption { name: String, reason: String },

    #[error("Unsupported filesystem type {fstype} for volume {volume}")]
    UnsupportedFilesystem { volume: String, fstype: String },

    #[error("Requested volume size ({requested} bytes) is too small; the minimum volume size is {minimum} bytes")]
    VolumeTooSmall { requested: u64, minimum: u64 },

    #[error("Requested size {requested} exceeds the size limit {limit}")]
    LimitExceeded { requested: u64, limit: u64 },

    #[error("Requested size {requested} is less than existing volume size {current}")]
    ShrinkNotSupported { requested: u64, current: u64 },

    #[error("Requested size {requested} is larger than the LUN's maximum capacity {maximum}")]
    ExceedsDeviceCapacity { requested: u64, maximum: u64 },

    #[error("Aggregate {aggregate} limit check failed: {reason}")]
    AggregateLimit { aggregate: String, reason: String },

    // =========================================================================
    // Volume Errors
    // =========================================================================
    #[error("Volume {0} not found")]
    VolumeNotFound(String),

    #[error("Volume {0} already exists")]
    VolumeExists(String),

    #[error("Snapshot {snapshot} does not exist in volume {volume}")]
    SnapshotNotFound { volume: String, snapshot: String },

    #[error("Could not import volume {volume}: {reason}")]
    ImportValidation { volume: String, reason: String },

    #[error("Backend cannot satisfy create request for volume {volume}: {}", join_failures(.failures))]
    BackendIneligible {
        volume: String,
        failures: Vec<PlacementFailure>,
        pools: Vec<String>,
    },

    // =========================================================================
    // Controller Errors
    // =========================================================================
    #[error("Controller operation {operation} failed on {target}: {source}")]
    RemoteOperationFailed {
        operation: String,
        target: String,
        #[source]
        source: ApiError,
    },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, no remote mutation was attempted
    Validation,
    /// The named volume does not exist
    NotFound,
    /// A remote call or mutation failed
    RemoteOperationFailed,
    /// Every placement candidate failed; try another backend
    AggregatedPlacementFailure,
    /// Import preconditions unmet
    AdoptionValidationFailed,
    /// Driver configuration problem
    Configuration,
    /// Anything else
    Internal,
}

impl Error {
    /// Wrap a controller error with the operation and object it concerned
    pub fn remote(operation: impl Into<String>, target: impl Into<String>, source: ApiError) -> Self {
        Error::RemoteOperationFailed {
            operation: operation.into(),
            target: target.into(),
            source,
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidSize(_)
            | Error::InvalidReserve(_)
            | Error::InvalidOption { .. }
            | Error::UnsupportedFilesystem { .. }
            | Error::VolumeTooSmall { .. }
            | Error::LimitExceeded { .. }
            | Error::ShrinkNotSupported { .. }
            | Error::ExceedsDeviceCapacity { .. }
            | Error::AggregateLimit { .. }
            | Error::VolumeExists(_) => ErrorKind::Validation,

            Error::VolumeNotFound(_) | Error::SnapshotNotFound { .. } => ErrorKind::NotFound,

            Error::RemoteOperationFailed { .. } => ErrorKind::RemoteOperationFailed,

            Error::BackendIneligible { .. } => ErrorKind::AggregatedPlacementFailure,

            Error::ImportValidation { .. } => ErrorKind::AdoptionValidationFailed,

            Error::Configuration(_) | Error::Yaml(_) | Error::JsonParse(_) => {
                ErrorKind::Configuration
            }

            Error::Internal(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Check if repeating the same call unchanged could succeed
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::RemoteOperationFailed | ErrorKind::Internal => true,
            ErrorKind::Validation
            | ErrorKind::NotFound
            | ErrorKind::AggregatedPlacementFailure
            | ErrorKind::AdoptionValidationFailed
            | ErrorKind::Configuration => false,
        }
    }

    /// Check if this error was raised before any remote mutation
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
