//! Domain layer - Core value types and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles.

pub mod ports;
pub mod types;

pub use ports::*;
pub use types::*;
