//! Storage controller access
//!
//! - `api`: response model and object types exchanged with the controller
//! - `memory`: in-memory controller for tests and simulation

pub mod api;
pub mod memory;

pub use api::{extract, ApiError, ApiResponse, ApiStatus, AttemptResult, Feature};
pub use memory::{SimulatedConfig, SimulatedController};
