//! API Module
//!
//! REST surface for volume provisioning over a configured driver.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
