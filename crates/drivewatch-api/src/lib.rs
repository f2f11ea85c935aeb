//! Data types for drivewatch
//!
//! This crate defines the model shared between the agent crates:
//! - Drivers, vehicles and device configuration
//! - Sessions, journal events, alerts and telemetry
//! - JSON payloads exchanged with the central service

mod types;
mod wire;

pub use types::*;
pub use wire::*;

/// Version of the central-service payload format
pub const WIRE_VERSION: u32 = 1;
