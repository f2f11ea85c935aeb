//! Shared utilities for drivewatch
//!
//! This crate provides:
//! - ID types (DriverId, VehicleId, SessionId, EventId, ...)
//! - Time utilities (UTC wall clock with mock support, monotonic time)
//! - The agent error taxonomy
//! - Interval scheduling for the control loop
//! - Default paths for config, data, and log directories

mod error;
mod ids;
mod paths;
mod schedule;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use schedule::*;
pub use time::*;
