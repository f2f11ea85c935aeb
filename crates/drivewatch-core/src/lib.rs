//! Core logic for drivewatchd
//!
//! This crate holds everything that decides what the agent records:
//! - Session state machine driven by badge scans (one active session per vehicle)
//! - Driver/vehicle cache with conditional refresh from the central service
//! - Append-only event and telemetry journal
//! - Continuous-driving guard
//! - Local retention of synced media and telemetry

mod engine;
mod entity;
mod events;
mod journal;
mod retention;
mod session;

pub use engine::*;
pub use entity::*;
pub use events::*;
pub use journal::*;
pub use retention::*;
pub use session::*;
