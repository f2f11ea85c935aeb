//! Collaborator interfaces for drivewatchd
//!
//! This crate defines the capability-based interface between the agent core
//! and its external collaborators: alert rendering, the central service,
//! media upload and metrics collection. It contains no platform code itself.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
