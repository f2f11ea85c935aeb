//! Synchronization with the central service
//!
//! - [`HttpCloudClient`]: REST client implementing [`drivewatch_host_api::CloudClient`]
//! - [`SyncOrchestrator`]: drains the local journal and pulls provisioning data

mod client;
mod orchestrator;

pub use client::*;
pub use orchestrator::*;
