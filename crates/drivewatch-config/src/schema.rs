//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub agent: RawAgentConfig,

    #[serde(default)]
    pub cloud: RawCloudConfig,

    #[serde(default)]
    pub session: RawSessionConfig,

    #[serde(default)]
    pub sync: RawSyncConfig,

    #[serde(default)]
    pub telemetry: RawTelemetryConfig,

    #[serde(default)]
    pub retention: RawRetentionConfig,
}

/// Device identity and local directories
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAgentConfig {
    /// Stable hardware identifier (generated and persisted when absent)
    pub hardware_id: Option<String>,

    /// Plate used to provision the vehicle on first boot
    pub vehicle_plate: Option<String>,

    /// Firmware version reported in the device configuration
    pub firmware_version: Option<String>,

    /// Directory holding the SQLite database
    pub data_dir: Option<PathBuf>,

    /// Directory where detectors drop snapshots and clips
    pub media_dir: Option<PathBuf>,

    /// Directory media is handed off to for upload
    pub spool_dir: Option<PathBuf>,
}

/// Central service connection
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawCloudConfig {
    pub base_url: Option<String>,

    /// Bearer token; usually supplied through the environment instead
    pub auth_token: Option<String>,

    pub timeout_seconds: Option<u64>,
}

/// Session policy
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSessionConfig {
    /// Continuous driving limit (default: 8)
    pub max_driving_hours: Option<f64>,

    /// Cached driver records older than this are refreshed on scan
    pub driver_max_age_hours: Option<u64>,

    pub check_interval_seconds: Option<u64>,
}

/// Push intervals and batch sizes
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSyncConfig {
    pub event_interval_seconds: Option<u64>,
    pub event_batch_size: Option<usize>,
    pub telemetry_interval_seconds: Option<u64>,
    pub telemetry_batch_size: Option<usize>,
    pub session_interval_seconds: Option<u64>,
    pub media_interval_seconds: Option<u64>,
    pub media_batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawTelemetryConfig {
    pub collect_interval_seconds: Option<u64>,
}

/// Local space reclamation
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRetentionConfig {
    pub interval_seconds: Option<u64>,

    /// Media of fully synced events older than this is deleted
    pub event_media_max_age_hours: Option<u64>,

    /// Synced telemetry rows older than this are deleted
    pub telemetry_max_age_hours: Option<u64>,
}
