//! Validated agent configuration

use crate::schema::{
    RawAgentConfig, RawCloudConfig, RawConfig, RawRetentionConfig, RawSessionConfig,
    RawSyncConfig,
};
use crate::validation::{MAX_HOURS, MAX_INTERVAL_SECONDS};
use drivewatch_util::{Subsystem, data_dir_without_env};
use std::path::PathBuf;
use std::time::Duration;

/// Continuous driving limit when none is configured
pub const DEFAULT_MAX_DRIVING_HOURS: f64 = 8.0;

/// Central service used when none is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api/v1";

/// Firmware version reported when none is configured
pub const DEFAULT_FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

const HOUR: u64 = 3600;

/// Validated configuration ready for use by the daemon
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub agent: AgentSettings,
    pub cloud: CloudConfig,
    pub session: SessionPolicy,
    pub sync: SyncPolicy,
    /// Interval between metric samples
    pub telemetry_interval: Duration,
    pub retention: RetentionPolicy,
}

impl AgentConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            agent: AgentSettings::from_raw(raw.agent),
            cloud: CloudConfig::from_raw(raw.cloud),
            session: SessionPolicy::from_raw(raw.session),
            sync: SyncPolicy::from_raw(raw.sync),
            telemetry_interval: secs(raw.telemetry.collect_interval_seconds, 300),
            retention: RetentionPolicy::from_raw(raw.retention),
        }
    }

    /// Interval of every periodic pass run by the control loop
    pub fn interval(&self, subsystem: Subsystem) -> Duration {
        match subsystem {
            Subsystem::SessionCheck => self.session.check_interval,
            Subsystem::TelemetryCollect => self.telemetry_interval,
            Subsystem::EventPush => self.sync.event_interval,
            Subsystem::TelemetryPush => self.sync.telemetry_interval,
            Subsystem::SessionPush => self.sync.session_interval,
            Subsystem::MediaPush => self.sync.media_interval,
            Subsystem::Retention => self.retention.interval,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_raw(RawConfig {
            config_version: crate::CURRENT_CONFIG_VERSION,
            agent: Default::default(),
            cloud: Default::default(),
            session: Default::default(),
            sync: Default::default(),
            telemetry: Default::default(),
            retention: Default::default(),
        })
    }
}

/// Device identity and directories
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub hardware_id: Option<String>,
    pub vehicle_plate: Option<String>,
    pub firmware_version: String,
    pub data_dir: PathBuf,
    pub media_dir: PathBuf,
    pub spool_dir: PathBuf,
}

impl AgentSettings {
    fn from_raw(raw: RawAgentConfig) -> Self {
        let data_dir = raw.data_dir.unwrap_or_else(data_dir_without_env);
        Self {
            hardware_id: raw.hardware_id.map(|s| s.trim().to_string()),
            vehicle_plate: raw.vehicle_plate.map(|s| s.trim().to_string()),
            firmware_version: raw
                .firmware_version
                .unwrap_or_else(|| DEFAULT_FIRMWARE_VERSION.to_string()),
            media_dir: raw.media_dir.unwrap_or_else(|| data_dir.join("media")),
            spool_dir: raw.spool_dir.unwrap_or_else(|| data_dir.join("spool")),
            data_dir,
        }
    }
}

/// Central service connection
#[derive(Debug, Clone, PartialEq)]
pub struct CloudConfig {
    /// Base URL without trailing slash
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

impl CloudConfig {
    fn from_raw(raw: RawCloudConfig) -> Self {
        Self {
            base_url: raw
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            auth_token: raw.auth_token.filter(|t| !t.is_empty()),
            timeout: secs(raw.timeout_seconds, 10),
        }
    }
}

/// Session policy
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPolicy {
    pub max_driving: Duration,
    pub driver_max_age: Duration,
    pub check_interval: Duration,
}

impl SessionPolicy {
    fn from_raw(raw: RawSessionConfig) -> Self {
        let hours = raw.max_driving_hours.unwrap_or(DEFAULT_MAX_DRIVING_HOURS);
        Self {
            max_driving: Duration::try_from_secs_f64(hours * HOUR as f64)
                .unwrap_or(Duration::from_secs(MAX_HOURS * HOUR)),
            driver_max_age: hours_of(raw.driver_max_age_hours, 24),
            check_interval: secs(raw.check_interval_seconds, 60),
        }
    }

    /// Driving limit in whole or fractional hours, as reported in event metadata
    pub fn max_driving_hours(&self) -> f64 {
        self.max_driving.as_secs_f64() / HOUR as f64
    }
}

/// Push intervals and batch sizes
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPolicy {
    pub event_interval: Duration,
    pub event_batch_size: usize,
    pub telemetry_interval: Duration,
    pub telemetry_batch_size: usize,
    pub session_interval: Duration,
    pub media_interval: Duration,
    pub media_batch_size: usize,
}

impl SyncPolicy {
    fn from_raw(raw: RawSyncConfig) -> Self {
        Self {
            event_interval: secs(raw.event_interval_seconds, 30),
            event_batch_size: raw.event_batch_size.unwrap_or(100),
            telemetry_interval: secs(raw.telemetry_interval_seconds, 300),
            telemetry_batch_size: raw.telemetry_batch_size.unwrap_or(50),
            session_interval: secs(raw.session_interval_seconds, 60),
            media_interval: secs(raw.media_interval_seconds, 120),
            media_batch_size: raw.media_batch_size.unwrap_or(20),
        }
    }
}

/// Local space reclamation
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    pub interval: Duration,
    pub event_media_max_age: Duration,
    pub telemetry_max_age: Duration,
}

impl RetentionPolicy {
    fn from_raw(raw: RawRetentionConfig) -> Self {
        Self {
            interval: secs(raw.interval_seconds, HOUR),
            event_media_max_age: hours_of(raw.event_media_max_age_hours, 72),
            telemetry_max_age: hours_of(raw.telemetry_max_age_hours, 7 * 24),
        }
    }
}

fn secs(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default).min(MAX_INTERVAL_SECONDS))
}

fn hours_of(value: Option<u64>, default: u64) -> Duration {
    let hours = value.unwrap_or(default).min(MAX_HOURS);
    Duration::from_secs(hours.checked_mul(HOUR).unwrap_or(MAX_HOURS * HOUR))
}
