//! Configuration parsing and validation for drivewatchd
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Device identity, cloud endpoint and local directories
//! - Session, sync, telemetry and retention policies
//! - Validation with clear error messages

mod policy;
mod schema;
mod validation;

pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<AgentConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Load configuration, falling back to defaults when the file does not exist
pub fn load_config_or_default(path: impl AsRef<Path>) -> ConfigResult<AgentConfig> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(AgentConfig::default());
    }
    load_config(path)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<AgentConfig> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(AgentConfig::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_minimal_config() {
        let config = parse_config("config_version = 1").unwrap();

        assert_eq!(config.session.max_driving, Duration::from_secs(8 * 3600));
        assert_eq!(config.sync.event_interval, Duration::from_secs(30));
        assert_eq!(config.telemetry_interval, Duration::from_secs(300));
        assert_eq!(config.cloud.timeout, Duration::from_secs(10));
        assert_eq!(config.cloud.base_url, DEFAULT_BASE_URL);
        assert!(config.agent.hardware_id.is_none());
    }

    #[test]
    fn parse_full_config() {
        let config = r#"
            config_version = 1

            [agent]
            hardware_id = "jetson-0042"
            vehicle_plate = "ABC-123"
            data_dir = "/var/lib/drivewatch"

            [cloud]
            base_url = "https://fleet.example.com/api/v1/"
            timeout_seconds = 5

            [session]
            max_driving_hours = 4.5

            [sync]
            event_batch_size = 10

            [retention]
            event_media_max_age_hours = 24
        "#;

        let config = parse_config(config).unwrap();
        assert_eq!(config.agent.hardware_id.as_deref(), Some("jetson-0042"));
        assert_eq!(
            config.agent.media_dir,
            std::path::PathBuf::from("/var/lib/drivewatch/media")
        );
        assert_eq!(config.cloud.base_url, "https://fleet.example.com/api/v1");
        assert_eq!(config.cloud.timeout, Duration::from_secs(5));
        assert_eq!(config.session.max_driving_hours(), 4.5);
        assert_eq!(config.sync.event_batch_size, 10);
        assert_eq!(
            config.retention.event_media_max_age,
            Duration::from_secs(24 * 3600)
        );
    }

    #[test]
    fn oversized_durations_are_config_errors() {
        for body in [
            "[session]\nmax_driving_hours = 1e300",
            "[retention]\ntelemetry_max_age_hours = 18446744073709551",
            "[sync]\nsession_interval_seconds = 604801",
        ] {
            let result = parse_config(&format!("config_version = 1\n{}", body));
            assert!(
                matches!(result, Err(ConfigError::ValidationFailed { .. })),
                "{} should fail validation",
                body
            );
        }
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_values() {
        let config = r#"
            config_version = 1

            [cloud]
            base_url = "localhost"

            [sync]
            media_interval_seconds = 0
        "#;

        match parse_config(config) {
            Err(ConfigError::ValidationFailed { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "config_version = 1\n[agent]\nvehicle_plate = \"XYZ-9\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.agent.vehicle_plate.as_deref(), Some("XYZ-9"));

        let missing = load_config_or_default(dir.path().join("missing.toml")).unwrap();
        assert_eq!(missing, AgentConfig::default());
    }
}
