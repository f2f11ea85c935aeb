//! Configuration validation

use crate::schema::RawConfig;
use thiserror::Error;

/// Upper bound for every `*_hours` setting (ten years)
pub const MAX_HOURS: u64 = 10 * 365 * 24;

/// Upper bound for every `*_seconds` setting (one week)
pub const MAX_INTERVAL_SECONDS: u64 = 7 * 24 * 3600;

/// Validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("[{section}] {field}: {message}")]
    InvalidField {
        section: &'static str,
        field: &'static str,
        message: String,
    },

    #[error("Invalid URL '{value}': {message}")]
    InvalidUrl { value: String, message: String },

    #[error("Telemetry retention ({telemetry}h) is shorter than event media retention ({media}h)")]
    RetentionOrder { telemetry: u64, media: u64 },
}

impl ValidationError {
    fn field(section: &'static str, field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            section,
            field,
            message: message.into(),
        }
    }
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let agent = &config.agent;
    for (field, value) in [
        ("hardware_id", &agent.hardware_id),
        ("vehicle_plate", &agent.vehicle_plate),
        ("firmware_version", &agent.firmware_version),
    ] {
        if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
            errors.push(ValidationError::field("agent", field, "cannot be empty"));
        }
    }

    if let Some(url) = &config.cloud.base_url
        && let Err(message) = validate_base_url(url)
    {
        errors.push(ValidationError::InvalidUrl {
            value: url.clone(),
            message,
        });
    }
    check_seconds(&mut errors, "cloud", "timeout_seconds", config.cloud.timeout_seconds);

    if let Some(hours) = config.session.max_driving_hours
        && !(hours.is_finite() && hours > 0.0 && hours <= MAX_HOURS as f64)
    {
        errors.push(ValidationError::field(
            "session",
            "max_driving_hours",
            format!(
                "must be a positive number of hours up to {}, got {}",
                MAX_HOURS, hours
            ),
        ));
    }
    check_hours(
        &mut errors,
        "session",
        "driver_max_age_hours",
        config.session.driver_max_age_hours,
    );
    check_seconds(
        &mut errors,
        "session",
        "check_interval_seconds",
        config.session.check_interval_seconds,
    );

    let sync = &config.sync;
    for (field, value) in [
        ("event_interval_seconds", sync.event_interval_seconds),
        ("telemetry_interval_seconds", sync.telemetry_interval_seconds),
        ("session_interval_seconds", sync.session_interval_seconds),
        ("media_interval_seconds", sync.media_interval_seconds),
    ] {
        check_seconds(&mut errors, "sync", field, value);
    }
    for (field, value) in [
        ("event_batch_size", sync.event_batch_size),
        ("telemetry_batch_size", sync.telemetry_batch_size),
        ("media_batch_size", sync.media_batch_size),
    ] {
        check_positive(&mut errors, "sync", field, value.map(|v| v as u64));
    }

    check_seconds(
        &mut errors,
        "telemetry",
        "collect_interval_seconds",
        config.telemetry.collect_interval_seconds,
    );

    let retention = &config.retention;
    check_seconds(&mut errors, "retention", "interval_seconds", retention.interval_seconds);
    check_hours(
        &mut errors,
        "retention",
        "event_media_max_age_hours",
        retention.event_media_max_age_hours,
    );
    check_hours(
        &mut errors,
        "retention",
        "telemetry_max_age_hours",
        retention.telemetry_max_age_hours,
    );
    if let (Some(media), Some(telemetry)) = (
        retention.event_media_max_age_hours,
        retention.telemetry_max_age_hours,
    ) && telemetry < media
    {
        errors.push(ValidationError::RetentionOrder { telemetry, media });
    }

    errors
}

fn check_positive(
    errors: &mut Vec<ValidationError>,
    section: &'static str,
    field: &'static str,
    value: Option<u64>,
) {
    if value == Some(0) {
        errors.push(ValidationError::field(section, field, "must be greater than zero"));
    }
}

fn check_bounded(
    errors: &mut Vec<ValidationError>,
    section: &'static str,
    field: &'static str,
    value: Option<u64>,
    max: u64,
) {
    match value {
        Some(0) => check_positive(errors, section, field, value),
        Some(v) if v > max => errors.push(ValidationError::field(
            section,
            field,
            format!("must be at most {}, got {}", max, v),
        )),
        _ => {}
    }
}

fn check_seconds(
    errors: &mut Vec<ValidationError>,
    section: &'static str,
    field: &'static str,
    value: Option<u64>,
) {
    check_bounded(errors, section, field, value, MAX_INTERVAL_SECONDS);
}

fn check_hours(
    errors: &mut Vec<ValidationError>,
    section: &'static str,
    field: &'static str,
    value: Option<u64>,
) {
    check_bounded(errors, section, field, value, MAX_HOURS);
}

/// Accept `http://` or `https://` URLs with a host part
pub fn validate_base_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| "must start with http:// or https://".to_string())?;

    if rest.trim_end_matches('/').is_empty() {
        return Err("missing host".into());
    }
    if url.chars().any(char::is_whitespace) {
        return Err("must not contain whitespace".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_config() -> RawConfig {
        toml::from_str("config_version = 1").unwrap()
    }

    #[test]
    fn test_base_url() {
        assert!(validate_base_url("http://localhost:5000/api/v1").is_ok());
        assert!(validate_base_url("https://fleet.example.com").is_ok());

        assert!(validate_base_url("ftp://fleet.example.com").is_err());
        assert!(validate_base_url("http://").is_err());
        assert!(validate_base_url("http://exa mple.com").is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&empty_config()).is_empty());
    }

    #[test]
    fn test_all_errors_collected() {
        let mut config = empty_config();
        config.agent.hardware_id = Some("  ".into());
        config.session.max_driving_hours = Some(-1.0);
        config.sync.event_batch_size = Some(0);
        config.cloud.timeout_seconds = Some(0);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::InvalidField { field: "event_batch_size", .. }
        )));
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        let mut config = empty_config();
        config.session.max_driving_hours = Some(1e300);
        config.retention.telemetry_max_age_hours = Some(18_446_744_073_709_551);
        config.retention.event_media_max_age_hours = Some(MAX_HOURS);
        config.sync.event_interval_seconds = Some(u64::MAX);

        let errors = validate_config(&config);
        let fields: Vec<_> = errors
            .iter()
            .filter_map(|e| match e {
                ValidationError::InvalidField { field, .. } => Some(*field),
                _ => None,
            })
            .collect();
        assert_eq!(
            fields,
            vec![
                "max_driving_hours",
                "event_interval_seconds",
                "telemetry_max_age_hours"
            ]
        );
    }

    #[test]
    fn test_retention_order() {
        let mut config = empty_config();
        config.retention.event_media_max_age_hours = Some(72);
        config.retention.telemetry_max_age_hours = Some(24);

        let errors = validate_config(&config);
        assert_eq!(
            errors,
            vec![ValidationError::RetentionOrder {
                telemetry: 24,
                media: 72
            }]
        );
    }
}
