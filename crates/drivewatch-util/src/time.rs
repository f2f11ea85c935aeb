//! Time utilities for drivewatch
//!
//! All persisted and transmitted timestamps are UTC. Monotonic time is used
//! only by the scheduler, which must not jump when the wall clock is corrected
//! (vehicle clocks are frequently adjusted by GPS or NTP after boot).
//!
//! # Mock Time for Development
//!
//! In debug builds, the `DRIVEWATCH_MOCK_TIME` environment variable can be set
//! to override the wall clock. This is useful for exercising the driving-time
//! limit without waiting eight hours.
//!
//! Format: `YYYY-MM-DD HH:MM:SS`, interpreted as UTC (e.g., `2025-12-25 14:30:00`)

use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "DRIVEWATCH_MOCK_TIME";

/// Format accepted by [`MOCK_TIME_ENV_VAR`]
pub const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Offset between mock time and real time, fixed at first use so that mock
/// time keeps advancing at the real rate.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Utc::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match parse_mock_time(&mock_time_str) {
                    Some(mock_dt) => {
                        let offset = mock_dt.signed_duration_since(chrono::Utc::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    None => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = MOCK_TIME_FORMAT,
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Parse a mock time string as a UTC timestamp
pub fn parse_mock_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, MOCK_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current UTC time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> DateTime<Utc> {
    let real_now = chrono::Utc::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Convert a signed chrono duration into fractional hours
pub fn as_hours(d: chrono::Duration) -> f64 {
    d.num_seconds() as f64 / 3600.0
}

/// Represents a point in monotonic time for scheduling.
/// This is immune to wall-clock changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicInstant(Instant);

impl MonotonicInstant {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Duration since `earlier`, zero if `earlier` is actually later
    pub fn duration_since(&self, earlier: MonotonicInstant) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

impl std::ops::Add<Duration> for MonotonicInstant {
    type Output = MonotonicInstant;

    fn add(self, rhs: Duration) -> Self::Output {
        MonotonicInstant(self.0 + rhs)
    }
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(9 * 3600 + 61)), "9h 1m 1s");
    }

    #[test]
    fn test_monotonic_instant() {
        let t1 = MonotonicInstant::now();
        let t2 = t1 + Duration::from_secs(10);

        assert!(t2 > t1);
        assert_eq!(t2.duration_since(t1), Duration::from_secs(10));
        // Saturates rather than panicking
        assert_eq!(t1.duration_since(t2), Duration::ZERO);
    }

    #[test]
    fn test_as_hours() {
        assert_eq!(as_hours(chrono::Duration::hours(9)), 9.0);
        assert_eq!(as_hours(chrono::Duration::minutes(90)), 1.5);
    }

    #[test]
    fn test_parse_mock_time() {
        let parsed = parse_mock_time("2025-12-25 14:30:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-12-25T14:30:00+00:00");

        for invalid in ["2025-12-25", "14:30:00", "2025-12-25T14:30:00", "", "not a date"] {
            assert!(parse_mock_time(invalid).is_none(), "'{}' should not parse", invalid);
        }
    }

    #[test]
    fn test_now_returns_time() {
        let t = now();
        assert!(t.timestamp() > 0);
    }
}
