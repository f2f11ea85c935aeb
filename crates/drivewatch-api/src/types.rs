//! Domain model shared by every drivewatch crate

use chrono::{DateTime, Utc};
use drivewatch_util::{AlertId, DriverId, EventId, SessionId, TelemetryId, VehicleId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Display-name prefix of a driver record synthesized before any remote data
pub const PLACEHOLDER_NAME_PREFIX: &str = "Pending driver";

/// Badge-hash prefix of a driver record synthesized before any remote data
pub const PLACEHOLDER_BADGE_PREFIX: &str = "pending-";

/// Assignment kind recorded for sessions opened by a badge scan
pub const ASSIGNMENT_BADGE_SCAN: &str = "badge-scan";

/// Locally cached driver record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub badge_hash: String,
    pub display_name: String,
    pub active: bool,
    /// Face embedding used by the (external) biometric matcher
    pub embedding: Option<Vec<f32>>,
    /// Last successful refresh from the central service
    pub last_refreshed: Option<DateTime<Utc>>,
    /// Created locally before any cloud confirmation
    pub minimal: bool,
}

impl Driver {
    /// Placeholder created on first scan of an unknown identifier
    pub fn placeholder(id: DriverId) -> Self {
        Self {
            id,
            badge_hash: format!("{}{}", PLACEHOLDER_BADGE_PREFIX, id),
            display_name: format!("{} {}", PLACEHOLDER_NAME_PREFIX, id.short()),
            active: true,
            embedding: None,
            last_refreshed: None,
            minimal: true,
        }
    }
}

/// Locally cached vehicle record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub plate: String,
    pub internal_number: String,
    pub updated_at: DateTime<Utc>,
}

/// Operational state of this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalState {
    /// No vehicle assigned yet
    Unprovisioned,
    Active,
}

impl OperationalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationalState::Unprovisioned => "unprovisioned",
            OperationalState::Active => "active",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unprovisioned" => Some(OperationalState::Unprovisioned),
            "active" => Some(OperationalState::Active),
            _ => None,
        }
    }
}

/// Singleton device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub hardware_id: String,
    pub vehicle_id: Option<VehicleId>,
    pub state: OperationalState,
    pub firmware_version: String,
    pub updated_at: DateTime<Utc>,
}

impl DeviceConfig {
    pub fn is_provisioned(&self) -> bool {
        self.vehicle_id.is_some() && self.state == OperationalState::Active
    }
}

/// Driving session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Finished,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SessionState::Active),
            "finished" => Some(SessionState::Finished),
            _ => None,
        }
    }
}

/// A single driver-vehicle assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Local row id (set by the store)
    pub id: i64,
    pub session_id: SessionId,
    pub driver_id: DriverId,
    pub vehicle_id: VehicleId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub assignment_kind: String,
    /// Final (finished) record acknowledged by the central service
    pub synced: bool,
}

impl Session {
    /// A fresh active session opened by a badge scan
    pub fn open(driver_id: DriverId, vehicle_id: VehicleId, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            session_id: SessionId::new(),
            driver_id,
            vehicle_id,
            started_at: now,
            ended_at: None,
            state: SessionState::Active,
            assignment_kind: ASSIGNMENT_BADGE_SCAN.to_string(),
            synced: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Elapsed time, up to `now` while active
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// What a journal event records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    SessionEnded,
    /// Continuous driving time exceeded the configured limit
    DurationExceeded,
    /// Scan of a driver flagged inactive
    DriverInactive,
    /// Scan payload could not be resolved to a driver
    DriverUnidentified,
    /// Session transition failed locally
    SessionError,
    /// Produced by an external detector (fatigue, distraction, ...)
    Detection { label: String },
}

impl EventKind {
    /// Coarse event type used by the central service
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::SessionStarted | EventKind::SessionEnded => "session",
            EventKind::DurationExceeded => "driving_regulation",
            EventKind::DriverInactive | EventKind::DriverUnidentified => "identification",
            EventKind::SessionError => "system_error",
            EventKind::Detection { .. } => "detection",
        }
    }

    pub fn subtype(&self) -> String {
        match self {
            EventKind::SessionStarted => "session_started".into(),
            EventKind::SessionEnded => "session_ended".into(),
            EventKind::DurationExceeded => "driving_hours_exceeded".into(),
            EventKind::DriverInactive => "driver_inactive".into(),
            EventKind::DriverUnidentified => "driver_unidentified".into(),
            EventKind::SessionError => "session_management_error".into(),
            EventKind::Detection { label } => label.clone(),
        }
    }

    /// Identification and system-error events may be journaled without a session
    pub fn allows_null_session(&self) -> bool {
        matches!(
            self,
            EventKind::DriverInactive | EventKind::DriverUnidentified | EventKind::SessionError
        )
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            EventKind::SessionStarted | EventKind::SessionEnded => Severity::Low,
            EventKind::SessionError => Severity::Medium,
            EventKind::DriverInactive | EventKind::DriverUnidentified => Severity::High,
            EventKind::DurationExceeded => Severity::Critical,
            EventKind::Detection { .. } => Severity::Medium,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_type(), self.subtype())
    }
}

/// Local media attached to an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPaths {
    pub snapshot: Option<PathBuf>,
    pub video: Option<PathBuf>,
}

impl MediaPaths {
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.video.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.snapshot.iter().chain(self.video.iter())
    }
}

/// Caller-supplied part of a journal event
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub kind: EventKind,
    pub driver_id: Option<DriverId>,
    pub severity: Severity,
    pub confidence: Option<f64>,
    pub alert_triggered: bool,
    pub metadata: serde_json::Value,
}

impl EventData {
    pub fn new(kind: EventKind) -> Self {
        let severity = kind.default_severity();
        Self {
            kind,
            driver_id: None,
            severity,
            confidence: None,
            alert_triggered: false,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn driver(mut self, driver_id: DriverId) -> Self {
        self.driver_id = Some(driver_id);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn alert_triggered(mut self) -> Self {
        self.alert_triggered = true;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Local insertion order (set by the store)
    pub seq: i64,
    pub vehicle_id: VehicleId,
    pub driver_id: Option<DriverId>,
    pub session_id: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub severity: Severity,
    pub confidence: Option<f64>,
    pub alert_triggered: bool,
    pub metadata: serde_json::Value,
    pub domain_synced: bool,
    pub media_synced: bool,
    pub media: MediaPaths,
}

impl Event {
    pub fn from_data(
        vehicle_id: VehicleId,
        session_id: Option<SessionId>,
        data: EventData,
        media: MediaPaths,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            seq: 0,
            vehicle_id,
            driver_id: data.driver_id,
            session_id,
            timestamp: now,
            kind: data.kind,
            severity: data.severity,
            confidence: data.confidence,
            alert_triggered: data.alert_triggered,
            metadata: data.metadata,
            domain_synced: false,
            media_synced: false,
            media,
        }
    }
}

/// Level at which an alert is rendered in the cab
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Persisted alert kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    DurationExceeded,
    InactiveDriver,
    UnidentifiedDriver,
    SessionError,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::DurationExceeded => "duration_exceeded",
            AlertKind::InactiveDriver => "inactive_driver",
            AlertKind::UnidentifiedDriver => "unidentified_driver",
            AlertKind::SessionError => "session_error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "duration_exceeded" => Some(AlertKind::DurationExceeded),
            "inactive_driver" => Some(AlertKind::InactiveDriver),
            "unidentified_driver" => Some(AlertKind::UnidentifiedDriver),
            "session_error" => Some(AlertKind::SessionError),
            _ => None,
        }
    }
}

/// Alert raised in the cab, kept until acknowledged by the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub event_id: Option<EventId>,
    pub driver_id: Option<DriverId>,
    pub vehicle_id: VehicleId,
    pub session_id: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
    pub kind: AlertKind,
    pub description: String,
    pub viewed: bool,
}

/// One sample of device metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub id: TelemetryId,
    pub hardware_id: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
    pub synced: bool,
}

impl TelemetrySample {
    pub fn new(
        hardware_id: impl Into<String>,
        metrics: BTreeMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TelemetryId::new(),
            hardware_id: hardware_id.into(),
            timestamp: now,
            metrics,
            synced: false,
        }
    }
}

/// Logical tables tracked by sync watermarks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    Events,
    Telemetry,
    Sessions,
    Drivers,
    Vehicles,
}

impl SyncTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTable::Events => "events",
            SyncTable::Telemetry => "telemetry",
            SyncTable::Sessions => "sessions",
            SyncTable::Drivers => "drivers",
            SyncTable::Vehicles => "vehicles",
        }
    }
}

impl fmt::Display for SyncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observability marker for a synchronized table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub last_pushed_at: Option<DateTime<Utc>>,
    pub last_pulled_at: Option<DateTime<Utc>>,
    pub last_local_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_driver_is_minimal_and_active() {
        let id = DriverId::new();
        let driver = Driver::placeholder(id);

        assert!(driver.minimal);
        assert!(driver.active);
        assert!(driver.badge_hash.starts_with(PLACEHOLDER_BADGE_PREFIX));
        assert!(driver.display_name.starts_with(PLACEHOLDER_NAME_PREFIX));
        assert!(driver.embedding.is_none());
    }

    #[test]
    fn null_session_kinds() {
        assert!(EventKind::DriverInactive.allows_null_session());
        assert!(EventKind::DriverUnidentified.allows_null_session());
        assert!(EventKind::SessionError.allows_null_session());
        assert!(!EventKind::SessionStarted.allows_null_session());
        assert!(!EventKind::Detection { label: "fatigue".into() }.allows_null_session());
    }

    #[test]
    fn event_kind_serialization() {
        let kind = EventKind::Detection {
            label: "distraction".into(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, r#"{"kind":"detection","label":"distraction"}"#);

        let parsed: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, kind);
        assert_eq!(parsed.to_string(), "detection/distraction");
    }

    #[test]
    fn session_elapsed() {
        let start = Utc::now();
        let session = Session::open(DriverId::new(), VehicleId::new(), start);
        assert_eq!(
            session.elapsed(start + chrono::Duration::hours(9)),
            chrono::Duration::hours(9)
        );
    }
}
