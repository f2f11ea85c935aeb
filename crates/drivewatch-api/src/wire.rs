//! JSON payloads exchanged with the central service
//!
//! Outbound records are flat projections of the local model. Inbound payloads
//! are lenient: every field except the id is optional, and an absent field
//! means "leave the local value alone".

use chrono::{DateTime, Utc};
use drivewatch_util::{DriverId, EventId, SessionId, TelemetryId, VehicleId};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::{Event, Session, SessionState, Severity, TelemetrySample};

/// Outbound event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub vehicle_id: VehicleId,
    pub driver_id: Option<DriverId>,
    pub session_id: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub subtype: String,
    pub severity: Severity,
    pub confidence: Option<f64>,
    pub alert_triggered: bool,
    pub metadata: serde_json::Value,
    pub has_snapshot: bool,
    pub has_video: bool,
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            vehicle_id: event.vehicle_id,
            driver_id: event.driver_id,
            session_id: event.session_id,
            timestamp: event.timestamp,
            event_type: event.kind.event_type().to_string(),
            subtype: event.kind.subtype(),
            severity: event.severity,
            confidence: event.confidence,
            alert_triggered: event.alert_triggered,
            metadata: event.metadata.clone(),
            has_snapshot: event.media.snapshot.is_some(),
            has_video: event.media.video.is_some(),
        }
    }
}

/// Body of `POST /events`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<EventRecord>,
}

impl EventBatch {
    pub fn from_events(events: &[Event]) -> Self {
        Self {
            events: events.iter().map(EventRecord::from).collect(),
        }
    }
}

/// Body of `POST /telemetry`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: TelemetryId,
    pub hardware_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, f64>,
}

impl From<&TelemetrySample> for TelemetryRecord {
    fn from(sample: &TelemetrySample) -> Self {
        Self {
            id: sample.id,
            hardware_id: sample.hardware_id.clone(),
            timestamp: sample.timestamp,
            metrics: sample.metrics.clone(),
        }
    }
}

/// Body of `POST /sessions` (idempotent upsert keyed by `session_id`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub driver_id: DriverId,
    pub vehicle_id: VehicleId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub assignment_kind: String,
    pub duration_seconds: i64,
}

impl SessionRecord {
    /// Snapshot of a session; active sessions report duration up to `now`
    pub fn from_session(session: &Session, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.session_id,
            driver_id: session.driver_id,
            vehicle_id: session.vehicle_id,
            started_at: session.started_at,
            ended_at: session.ended_at,
            state: session.state,
            assignment_kind: session.assignment_kind.clone(),
            duration_seconds: session.elapsed(now).num_seconds().max(0),
        }
    }
}

/// Driver as returned by `GET /drivers/{id}` and `GET /vehicles/{id}/drivers`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverPayload {
    pub id: DriverId,
    #[serde(default)]
    pub badge_hash: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "lenient_embedding")]
    pub embedding: Option<Vec<f32>>,
}

impl DriverPayload {
    /// Both identifying fields present, enough to clear the minimal marker
    pub fn is_complete(&self) -> bool {
        self.badge_hash.as_deref().is_some_and(|s| !s.is_empty())
            && self.display_name.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Vehicle as returned by `GET /vehicles/by-plate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePayload {
    pub id: VehicleId,
    pub plate: String,
    #[serde(default)]
    pub internal_number: Option<String>,
}

/// Accept an embedding as a JSON array or as a string holding one.
/// Anything else decodes to `None` rather than failing the whole record.
fn lenient_embedding<'de, D>(deserializer: D) -> Result<Option<Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(text)) => serde_json::from_str(&text).ok(),
        Some(other @ serde_json::Value::Array(_)) => serde_json::from_value(other).ok(),
        _ => None,
    })
}
