//! Event and telemetry journal
//!
//! Everything recorded here starts unsynced. Sync flags are only ever flipped
//! by the sync orchestrator; media paths and telemetry rows are only removed by
//! retention.

use chrono::{DateTime, Utc};
use drivewatch_api::{Event, EventData, MediaPaths, TelemetrySample};
use drivewatch_store::Store;
use drivewatch_util::{AgentError, AgentResult, VehicleId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub struct Journal {
    store: Arc<dyn Store>,
}

impl Journal {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append an event for a vehicle.
    ///
    /// Identification and system-error kinds are recorded with a null session.
    /// Every other kind is attached to the vehicle's active session and fails
    /// with [`AgentError::NoActiveSession`] when there is none.
    pub fn append_event(
        &self,
        vehicle: VehicleId,
        data: EventData,
        media: Option<MediaPaths>,
        now: DateTime<Utc>,
    ) -> AgentResult<Event> {
        let session_id = if data.kind.allows_null_session() {
            None
        } else {
            match self.store.active_session(&vehicle)? {
                Some(session) => Some(session.session_id),
                None => return Err(AgentError::NoActiveSession(vehicle)),
            }
        };

        let event = Event::from_data(vehicle, session_id, data, media.unwrap_or_default(), now);
        let stored = self.store.append_event(&event)?;
        debug!(event_id = %stored.id, seq = stored.seq, kind = %stored.kind, "Event journaled");
        Ok(stored)
    }

    /// Append a telemetry sample; never depends on session state
    pub fn append_telemetry(&self, sample: &TelemetrySample) -> AgentResult<()> {
        self.store.append_telemetry(sample)?;
        Ok(())
    }

    /// Wrap a collector's metric record into a sample and append it
    pub fn record_metrics(
        &self,
        hardware_id: &str,
        metrics: BTreeMap<String, f64>,
        now: DateTime<Utc>,
    ) -> AgentResult<TelemetrySample> {
        if metrics.is_empty() {
            return Err(AgentError::validation("empty metric record"));
        }
        let sample = TelemetrySample::new(hardware_id, metrics, now);
        self.append_telemetry(&sample)?;
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivewatch_api::{Driver, EventKind, Session};
    use drivewatch_store::{SessionTransition, SqliteStore};
    use std::path::PathBuf;

    fn setup() -> (Arc<SqliteStore>, Journal, VehicleId) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let journal = Journal::new(store.clone());
        (store, journal, VehicleId::new())
    }

    fn start_session(store: &SqliteStore, vehicle: VehicleId) -> Session {
        let driver = Driver::placeholder(drivewatch_util::DriverId::new());
        store.save_driver(&driver).unwrap();
        store
            .commit_transition(&SessionTransition {
                open: Some(Session::open(driver.id, vehicle, drivewatch_util::now())),
                ..Default::default()
            })
            .unwrap()
            .unwrap()
    }

    #[test]
    fn detection_requires_active_session() {
        let (_store, journal, vehicle) = setup();
        let data = EventData::new(EventKind::Detection {
            label: "fatigue".into(),
        });

        let err = journal
            .append_event(vehicle, data, None, drivewatch_util::now())
            .unwrap_err();
        assert!(matches!(err, AgentError::NoActiveSession(v) if v == vehicle));
    }

    #[test]
    fn detection_attaches_to_active_session() {
        let (store, journal, vehicle) = setup();
        let session = start_session(&store, vehicle);

        let media = MediaPaths {
            snapshot: Some(PathBuf::from("/media/snap.jpg")),
            video: None,
        };
        let event = journal
            .append_event(
                vehicle,
                EventData::new(EventKind::Detection {
                    label: "distraction".into(),
                })
                .confidence(0.91),
                Some(media.clone()),
                drivewatch_util::now(),
            )
            .unwrap();

        assert_eq!(event.session_id, Some(session.session_id));
        assert_eq!(event.media, media);
        assert!(!event.domain_synced && !event.media_synced);
    }

    #[test]
    fn identification_events_have_null_session() {
        let (store, journal, vehicle) = setup();
        start_session(&store, vehicle);

        let event = journal
            .append_event(
                vehicle,
                EventData::new(EventKind::DriverUnidentified),
                None,
                drivewatch_util::now(),
            )
            .unwrap();
        assert!(event.session_id.is_none());
        assert!(event.driver_id.is_none());
    }

    #[test]
    fn metrics_become_unsynced_samples() {
        let (store, journal, _vehicle) = setup();
        let mut metrics = BTreeMap::new();
        metrics.insert("cpu_temp_c".to_string(), 58.0);

        let sample = journal
            .record_metrics("jetson-01", metrics, drivewatch_util::now())
            .unwrap();
        assert!(!sample.synced);
        let pending = store.unsynced_telemetry(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, sample.id);

        assert!(
            journal
                .record_metrics("jetson-01", BTreeMap::new(), drivewatch_util::now())
                .is_err()
        );
    }
}
