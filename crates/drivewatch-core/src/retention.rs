//! Local retention: media files and telemetry rows that have left the device

use chrono::{DateTime, Utc};
use drivewatch_config::RetentionPolicy;
use drivewatch_store::Store;
use drivewatch_util::{AgentError, AgentResult};
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one retention pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Events whose media paths were cleared
    pub events_cleaned: usize,
    pub files_removed: usize,
    /// Files that could not be removed; their event keeps its paths
    pub file_errors: usize,
    pub telemetry_deleted: usize,
}

impl RetentionReport {
    pub fn is_empty(&self) -> bool {
        self.events_cleaned == 0 && self.telemetry_deleted == 0 && self.file_errors == 0
    }
}

pub struct Retention {
    store: Arc<dyn Store>,
    policy: RetentionPolicy,
}

impl Retention {
    pub fn new(store: Arc<dyn Store>, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    /// Remove media of fully synced events past the media age, then purge
    /// synced telemetry past the telemetry age. Nothing unsynced is touched.
    pub fn run(&self, now: DateTime<Utc>) -> AgentResult<RetentionReport> {
        let mut report = RetentionReport::default();

        let media_cutoff = now - to_chrono(self.policy.event_media_max_age)?;
        for event in self.store.media_cleanup_candidates(media_cutoff)? {
            let mut complete = true;
            for path in event.media.iter() {
                match std::fs::remove_file(path) {
                    Ok(()) => report.files_removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!(path = %path.display(), "Media file already gone");
                    }
                    Err(e) => {
                        warn!(event_id = %event.id, path = %path.display(), error = %e, "Failed to remove media file");
                        report.file_errors += 1;
                        complete = false;
                    }
                }
            }

            if complete {
                self.store.clear_event_media(&event.id)?;
                report.events_cleaned += 1;
            }
        }

        let telemetry_cutoff = now - to_chrono(self.policy.telemetry_max_age)?;
        report.telemetry_deleted = self.store.purge_synced_telemetry(telemetry_cutoff)?;

        if !report.is_empty() {
            info!(
                events_cleaned = report.events_cleaned,
                files_removed = report.files_removed,
                file_errors = report.file_errors,
                telemetry_deleted = report.telemetry_deleted,
                "Retention pass complete"
            );
        }
        Ok(report)
    }
}

fn to_chrono(d: std::time::Duration) -> AgentResult<chrono::Duration> {
    chrono::Duration::from_std(d).map_err(|_| AgentError::validation("retention age out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivewatch_api::{Event, EventData, EventKind, MediaPaths, TelemetrySample};
    use drivewatch_store::SqliteStore;
    use drivewatch_util::VehicleId;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T06:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn policy() -> RetentionPolicy {
        RetentionPolicy {
            interval: Duration::from_secs(3600),
            event_media_max_age: Duration::from_secs(72 * 3600),
            telemetry_max_age: Duration::from_secs(168 * 3600),
        }
    }

    fn media_event(store: &SqliteStore, dir: &Path, name: &str, at: DateTime<Utc>) -> Event {
        let snapshot = dir.join(format!("{}.jpg", name));
        std::fs::write(&snapshot, b"jpeg").unwrap();
        let event = Event::from_data(
            VehicleId::new(),
            None,
            EventData::new(EventKind::DriverUnidentified),
            MediaPaths {
                snapshot: Some(snapshot),
                video: None,
            },
            at,
        );
        store.append_event(&event).unwrap()
    }

    #[test]
    fn removes_only_fully_synced_old_media() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let retention = Retention::new(store.clone(), policy());

        let old_synced = media_event(&store, dir.path(), "old-synced", t0());
        let old_unsynced = media_event(&store, dir.path(), "old-unsynced", t0());
        let fresh = media_event(&store, dir.path(), "fresh", t0() + chrono::Duration::hours(100));

        for event in [&old_synced, &fresh] {
            store.mark_events_synced(&[event.id]).unwrap();
            store.mark_event_media_synced(&event.id).unwrap();
        }
        store.mark_events_synced(&[old_unsynced.id]).unwrap();

        let report = retention.run(t0() + chrono::Duration::hours(120)).unwrap();
        assert_eq!(report.events_cleaned, 1);
        assert_eq!(report.files_removed, 1);

        assert!(!dir.path().join("old-synced.jpg").exists());
        assert!(dir.path().join("old-unsynced.jpg").exists());
        assert!(dir.path().join("fresh.jpg").exists());
        assert!(store.get_event(&old_synced.id).unwrap().unwrap().media.is_empty());
        assert!(!store.get_event(&old_unsynced.id).unwrap().unwrap().media.is_empty());
    }

    #[test]
    fn missing_file_counts_as_removed() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let retention = Retention::new(store.clone(), policy());

        let event = media_event(&store, dir.path(), "gone", t0());
        store.mark_events_synced(&[event.id]).unwrap();
        store.mark_event_media_synced(&event.id).unwrap();
        std::fs::remove_file(dir.path().join("gone.jpg")).unwrap();

        let report = retention.run(t0() + chrono::Duration::hours(73)).unwrap();
        assert_eq!(report.events_cleaned, 1);
        assert_eq!(report.files_removed, 0);
        assert_eq!(report.file_errors, 0);
        assert!(store.media_cleanup_candidates(t0() + chrono::Duration::hours(1)).unwrap().is_empty());
    }

    #[test]
    fn purges_only_synced_telemetry() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let retention = Retention::new(store.clone(), policy());

        let mut metrics = BTreeMap::new();
        metrics.insert("cpu_load".to_string(), 0.4);
        let synced = TelemetrySample::new("jetson-01", metrics.clone(), t0());
        let pending = TelemetrySample::new("jetson-01", metrics, t0());
        store.append_telemetry(&synced).unwrap();
        store.append_telemetry(&pending).unwrap();
        store.mark_telemetry_synced(&synced.id).unwrap();

        let report = retention.run(t0() + chrono::Duration::hours(200)).unwrap();
        assert_eq!(report.telemetry_deleted, 1);
        assert_eq!(store.telemetry_count().unwrap(), 1);
        assert_eq!(store.unsynced_telemetry(10).unwrap()[0].id, pending.id);

        let again = retention.run(t0() + chrono::Duration::hours(200)).unwrap();
        assert!(again.is_empty());
    }
}
