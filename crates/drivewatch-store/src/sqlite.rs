//! SQLite-based store implementation

use chrono::{DateTime, SecondsFormat, Utc};
use drivewatch_api::{
    Alert, AlertKind, DeviceConfig, Driver, Event, MediaPaths, OperationalState, Session,
    SessionState, Severity, SyncTable, SyncWatermark, TelemetrySample, Vehicle,
};
use drivewatch_util::{AlertId, DriverId, EventId, SessionId, TelemetryId, VehicleId};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{SessionTransition, Store, StoreError, StoreResult};

const DRIVER_COLUMNS: &str =
    "id, badge_hash, display_name, active, embedding, last_refreshed, minimal";
const VEHICLE_COLUMNS: &str = "id, plate, internal_number, updated_at";
const SESSION_COLUMNS: &str =
    "id, session_id, driver_id, vehicle_id, started_at, ended_at, state, assignment_kind, synced";
const EVENT_COLUMNS: &str = "seq, id, vehicle_id, driver_id, session_id, timestamp, kind, \
     severity, confidence, alert_triggered, metadata, domain_synced, media_synced, \
     snapshot_path, video_path";
const TELEMETRY_COLUMNS: &str = "id, hardware_id, timestamp, metrics, synced";
const ALERT_COLUMNS: &str =
    "id, event_id, driver_id, vehicle_id, session_id, timestamp, kind, description, viewed";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS drivers (
                id TEXT PRIMARY KEY,
                badge_hash TEXT NOT NULL,
                display_name TEXT NOT NULL,
                active INTEGER NOT NULL,
                embedding TEXT,
                last_refreshed TEXT,
                minimal INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vehicles (
                id TEXT PRIMARY KEY,
                plate TEXT NOT NULL UNIQUE,
                internal_number TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Device configuration (single row)
            CREATE TABLE IF NOT EXISTS device_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                hardware_id TEXT NOT NULL,
                vehicle_id TEXT,
                state TEXT NOT NULL,
                firmware_version TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL UNIQUE,
                driver_id TEXT NOT NULL REFERENCES drivers(id),
                vehicle_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                state TEXT NOT NULL CHECK (state IN ('active', 'finished')),
                assignment_kind TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            );

            -- At most one active session per vehicle
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
                ON sessions(vehicle_id) WHERE state = 'active';

            -- Event journal (append-only apart from sync flags and media paths)
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                vehicle_id TEXT NOT NULL,
                driver_id TEXT,
                session_id TEXT REFERENCES sessions(session_id),
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                kind TEXT NOT NULL,
                severity TEXT NOT NULL,
                confidence REAL,
                alert_triggered INTEGER NOT NULL,
                metadata TEXT NOT NULL,
                domain_synced INTEGER NOT NULL DEFAULT 0,
                media_synced INTEGER NOT NULL DEFAULT 0,
                snapshot_path TEXT,
                video_path TEXT
            );

            CREATE TABLE IF NOT EXISTS telemetry (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                hardware_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                metrics TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS alerts (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                event_id TEXT,
                driver_id TEXT,
                vehicle_id TEXT NOT NULL,
                session_id TEXT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                description TEXT NOT NULL,
                viewed INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS sync_watermarks (
                table_name TEXT PRIMARY KEY,
                last_pushed_at TEXT,
                last_pulled_at TEXT,
                last_local_id TEXT
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_events_domain_synced ON events(domain_synced, seq);
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_telemetry_synced ON telemetry(synced, seq);
            CREATE INDEX IF NOT EXISTS idx_sessions_vehicle ON sessions(vehicle_id, id);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text so that they
/// compare correctly as strings.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Error)]
#[error("unknown value '{0}'")]
struct UnknownValue(String);

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn get_opt_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn get_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn get_enum<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or_else(|| conversion_error(idx, UnknownValue(text)))
}

fn get_path(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<PathBuf>> {
    let text: Option<String> = row.get(idx)?;
    Ok(text.map(PathBuf::from))
}

fn path_text(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.to_string_lossy().into_owned())
}

fn driver_from_row(row: &Row<'_>) -> rusqlite::Result<Driver> {
    let embedding: Option<String> = row.get(4)?;
    let embedding = embedding
        .map(|e| serde_json::from_str(&e).map_err(|err| conversion_error(4, err)))
        .transpose()?;

    Ok(Driver {
        id: get_parsed(row, 0)?,
        badge_hash: row.get(1)?,
        display_name: row.get(2)?,
        active: row.get(3)?,
        embedding,
        last_refreshed: get_opt_ts(row, 5)?,
        minimal: row.get(6)?,
    })
}

fn vehicle_from_row(row: &Row<'_>) -> rusqlite::Result<Vehicle> {
    Ok(Vehicle {
        id: get_parsed(row, 0)?,
        plate: row.get(1)?,
        internal_number: row.get(2)?,
        updated_at: get_ts(row, 3)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        session_id: get_parsed(row, 1)?,
        driver_id: get_parsed(row, 2)?,
        vehicle_id: get_parsed(row, 3)?,
        started_at: get_ts(row, 4)?,
        ended_at: get_opt_ts(row, 5)?,
        state: get_enum(row, 6, SessionState::parse)?,
        assignment_kind: row.get(7)?,
        synced: row.get(8)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        seq: row.get(0)?,
        id: get_parsed(row, 1)?,
        vehicle_id: get_parsed(row, 2)?,
        driver_id: get_opt_parsed(row, 3)?,
        session_id: get_opt_parsed(row, 4)?,
        timestamp: get_ts(row, 5)?,
        kind: get_json(row, 6)?,
        severity: get_enum(row, 7, Severity::parse)?,
        confidence: row.get(8)?,
        alert_triggered: row.get(9)?,
        metadata: get_json(row, 10)?,
        domain_synced: row.get(11)?,
        media_synced: row.get(12)?,
        media: MediaPaths {
            snapshot: get_path(row, 13)?,
            video: get_path(row, 14)?,
        },
    })
}

fn telemetry_from_row(row: &Row<'_>) -> rusqlite::Result<TelemetrySample> {
    Ok(TelemetrySample {
        id: get_parsed(row, 0)?,
        hardware_id: row.get(1)?,
        timestamp: get_ts(row, 2)?,
        metrics: get_json(row, 3)?,
        synced: row.get(4)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: get_parsed(row, 0)?,
        event_id: get_opt_parsed(row, 1)?,
        driver_id: get_opt_parsed(row, 2)?,
        vehicle_id: get_parsed(row, 3)?,
        session_id: get_opt_parsed(row, 4)?,
        timestamp: get_ts(row, 5)?,
        kind: get_enum(row, 6, AlertKind::parse)?,
        description: row.get(7)?,
        viewed: row.get(8)?,
    })
}

/// Insert one event on an open connection or transaction.
///
/// The session reference is checked explicitly so the caller gets a typed
/// error instead of a bare foreign-key failure.
fn insert_event(conn: &Connection, event: &Event) -> StoreResult<i64> {
    if let Some(session_id) = &event.session_id {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE session_id = ?",
                [session_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::UnknownSession(*session_id));
        }
    }

    conn.execute(
        r#"
        INSERT INTO events (
            id, vehicle_id, driver_id, session_id, timestamp, event_type, kind,
            severity, confidence, alert_triggered, metadata, domain_synced,
            media_synced, snapshot_path, video_path
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, 0, ?12, ?13)
        "#,
        params![
            event.id.to_string(),
            event.vehicle_id.to_string(),
            event.driver_id.map(|d| d.to_string()),
            event.session_id.map(|s| s.to_string()),
            ts(&event.timestamp),
            event.kind.event_type(),
            serde_json::to_string(&event.kind)?,
            event.severity.as_str(),
            event.confidence,
            event.alert_triggered,
            serde_json::to_string(&event.metadata)?,
            path_text(&event.media.snapshot),
            path_text(&event.media.video),
        ],
    )?;

    let seq = conn.last_insert_rowid();
    debug!(event_id = %event.id, seq, kind = %event.kind, "Event appended");
    Ok(seq)
}

impl Store for SqliteStore {
    fn get_driver(&self, id: &DriverId) -> StoreResult<Option<Driver>> {
        let conn = self.lock()?;
        let driver = conn
            .query_row(
                &format!("SELECT {} FROM drivers WHERE id = ?", DRIVER_COLUMNS),
                [id.to_string()],
                driver_from_row,
            )
            .optional()?;
        Ok(driver)
    }

    fn save_driver(&self, driver: &Driver) -> StoreResult<()> {
        let conn = self.lock()?;
        let embedding = driver
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r#"
            INSERT INTO drivers (id, badge_hash, display_name, active, embedding, last_refreshed, minimal)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                badge_hash = excluded.badge_hash,
                display_name = excluded.display_name,
                active = excluded.active,
                embedding = excluded.embedding,
                last_refreshed = excluded.last_refreshed,
                minimal = excluded.minimal
            "#,
            params![
                driver.id.to_string(),
                driver.badge_hash,
                driver.display_name,
                driver.active,
                embedding,
                driver.last_refreshed.as_ref().map(ts),
                driver.minimal,
            ],
        )?;

        debug!(driver_id = %driver.id, minimal = driver.minimal, "Driver saved");
        Ok(())
    }

    fn list_drivers(&self) -> StoreResult<Vec<Driver>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM drivers ORDER BY display_name",
            DRIVER_COLUMNS
        ))?;
        let drivers = stmt
            .query_map([], driver_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(drivers)
    }

    fn get_vehicle(&self, id: &VehicleId) -> StoreResult<Option<Vehicle>> {
        let conn = self.lock()?;
        let vehicle = conn
            .query_row(
                &format!("SELECT {} FROM vehicles WHERE id = ?", VEHICLE_COLUMNS),
                [id.to_string()],
                vehicle_from_row,
            )
            .optional()?;
        Ok(vehicle)
    }

    fn get_vehicle_by_plate(&self, plate: &str) -> StoreResult<Option<Vehicle>> {
        let conn = self.lock()?;
        let vehicle = conn
            .query_row(
                &format!("SELECT {} FROM vehicles WHERE plate = ?", VEHICLE_COLUMNS),
                [plate],
                vehicle_from_row,
            )
            .optional()?;
        Ok(vehicle)
    }

    fn upsert_vehicle(&self, vehicle: &Vehicle) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO vehicles (id, plate, internal_number, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                plate = excluded.plate,
                internal_number = excluded.internal_number,
                updated_at = excluded.updated_at
            "#,
            params![
                vehicle.id.to_string(),
                vehicle.plate,
                vehicle.internal_number,
                ts(&vehicle.updated_at),
            ],
        )?;

        debug!(vehicle_id = %vehicle.id, plate = %vehicle.plate, "Vehicle saved");
        Ok(())
    }

    fn load_device_config(&self) -> StoreResult<Option<DeviceConfig>> {
        let conn = self.lock()?;
        let config = conn
            .query_row(
                "SELECT hardware_id, vehicle_id, state, firmware_version, updated_at \
                 FROM device_config WHERE id = 1",
                [],
                |row| {
                    Ok(DeviceConfig {
                        hardware_id: row.get(0)?,
                        vehicle_id: get_opt_parsed(row, 1)?,
                        state: get_enum(row, 2, OperationalState::parse)?,
                        firmware_version: row.get(3)?,
                        updated_at: get_ts(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(config)
    }

    fn save_device_config(&self, config: &DeviceConfig) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO device_config (id, hardware_id, vehicle_id, state, firmware_version, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                hardware_id = excluded.hardware_id,
                vehicle_id = excluded.vehicle_id,
                state = excluded.state,
                firmware_version = excluded.firmware_version,
                updated_at = excluded.updated_at
            "#,
            params![
                config.hardware_id,
                config.vehicle_id.map(|v| v.to_string()),
                config.state.as_str(),
                config.firmware_version,
                ts(&config.updated_at),
            ],
        )?;

        debug!(hardware_id = %config.hardware_id, state = config.state.as_str(), "Device config saved");
        Ok(())
    }

    fn active_session(&self, vehicle: &VehicleId) -> StoreResult<Option<Session>> {
        let conn = self.lock()?;
        let session = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions WHERE vehicle_id = ? AND state = 'active'",
                    SESSION_COLUMNS
                ),
                [vehicle.to_string()],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        let conn = self.lock()?;
        let session = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE session_id = ?", SESSION_COLUMNS),
                [id.to_string()],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn commit_transition(&self, transition: &SessionTransition) -> StoreResult<Option<Session>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if let Some((session_id, ended_at)) = &transition.close {
            let changed = tx.execute(
                "UPDATE sessions SET state = 'finished', ended_at = ?1 \
                 WHERE session_id = ?2 AND state = 'active'",
                params![ts(ended_at), session_id.to_string()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("active session {}", session_id)));
            }
        }

        let opened = match &transition.open {
            Some(session) => {
                tx.execute(
                    r#"
                    INSERT INTO sessions (
                        session_id, driver_id, vehicle_id, started_at, ended_at,
                        state, assignment_kind, synced
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        session.session_id.to_string(),
                        session.driver_id.to_string(),
                        session.vehicle_id.to_string(),
                        ts(&session.started_at),
                        session.ended_at.as_ref().map(ts),
                        session.state.as_str(),
                        session.assignment_kind,
                        session.synced,
                    ],
                )?;
                let mut opened = session.clone();
                opened.id = tx.last_insert_rowid();
                Some(opened)
            }
            None => None,
        };

        for event in &transition.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;

        debug!(
            closed = ?transition.close.as_ref().map(|(id, _)| id),
            opened = ?opened.as_ref().map(|s| s.session_id),
            events = transition.events.len(),
            "Session transition committed"
        );
        Ok(opened)
    }

    fn unsynced_finished_sessions(&self, limit: usize) -> StoreResult<Vec<Session>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions WHERE state = 'finished' AND synced = 0 ORDER BY id LIMIT ?",
            SESSION_COLUMNS
        ))?;
        let sessions = stmt
            .query_map([limit as i64], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    fn mark_session_synced(&self, id: &SessionId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sessions SET synced = 1 WHERE session_id = ? AND state = 'finished'",
            [id.to_string()],
        )?;
        Ok(())
    }

    fn sessions_for_vehicle(&self, vehicle: &VehicleId) -> StoreResult<Vec<Session>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions WHERE vehicle_id = ? ORDER BY id",
            SESSION_COLUMNS
        ))?;
        let sessions = stmt
            .query_map([vehicle.to_string()], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    fn append_event(&self, event: &Event) -> StoreResult<Event> {
        let conn = self.lock()?;
        let seq = insert_event(&conn, event)?;

        let mut stored = event.clone();
        stored.seq = seq;
        stored.domain_synced = false;
        stored.media_synced = false;
        Ok(stored)
    }

    fn get_event(&self, id: &EventId) -> StoreResult<Option<Event>> {
        let conn = self.lock()?;
        let event = conn
            .query_row(
                &format!("SELECT {} FROM events WHERE id = ?", EVENT_COLUMNS),
                [id.to_string()],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    fn recent_events(&self, limit: usize) -> StoreResult<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events ORDER BY seq DESC LIMIT ?",
            EVENT_COLUMNS
        ))?;
        let events = stmt
            .query_map([limit as i64], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn unsynced_events(&self, limit: usize) -> StoreResult<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events WHERE domain_synced = 0 ORDER BY seq LIMIT ?",
            EVENT_COLUMNS
        ))?;
        let events = stmt
            .query_map([limit as i64], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn mark_events_synced(&self, ids: &[EventId]) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE events SET domain_synced = 1 WHERE id = ?")?;
            for id in ids {
                stmt.execute([id.to_string()])?;
            }
        }
        tx.commit()?;

        debug!(count = ids.len(), "Events marked synced");
        Ok(())
    }

    fn events_pending_media(&self, limit: usize) -> StoreResult<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events \
             WHERE media_synced = 0 AND (snapshot_path IS NOT NULL OR video_path IS NOT NULL) \
             ORDER BY seq LIMIT ?",
            EVENT_COLUMNS
        ))?;
        let events = stmt
            .query_map([limit as i64], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn mark_event_media_synced(&self, id: &EventId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE events SET media_synced = 1 WHERE id = ?",
            [id.to_string()],
        )?;
        Ok(())
    }

    fn media_cleanup_candidates(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events \
             WHERE domain_synced = 1 AND media_synced = 1 AND timestamp < ? \
               AND (snapshot_path IS NOT NULL OR video_path IS NOT NULL) \
             ORDER BY seq",
            EVENT_COLUMNS
        ))?;
        let events = stmt
            .query_map([ts(&cutoff)], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn clear_event_media(&self, id: &EventId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE events SET snapshot_path = NULL, video_path = NULL WHERE id = ?",
            [id.to_string()],
        )?;
        Ok(())
    }

    fn append_telemetry(&self, sample: &TelemetrySample) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO telemetry (id, hardware_id, timestamp, metrics, synced) \
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                sample.id.to_string(),
                sample.hardware_id,
                ts(&sample.timestamp),
                serde_json::to_string(&sample.metrics)?,
            ],
        )?;

        debug!(telemetry_id = %sample.id, metrics = sample.metrics.len(), "Telemetry appended");
        Ok(())
    }

    fn unsynced_telemetry(&self, limit: usize) -> StoreResult<Vec<TelemetrySample>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM telemetry WHERE synced = 0 ORDER BY seq LIMIT ?",
            TELEMETRY_COLUMNS
        ))?;
        let samples = stmt
            .query_map([limit as i64], telemetry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    fn mark_telemetry_synced(&self, id: &TelemetryId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE telemetry SET synced = 1 WHERE id = ?",
            [id.to_string()],
        )?;
        Ok(())
    }

    fn purge_synced_telemetry(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM telemetry WHERE synced = 1 AND timestamp < ?",
            [ts(&cutoff)],
        )?;
        debug!(deleted, "Synced telemetry purged");
        Ok(deleted)
    }

    fn telemetry_count(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn insert_alert(&self, alert: &Alert) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO alerts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                ALERT_COLUMNS
            ),
            params![
                alert.id.to_string(),
                alert.event_id.map(|e| e.to_string()),
                alert.driver_id.map(|d| d.to_string()),
                alert.vehicle_id.to_string(),
                alert.session_id.map(|s| s.to_string()),
                ts(&alert.timestamp),
                alert.kind.as_str(),
                alert.description,
                alert.viewed,
            ],
        )?;

        debug!(alert_id = %alert.id, kind = alert.kind.as_str(), "Alert stored");
        Ok(())
    }

    fn pending_alerts(&self) -> StoreResult<Vec<Alert>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM alerts WHERE viewed = 0 ORDER BY seq",
            ALERT_COLUMNS
        ))?;
        let alerts = stmt
            .query_map([], alert_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }

    fn mark_alert_viewed(&self, id: &AlertId) -> StoreResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("UPDATE alerts SET viewed = 1 WHERE id = ?", [id.to_string()])?;
        Ok(changed > 0)
    }

    fn get_watermark(&self, table: SyncTable) -> StoreResult<SyncWatermark> {
        let conn = self.lock()?;
        let watermark = conn
            .query_row(
                "SELECT last_pushed_at, last_pulled_at, last_local_id \
                 FROM sync_watermarks WHERE table_name = ?",
                [table.as_str()],
                |row| {
                    Ok(SyncWatermark {
                        last_pushed_at: get_opt_ts(row, 0)?,
                        last_pulled_at: get_opt_ts(row, 1)?,
                        last_local_id: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(watermark.unwrap_or_default())
    }

    fn record_push(
        &self,
        table: SyncTable,
        at: DateTime<Utc>,
        last_local_id: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO sync_watermarks (table_name, last_pushed_at, last_local_id)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(table_name) DO UPDATE SET
                last_pushed_at = excluded.last_pushed_at,
                last_local_id = COALESCE(excluded.last_local_id, sync_watermarks.last_local_id)
            "#,
            params![table.as_str(), ts(&at), last_local_id],
        )?;
        Ok(())
    }

    fn record_pull(&self, table: SyncTable, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO sync_watermarks (table_name, last_pulled_at)
            VALUES (?1, ?2)
            ON CONFLICT(table_name) DO UPDATE SET last_pulled_at = excluded.last_pulled_at
            "#,
            params![table.as_str(), ts(&at)],
        )?;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use drivewatch_api::{EventData, EventKind};
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn saved_driver(store: &SqliteStore) -> Driver {
        let driver = Driver::placeholder(DriverId::new());
        store.save_driver(&driver).unwrap();
        driver
    }

    fn open(store: &SqliteStore, driver: DriverId, vehicle: VehicleId, at: DateTime<Utc>) -> Session {
        let session = Session::open(driver, vehicle, at);
        store
            .commit_transition(&SessionTransition {
                open: Some(session),
                ..Default::default()
            })
            .unwrap()
            .unwrap()
    }

    fn event(vehicle: VehicleId, session: Option<SessionId>, kind: EventKind, at: DateTime<Utc>) -> Event {
        Event::from_data(vehicle, session, EventData::new(kind), MediaPaths::default(), at)
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_on_disk_store_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drivewatch.db");

        let driver = {
            let store = SqliteStore::open(&path).unwrap();
            saved_driver(&store)
        };

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_driver(&driver.id).unwrap(), Some(driver));
    }

    #[test]
    fn test_driver_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut driver = saved_driver(&store);

        driver.display_name = "Ana Torres".into();
        driver.embedding = Some(vec![0.25, -1.5, 3.0]);
        driver.last_refreshed = Some(t0());
        driver.minimal = false;
        store.save_driver(&driver).unwrap();

        let loaded = store.get_driver(&driver.id).unwrap().unwrap();
        assert_eq!(loaded, driver);
        assert_eq!(store.list_drivers().unwrap().len(), 1);
        assert!(store.get_driver(&DriverId::new()).unwrap().is_none());
    }

    #[test]
    fn test_vehicle_lookup_by_plate() {
        let store = SqliteStore::in_memory().unwrap();
        let vehicle = Vehicle {
            id: VehicleId::new(),
            plate: "ABC-123".into(),
            internal_number: "17".into(),
            updated_at: t0(),
        };
        store.upsert_vehicle(&vehicle).unwrap();

        assert_eq!(store.get_vehicle_by_plate("ABC-123").unwrap(), Some(vehicle.clone()));
        assert_eq!(store.get_vehicle(&vehicle.id).unwrap(), Some(vehicle));
        assert!(store.get_vehicle_by_plate("XYZ-999").unwrap().is_none());
    }

    #[test]
    fn test_device_config_singleton() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.load_device_config().unwrap().is_none());

        let mut config = DeviceConfig {
            hardware_id: "jetson-01".into(),
            vehicle_id: None,
            state: OperationalState::Unprovisioned,
            firmware_version: "0.1.0".into(),
            updated_at: t0(),
        };
        store.save_device_config(&config).unwrap();

        config.vehicle_id = Some(VehicleId::new());
        config.state = OperationalState::Active;
        store.save_device_config(&config).unwrap();

        assert_eq!(store.load_device_config().unwrap(), Some(config));
    }

    #[test]
    fn test_session_swap_is_atomic() {
        let store = SqliteStore::in_memory().unwrap();
        let vehicle = VehicleId::new();
        let first = saved_driver(&store);
        let second = saved_driver(&store);

        let old = open(&store, first.id, vehicle, t0());
        assert!(old.id > 0);

        let at = t0() + Duration::hours(1);
        let new = Session::open(second.id, vehicle, at);
        let opened = store
            .commit_transition(&SessionTransition {
                close: Some((old.session_id, at)),
                open: Some(new.clone()),
                events: vec![
                    event(vehicle, Some(old.session_id), EventKind::SessionEnded, at),
                    event(vehicle, Some(new.session_id), EventKind::SessionStarted, at),
                ],
            })
            .unwrap()
            .unwrap();

        let active = store.active_session(&vehicle).unwrap().unwrap();
        assert_eq!(active.session_id, opened.session_id);
        assert_eq!(active.driver_id, second.id);

        let closed = store.get_session(&old.session_id).unwrap().unwrap();
        assert_eq!(closed.state, SessionState::Finished);
        assert_eq!(closed.ended_at, Some(at));
        assert_eq!(store.recent_events(10).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_transition_rolls_back() {
        let store = SqliteStore::in_memory().unwrap();
        let vehicle = VehicleId::new();
        let first = saved_driver(&store);
        let old = open(&store, first.id, vehicle, t0());

        // Second driver was never saved, so the insert fails the foreign key
        let at = t0() + Duration::hours(1);
        let result = store.commit_transition(&SessionTransition {
            close: Some((old.session_id, at)),
            open: Some(Session::open(DriverId::new(), vehicle, at)),
            events: vec![event(vehicle, Some(old.session_id), EventKind::SessionEnded, at)],
        });
        assert!(matches!(result, Err(StoreError::Constraint(_))));

        let still_active = store.active_session(&vehicle).unwrap().unwrap();
        assert_eq!(still_active.session_id, old.session_id);
        assert!(store.recent_events(10).unwrap().is_empty());
    }

    #[test]
    fn test_second_active_session_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let vehicle = VehicleId::new();
        let driver = saved_driver(&store);
        open(&store, driver.id, vehicle, t0());

        let result = store.commit_transition(&SessionTransition {
            open: Some(Session::open(driver.id, vehicle, t0())),
            ..Default::default()
        });
        assert!(matches!(result, Err(StoreError::Constraint(_))));
        assert_eq!(store.sessions_for_vehicle(&vehicle).unwrap().len(), 1);
    }

    #[test]
    fn test_event_requires_existing_session() {
        let store = SqliteStore::in_memory().unwrap();
        let vehicle = VehicleId::new();
        let missing = SessionId::new();

        let result = store.append_event(&event(vehicle, Some(missing), EventKind::SessionStarted, t0()));
        assert!(matches!(result, Err(StoreError::UnknownSession(id)) if id == missing));

        let stored = store
            .append_event(&event(vehicle, None, EventKind::DriverUnidentified, t0()))
            .unwrap();
        assert!(stored.seq > 0);
        assert!(!stored.domain_synced);
    }

    #[test]
    fn test_unsynced_events_oldest_first() {
        let store = SqliteStore::in_memory().unwrap();
        let vehicle = VehicleId::new();

        let ids: Vec<EventId> = (0..5)
            .map(|i| {
                store
                    .append_event(&event(
                        vehicle,
                        None,
                        EventKind::SessionError,
                        t0() + Duration::minutes(i),
                    ))
                    .unwrap()
                    .id
            })
            .collect();

        let batch = store.unsynced_events(3).unwrap();
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), ids[..3]);

        store.mark_events_synced(&ids[..3]).unwrap();
        let rest = store.unsynced_events(10).unwrap();
        assert_eq!(rest.iter().map(|e| e.id).collect::<Vec<_>>(), ids[3..]);
    }

    #[test]
    fn test_media_flags_and_cleanup_candidates() {
        let store = SqliteStore::in_memory().unwrap();
        let vehicle = VehicleId::new();
        let mut with_media = event(vehicle, None, EventKind::SessionError, t0());
        with_media.media.snapshot = Some(PathBuf::from("/media/a.jpg"));
        let with_media = store.append_event(&with_media).unwrap();
        store
            .append_event(&event(vehicle, None, EventKind::SessionError, t0()))
            .unwrap();

        assert_eq!(store.events_pending_media(10).unwrap().len(), 1);

        let cutoff = t0() + Duration::hours(1);
        assert!(store.media_cleanup_candidates(cutoff).unwrap().is_empty());

        store.mark_events_synced(&[with_media.id]).unwrap();
        assert!(store.media_cleanup_candidates(cutoff).unwrap().is_empty());

        store.mark_event_media_synced(&with_media.id).unwrap();
        assert!(store.events_pending_media(10).unwrap().is_empty());
        let candidates = store.media_cleanup_candidates(cutoff).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(store.media_cleanup_candidates(t0()).unwrap().is_empty());

        store.clear_event_media(&with_media.id).unwrap();
        let cleared = store.get_event(&with_media.id).unwrap().unwrap();
        assert!(cleared.media.is_empty());
        assert!(cleared.domain_synced && cleared.media_synced);
    }

    #[test]
    fn test_telemetry_purge_only_synced() {
        let store = SqliteStore::in_memory().unwrap();
        let mut metrics = BTreeMap::new();
        metrics.insert("cpu_load".to_string(), 0.5);

        let old = TelemetrySample::new("hw", metrics.clone(), t0());
        let unsynced_old = TelemetrySample::new("hw", metrics.clone(), t0());
        let recent = TelemetrySample::new("hw", metrics, t0() + Duration::days(10));
        for sample in [&old, &unsynced_old, &recent] {
            store.append_telemetry(sample).unwrap();
        }

        store.mark_telemetry_synced(&old.id).unwrap();
        store.mark_telemetry_synced(&recent.id).unwrap();

        let unsynced = store.unsynced_telemetry(10).unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].metrics.get("cpu_load"), Some(&0.5));

        let deleted = store.purge_synced_telemetry(t0() + Duration::days(7)).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.telemetry_count().unwrap(), 2);
    }

    #[test]
    fn test_alerts() {
        let store = SqliteStore::in_memory().unwrap();
        let alert = Alert {
            id: AlertId::new(),
            event_id: None,
            driver_id: Some(DriverId::new()),
            vehicle_id: VehicleId::new(),
            session_id: None,
            timestamp: t0(),
            kind: AlertKind::InactiveDriver,
            description: "Driver inactive".into(),
            viewed: false,
        };
        store.insert_alert(&alert).unwrap();
        assert_eq!(store.pending_alerts().unwrap(), vec![alert.clone()]);

        assert!(store.mark_alert_viewed(&alert.id).unwrap());
        assert!(store.pending_alerts().unwrap().is_empty());
        assert!(!store.mark_alert_viewed(&AlertId::new()).unwrap());
    }

    #[test]
    fn test_watermarks() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(
            store.get_watermark(SyncTable::Events).unwrap(),
            SyncWatermark::default()
        );

        store.record_push(SyncTable::Events, t0(), Some("evt-1")).unwrap();
        store
            .record_push(SyncTable::Events, t0() + Duration::minutes(1), None)
            .unwrap();
        store.record_pull(SyncTable::Events, t0()).unwrap();

        let watermark = store.get_watermark(SyncTable::Events).unwrap();
        assert_eq!(watermark.last_pushed_at, Some(t0() + Duration::minutes(1)));
        assert_eq!(watermark.last_pulled_at, Some(t0()));
        assert_eq!(watermark.last_local_id.as_deref(), Some("evt-1"));
    }

    #[test]
    fn test_finished_sessions_sync_once() {
        let store = SqliteStore::in_memory().unwrap();
        let vehicle = VehicleId::new();
        let driver = saved_driver(&store);
        let session = open(&store, driver.id, vehicle, t0());

        assert!(store.unsynced_finished_sessions(10).unwrap().is_empty());

        store
            .commit_transition(&SessionTransition {
                close: Some((session.session_id, t0() + Duration::hours(2))),
                ..Default::default()
            })
            .unwrap();

        let pending = store.unsynced_finished_sessions(10).unwrap();
        assert_eq!(pending.len(), 1);

        store.mark_session_synced(&session.session_id).unwrap();
        assert!(store.unsynced_finished_sessions(10).unwrap().is_empty());
    }
}
