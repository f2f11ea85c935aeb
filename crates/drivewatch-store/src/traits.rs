//! Store trait definitions

use chrono::{DateTime, Utc};
use drivewatch_api::{
    Alert, DeviceConfig, Driver, Event, Session, SyncTable, SyncWatermark, TelemetrySample,
    Vehicle,
};
use drivewatch_util::{AlertId, DriverId, EventId, SessionId, TelemetryId, VehicleId};

use crate::StoreResult;

/// Session change committed as a single transaction.
///
/// The close (if any) is applied before the open, then every event is
/// appended, so a driver swap leaves either both changes or neither.
#[derive(Debug, Clone, Default)]
pub struct SessionTransition {
    /// Active session to finish, and when
    pub close: Option<(SessionId, DateTime<Utc>)>,
    /// New active session
    pub open: Option<Session>,
    pub events: Vec<Event>,
}

/// Main store trait
pub trait Store: Send + Sync {
    // Drivers

    fn get_driver(&self, id: &DriverId) -> StoreResult<Option<Driver>>;

    /// Insert or replace a driver record
    fn save_driver(&self, driver: &Driver) -> StoreResult<()>;

    fn list_drivers(&self) -> StoreResult<Vec<Driver>>;

    // Vehicles

    fn get_vehicle(&self, id: &VehicleId) -> StoreResult<Option<Vehicle>>;

    fn get_vehicle_by_plate(&self, plate: &str) -> StoreResult<Option<Vehicle>>;

    fn upsert_vehicle(&self, vehicle: &Vehicle) -> StoreResult<()>;

    // Device configuration (singleton)

    fn load_device_config(&self) -> StoreResult<Option<DeviceConfig>>;

    fn save_device_config(&self, config: &DeviceConfig) -> StoreResult<()>;

    // Sessions

    /// The active session of a vehicle, if any
    fn active_session(&self, vehicle: &VehicleId) -> StoreResult<Option<Session>>;

    fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>>;

    /// Apply a session transition atomically; returns the opened session with its row id
    fn commit_transition(&self, transition: &SessionTransition) -> StoreResult<Option<Session>>;

    /// Finished sessions whose final record has not been acknowledged, oldest first
    fn unsynced_finished_sessions(&self, limit: usize) -> StoreResult<Vec<Session>>;

    fn mark_session_synced(&self, id: &SessionId) -> StoreResult<()>;

    /// All sessions of a vehicle, oldest first
    fn sessions_for_vehicle(&self, vehicle: &VehicleId) -> StoreResult<Vec<Session>>;

    // Event journal

    /// Append an event; its session reference, if any, must exist.
    /// Returns the event with its sequence number.
    fn append_event(&self, event: &Event) -> StoreResult<Event>;

    fn get_event(&self, id: &EventId) -> StoreResult<Option<Event>>;

    /// Most recent events, newest first
    fn recent_events(&self, limit: usize) -> StoreResult<Vec<Event>>;

    /// Oldest events not yet acknowledged by the central service
    fn unsynced_events(&self, limit: usize) -> StoreResult<Vec<Event>>;

    /// Flag a whole batch as synced in one transaction
    fn mark_events_synced(&self, ids: &[EventId]) -> StoreResult<()>;

    /// Oldest events with media whose upload has not completed
    fn events_pending_media(&self, limit: usize) -> StoreResult<Vec<Event>>;

    fn mark_event_media_synced(&self, id: &EventId) -> StoreResult<()>;

    /// Fully synced events older than `cutoff` that still reference media files
    fn media_cleanup_candidates(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Event>>;

    /// Null the media paths of an event, keeping the row
    fn clear_event_media(&self, id: &EventId) -> StoreResult<()>;

    // Telemetry

    fn append_telemetry(&self, sample: &TelemetrySample) -> StoreResult<()>;

    fn unsynced_telemetry(&self, limit: usize) -> StoreResult<Vec<TelemetrySample>>;

    fn mark_telemetry_synced(&self, id: &TelemetryId) -> StoreResult<()>;

    /// Delete synced samples older than `cutoff`; returns the number deleted
    fn purge_synced_telemetry(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    fn telemetry_count(&self) -> StoreResult<usize>;

    // Alerts

    fn insert_alert(&self, alert: &Alert) -> StoreResult<()>;

    /// Alerts not yet acknowledged, oldest first
    fn pending_alerts(&self) -> StoreResult<Vec<Alert>>;

    /// Returns false if no such alert exists
    fn mark_alert_viewed(&self, id: &AlertId) -> StoreResult<bool>;

    // Sync watermarks

    fn get_watermark(&self, table: SyncTable) -> StoreResult<SyncWatermark>;

    fn record_push(
        &self,
        table: SyncTable,
        at: DateTime<Utc>,
        last_local_id: Option<&str>,
    ) -> StoreResult<()>;

    fn record_pull(&self, table: SyncTable, at: DateTime<Utc>) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
