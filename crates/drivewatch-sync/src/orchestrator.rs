//! Sync orchestrator: drains the local journal and pulls provisioning data
//!
//! Every push is retried by polling: a failed pass leaves its records
//! unsynced and the next tick selects them again. Network failures are
//! logged and reported, never returned as errors; only local store failures
//! are `Err`.

use chrono::{DateTime, Utc};
use drivewatch_api::{
    DeviceConfig, EventBatch, OperationalState, SessionRecord, SyncTable, TelemetryRecord, Vehicle,
};
use drivewatch_config::SyncPolicy;
use drivewatch_core::{DriverRegistry, SelectiveWrite};
use drivewatch_host_api::{CloudClient, MediaUploader};
use drivewatch_store::Store;
use drivewatch_util::{AgentResult, VehicleId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Finished sessions sent per pass
const FINISHED_SESSIONS_PER_PASS: usize = 20;

/// Outcome of one push pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub selected: usize,
    pub synced: usize,
    pub failed: usize,
}

impl PassReport {
    pub fn is_idle(&self) -> bool {
        self.selected == 0
    }
}

/// Outcome of a provisioning pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub vehicle: Vehicle,
    pub drivers_created: usize,
    pub drivers_updated: usize,
    pub drivers_skipped: usize,
}

pub struct SyncOrchestrator {
    store: Arc<dyn Store>,
    cloud: Arc<dyn CloudClient>,
    uploader: Arc<dyn MediaUploader>,
    registry: DriverRegistry,
    policy: SyncPolicy,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        cloud: Arc<dyn CloudClient>,
        uploader: Arc<dyn MediaUploader>,
        registry: DriverRegistry,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            store,
            cloud,
            uploader,
            registry,
            policy,
        }
    }

    /// Push the oldest unsynced events as one batch.
    ///
    /// The remote acknowledges the whole batch or none of it; on success every
    /// event in it is flagged in a single store transaction.
    pub async fn push_events(&self, now: DateTime<Utc>) -> AgentResult<PassReport> {
        let events = self.store.unsynced_events(self.policy.event_batch_size)?;
        let Some(last) = events.last() else {
            return Ok(PassReport::default());
        };

        let mut report = PassReport {
            selected: events.len(),
            ..Default::default()
        };

        match self.cloud.post_events(&EventBatch::from_events(&events)).await {
            Ok(()) => {
                let ids: Vec<_> = events.iter().map(|e| e.id).collect();
                self.store.mark_events_synced(&ids)?;
                self.store
                    .record_push(SyncTable::Events, now, Some(last.id.to_string().as_str()))?;
                report.synced = ids.len();
                info!(count = ids.len(), last_event = %last.id, "Events pushed");
            }
            Err(e) => {
                warn!(count = events.len(), error = %e, "Event push failed, will retry");
                report.failed = events.len();
            }
        }

        Ok(report)
    }

    /// Push unsynced telemetry one record at a time; each is flagged on its own success
    pub async fn push_telemetry(&self, now: DateTime<Utc>) -> AgentResult<PassReport> {
        let samples = self
            .store
            .unsynced_telemetry(self.policy.telemetry_batch_size)?;
        let mut report = PassReport {
            selected: samples.len(),
            ..Default::default()
        };
        let mut last_synced = None;

        for sample in &samples {
            match self.cloud.post_telemetry(&TelemetryRecord::from(sample)).await {
                Ok(()) => {
                    self.store.mark_telemetry_synced(&sample.id)?;
                    report.synced += 1;
                    last_synced = Some(sample.id);
                }
                Err(e) => {
                    warn!(telemetry_id = %sample.id, error = %e, "Telemetry push failed, will retry");
                    report.failed += 1;
                }
            }
        }

        if let Some(id) = last_synced {
            self.store
                .record_push(SyncTable::Telemetry, now, Some(id.to_string().as_str()))?;
        }
        if !report.is_idle() {
            info!(synced = report.synced, selected = report.selected, "Telemetry pushed");
        }
        Ok(report)
    }

    /// Send finished sessions not yet acknowledged, then re-send the active one.
    ///
    /// The remote treats `POST /sessions` as an upsert keyed by session id, so
    /// resending the active session every cycle is harmless.
    pub async fn push_sessions(
        &self,
        vehicle: VehicleId,
        now: DateTime<Utc>,
    ) -> AgentResult<PassReport> {
        let finished = self
            .store
            .unsynced_finished_sessions(FINISHED_SESSIONS_PER_PASS)?;
        let active = self.store.active_session(&vehicle)?;

        let mut report = PassReport {
            selected: finished.len() + usize::from(active.is_some()),
            ..Default::default()
        };
        let mut pushed_any = false;

        for session in &finished {
            match self
                .cloud
                .post_session(&SessionRecord::from_session(session, now))
                .await
            {
                Ok(()) => {
                    self.store.mark_session_synced(&session.session_id)?;
                    report.synced += 1;
                    pushed_any = true;
                    debug!(session_id = %session.session_id, "Finished session pushed");
                }
                Err(e) => {
                    warn!(session_id = %session.session_id, error = %e, "Session push failed, will retry");
                    report.failed += 1;
                }
            }
        }

        if let Some(session) = active {
            match self
                .cloud
                .post_session(&SessionRecord::from_session(&session, now))
                .await
            {
                Ok(()) => {
                    report.synced += 1;
                    pushed_any = true;
                }
                Err(e) => {
                    warn!(session_id = %session.session_id, error = %e, "Active session push failed");
                    report.failed += 1;
                }
            }
        }

        if pushed_any {
            self.store.record_push(SyncTable::Sessions, now, None)?;
        }
        Ok(report)
    }

    /// Hand pending event media to the uploader; flag only on full success
    pub async fn push_media(&self) -> AgentResult<PassReport> {
        let events = self
            .store
            .events_pending_media(self.policy.media_batch_size)?;
        let mut report = PassReport {
            selected: events.len(),
            ..Default::default()
        };

        for event in &events {
            match self.uploader.upload(event).await {
                Ok(()) => {
                    self.store.mark_event_media_synced(&event.id)?;
                    report.synced += 1;
                }
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Media upload failed, will retry");
                    report.failed += 1;
                }
            }
        }

        if !report.is_idle() {
            info!(uploaded = report.synced, failed = report.failed, "Media pass complete");
        }
        Ok(report)
    }

    /// Pull the vehicle by plate and its assigned drivers, then bind this
    /// device to the vehicle.
    ///
    /// Unlike the push passes, failures here are returned: the caller decides
    /// whether to run unprovisioned and retry.
    pub async fn provision(
        &self,
        plate: &str,
        hardware_id: &str,
        firmware_version: &str,
        now: DateTime<Utc>,
    ) -> AgentResult<ProvisionReport> {
        info!(plate, hardware_id, "Provisioning from central service");

        let payload = self.cloud.fetch_vehicle_by_plate(plate).await?;
        let vehicle = self.registry.upsert_vehicle(&payload, now)?;
        self.store.record_pull(SyncTable::Vehicles, now)?;

        let drivers = self.cloud.fetch_vehicle_drivers(&vehicle.id).await?;
        let mut report = ProvisionReport {
            vehicle: vehicle.clone(),
            drivers_created: 0,
            drivers_updated: 0,
            drivers_skipped: 0,
        };
        for driver in &drivers {
            match self.registry.create_or_update_selective(driver, false, now)? {
                SelectiveWrite::Created => report.drivers_created += 1,
                SelectiveWrite::Updated => report.drivers_updated += 1,
                SelectiveWrite::Skipped => report.drivers_skipped += 1,
            }
        }
        self.store.record_pull(SyncTable::Drivers, now)?;

        self.store.save_device_config(&DeviceConfig {
            hardware_id: hardware_id.to_string(),
            vehicle_id: Some(vehicle.id),
            state: OperationalState::Active,
            firmware_version: firmware_version.to_string(),
            updated_at: now,
        })?;

        info!(
            vehicle_id = %vehicle.id,
            plate = %vehicle.plate,
            created = report.drivers_created,
            updated = report.drivers_updated,
            skipped = report.drivers_skipped,
            "Provisioning complete"
        );
        Ok(report)
    }
}
