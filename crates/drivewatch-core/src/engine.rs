//! Session engine: turns badge scans into session transitions

use chrono::{DateTime, Utc};
use drivewatch_api::{
    Alert, AlertKind, AlertLevel, Driver, Event, EventData, EventKind, MediaPaths, Session,
};
use drivewatch_config::SessionPolicy;
use drivewatch_host_api::{Alerter, CloudClient};
use drivewatch_store::{SessionTransition, Store};
use drivewatch_util::{
    AgentError, AgentResult, AlertId, DriverId, VehicleId, as_hours, format_duration,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::{
    CurrentAssignment, DriverRegistry, DurationStatus, Journal, RejectReason, ScanOutcome,
    VehicleState,
};

/// Longest raw scan payload copied into event metadata
const MAX_RAW_SCAN_LEN: usize = 64;

/// The session state machine for the vehicle this agent is installed in
pub struct SessionEngine {
    store: Arc<dyn Store>,
    registry: DriverRegistry,
    journal: Journal,
    cloud: Arc<dyn CloudClient>,
    alerter: Arc<dyn Alerter>,
    max_driving: Duration,
}

impl SessionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        cloud: Arc<dyn CloudClient>,
        alerter: Arc<dyn Alerter>,
        policy: &SessionPolicy,
    ) -> Self {
        info!(
            max_driving_hours = policy.max_driving_hours(),
            driver_max_age_secs = policy.driver_max_age.as_secs(),
            "Session engine initialized"
        );

        Self {
            registry: DriverRegistry::new(store.clone(), policy.driver_max_age),
            journal: Journal::new(store.clone()),
            store,
            cloud,
            alerter,
            max_driving: policy.max_driving,
        }
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Handle a raw scanner payload.
    ///
    /// A payload that is not a driver identifier journals an unidentified-driver
    /// event and returns [`AgentError::Validation`]; no session changes.
    pub async fn handle_scan(
        &self,
        vehicle: VehicleId,
        raw: &str,
        now: DateTime<Utc>,
    ) -> AgentResult<ScanOutcome> {
        match DriverId::from_scan(raw) {
            Ok(driver_id) => self.on_scan(vehicle, driver_id, now).await,
            Err(err) => {
                let raw: String = raw.trim().chars().take(MAX_RAW_SCAN_LEN).collect();
                warn!(vehicle_id = %vehicle, raw = %raw, "Unreadable badge scan");

                let data = EventData::new(EventKind::DriverUnidentified)
                    .alert_triggered()
                    .metadata(json!({ "raw_scan": raw, "reason": err.to_string() }));
                if let Err(e) = self.record_incident(
                    vehicle,
                    data,
                    AlertKind::UnidentifiedDriver,
                    AlertLevel::Warning,
                    "Badge not recognized. Please scan again.".to_string(),
                    now,
                ) {
                    error!(error = %e, "Failed to journal unidentified scan");
                }
                Err(err)
            }
        }
    }

    /// Apply a scan by a known driver identifier
    pub async fn on_scan(
        &self,
        vehicle: VehicleId,
        driver_id: DriverId,
        now: DateTime<Utc>,
    ) -> AgentResult<ScanOutcome> {
        let driver = self.resolve_driver(driver_id, now).await?;

        if !driver.active {
            let data = EventData::new(EventKind::DriverInactive)
                .driver(driver.id)
                .alert_triggered()
                .metadata(json!({ "driver_name": driver.display_name }));
            self.record_incident(
                vehicle,
                data,
                AlertKind::InactiveDriver,
                AlertLevel::Warning,
                format!(
                    "Driver {} is not active. Please contact dispatch.",
                    driver.display_name
                ),
                now,
            )?;

            info!(driver_id = %driver.id, vehicle_id = %vehicle, "Scan rejected: driver inactive");
            return Ok(ScanOutcome::Rejected {
                driver_id: driver.id,
                reason: RejectReason::InactiveDriver,
            });
        }

        let current = self.store.active_session(&vehicle)?;
        let provisional = DriverRegistry::is_minimal(&driver);

        match VehicleState::from_active(current.as_ref()) {
            VehicleState::Idle => {
                let session = Session::open(driver.id, vehicle, now);
                let session_id = session.session_id;
                let started = session_event(&session, EventKind::SessionStarted, now, provisional);

                self.commit(
                    vehicle,
                    driver.id,
                    SessionTransition {
                        close: None,
                        open: Some(session),
                        events: vec![started],
                    },
                    now,
                )?;

                info!(session_id = %session_id, driver_id = %driver.id, provisional, "Session started");
                self.alerter.notify(AlertLevel::Info, &welcome_message(&driver, provisional));

                Ok(ScanOutcome::SessionStarted {
                    session_id,
                    driver_id: driver.id,
                    replaced: None,
                    provisional,
                })
            }

            VehicleState::Active {
                driver_id: current_driver,
                session_id,
                started_at,
            } if current_driver == driver.id => {
                let duration = now - started_at;
                let ended = Event::from_data(
                    vehicle,
                    Some(session_id),
                    EventData::new(EventKind::SessionEnded)
                        .driver(driver.id)
                        .metadata(json!({ "duration_seconds": duration.num_seconds() })),
                    MediaPaths::default(),
                    now,
                );

                self.commit(
                    vehicle,
                    driver.id,
                    SessionTransition {
                        close: Some((session_id, now)),
                        open: None,
                        events: vec![ended],
                    },
                    now,
                )?;

                info!(
                    session_id = %session_id,
                    driver_id = %driver.id,
                    duration_secs = duration.num_seconds(),
                    "Session ended"
                );
                self.alerter.notify(
                    AlertLevel::Info,
                    &format!(
                        "Goodbye, {}. Session ended after {}.",
                        driver.display_name,
                        format_duration(duration.to_std().unwrap_or_default())
                    ),
                );

                Ok(ScanOutcome::SessionEnded {
                    session_id,
                    driver_id: driver.id,
                    duration,
                })
            }

            VehicleState::Active {
                driver_id: previous_driver,
                session_id: previous,
                started_at,
            } => {
                let ended = Event::from_data(
                    vehicle,
                    Some(previous),
                    EventData::new(EventKind::SessionEnded)
                        .driver(previous_driver)
                        .metadata(json!({
                            "duration_seconds": (now - started_at).num_seconds(),
                            "replaced_by": driver.id,
                        })),
                    MediaPaths::default(),
                    now,
                );
                let session = Session::open(driver.id, vehicle, now);
                let session_id = session.session_id;
                let started = session_event(&session, EventKind::SessionStarted, now, provisional);

                self.commit(
                    vehicle,
                    driver.id,
                    SessionTransition {
                        close: Some((previous, now)),
                        open: Some(session),
                        events: vec![ended, started],
                    },
                    now,
                )?;

                info!(
                    previous_session = %previous,
                    previous_driver = %previous_driver,
                    session_id = %session_id,
                    driver_id = %driver.id,
                    "Driver changed"
                );
                self.alerter.notify(AlertLevel::Info, &welcome_message(&driver, provisional));

                Ok(ScanOutcome::SessionStarted {
                    session_id,
                    driver_id: driver.id,
                    replaced: Some(previous),
                    provisional,
                })
            }
        }
    }

    /// Continuous-driving guard using the configured limit
    pub fn check_duration(&self, vehicle: VehicleId, now: DateTime<Utc>) -> AgentResult<DurationStatus> {
        self.check_duration_with_limit(vehicle, now, self.max_driving)
    }

    /// Raise a critical alert and journal an event when the active session
    /// has run longer than `max`. The session is never closed here.
    pub fn check_duration_with_limit(
        &self,
        vehicle: VehicleId,
        now: DateTime<Utc>,
        max: Duration,
    ) -> AgentResult<DurationStatus> {
        let Some(session) = self.store.active_session(&vehicle)? else {
            return Ok(DurationStatus::Idle);
        };

        let elapsed = session.elapsed(now);
        let limit = chrono::Duration::from_std(max)
            .map_err(|_| AgentError::validation("driving limit out of range"))?;
        if elapsed <= limit {
            return Ok(DurationStatus::WithinLimit {
                session_id: session.session_id,
                elapsed,
            });
        }

        let hours_elapsed = (as_hours(elapsed) * 100.0).round() / 100.0;
        let limit_hours = as_hours(limit);
        warn!(
            session_id = %session.session_id,
            driver_id = %session.driver_id,
            hours_elapsed,
            limit_hours,
            "Continuous driving limit exceeded"
        );

        let name = self
            .store
            .get_driver(&session.driver_id)?
            .map(|d| d.display_name)
            .unwrap_or_else(|| session.driver_id.to_string());

        let data = EventData::new(EventKind::DurationExceeded)
            .driver(session.driver_id)
            .alert_triggered()
            .metadata(json!({
                "limit_hours": limit_hours,
                "hours_elapsed": hours_elapsed,
            }));
        let event = self.record_incident(
            vehicle,
            data,
            AlertKind::DurationExceeded,
            AlertLevel::Critical,
            format!(
                "Driving limit exceeded: {} has been driving for {} (limit {}h). Please take a break.",
                name,
                format_duration(elapsed.to_std().unwrap_or_default()),
                limit_hours
            ),
            now,
        )?;

        Ok(DurationStatus::Exceeded {
            session_id: session.session_id,
            elapsed,
            event_id: event.id,
        })
    }

    /// Active driver of a vehicle, for display
    pub fn current_assignment(
        &self,
        vehicle: VehicleId,
        now: DateTime<Utc>,
    ) -> AgentResult<Option<CurrentAssignment>> {
        let Some(session) = self.store.active_session(&vehicle)? else {
            return Ok(None);
        };
        let driver = self
            .store
            .get_driver(&session.driver_id)?
            .ok_or_else(|| AgentError::not_found(format!("driver {}", session.driver_id)))?;

        Ok(Some(CurrentAssignment {
            driver_id: driver.id,
            provisional: DriverRegistry::is_minimal(&driver),
            driver_name: driver.display_name,
            session_id: session.session_id,
            started_at: session.started_at,
            elapsed: session.elapsed(now),
        }))
    }

    /// Alerts the operator has not acknowledged yet
    pub fn pending_alerts(&self) -> AgentResult<Vec<Alert>> {
        Ok(self.store.pending_alerts()?)
    }

    /// Operator acknowledgement of an alert
    pub fn acknowledge_alert(&self, id: AlertId) -> AgentResult<()> {
        if self.store.mark_alert_viewed(&id)? {
            info!(alert_id = %id, "Alert acknowledged");
            Ok(())
        } else {
            Err(AgentError::not_found(format!("alert {}", id)))
        }
    }

    /// Acknowledge every pending alert, returning how many were cleared
    pub fn acknowledge_pending(&self) -> AgentResult<usize> {
        let pending = self.store.pending_alerts()?;
        for alert in &pending {
            self.acknowledge_alert(alert.id)?;
        }
        Ok(pending.len())
    }

    async fn resolve_driver(&self, id: DriverId, now: DateTime<Utc>) -> AgentResult<Driver> {
        let driver = self.registry.ensure_driver(id)?;
        let cloud = Arc::clone(&self.cloud);
        let outcome = self
            .registry
            .refresh_conditionally(
                driver,
                move |id| async move { cloud.fetch_driver(&id).await },
                false,
                now,
            )
            .await?;
        Ok(outcome.into_driver())
    }

    /// Commit a transition; on failure journal a session-error event and
    /// report [`AgentError::SessionPersistence`]. Nothing of the transition is kept.
    fn commit(
        &self,
        vehicle: VehicleId,
        driver_id: DriverId,
        transition: SessionTransition,
        now: DateTime<Utc>,
    ) -> AgentResult<Option<Session>> {
        match self.store.commit_transition(&transition) {
            Ok(opened) => Ok(opened),
            Err(e) => {
                error!(vehicle_id = %vehicle, driver_id = %driver_id, error = %e, "Session transition failed");

                let data = EventData::new(EventKind::SessionError)
                    .driver(driver_id)
                    .alert_triggered()
                    .metadata(json!({ "error": e.to_string() }));
                if let Err(journal_err) = self.record_incident(
                    vehicle,
                    data,
                    AlertKind::SessionError,
                    AlertLevel::Critical,
                    "Session could not be recorded. Please scan again.".to_string(),
                    now,
                ) {
                    error!(error = %journal_err, "Failed to journal session error");
                }

                Err(AgentError::SessionPersistence(e.to_string()))
            }
        }
    }

    /// Render an alert, journal its event and keep it for acknowledgement
    fn record_incident(
        &self,
        vehicle: VehicleId,
        data: EventData,
        kind: AlertKind,
        level: AlertLevel,
        message: String,
        now: DateTime<Utc>,
    ) -> AgentResult<Event> {
        self.alerter.notify(level, &message);

        let event = self.journal.append_event(vehicle, data, None, now)?;
        let alert = Alert {
            id: AlertId::new(),
            event_id: Some(event.id),
            driver_id: event.driver_id,
            vehicle_id: vehicle,
            session_id: event.session_id,
            timestamp: now,
            kind,
            description: message,
            viewed: false,
        };
        self.store.insert_alert(&alert)?;
        Ok(event)
    }
}

fn session_event(session: &Session, kind: EventKind, now: DateTime<Utc>, provisional: bool) -> Event {
    Event::from_data(
        session.vehicle_id,
        Some(session.session_id),
        EventData::new(kind)
            .driver(session.driver_id)
            .metadata(json!({
                "assignment_kind": session.assignment_kind,
                "provisional_driver": provisional,
            })),
        MediaPaths::default(),
        now,
    )
}

fn welcome_message(driver: &Driver, provisional: bool) -> String {
    if provisional {
        format!(
            "Welcome, {}. Session started with provisional driver data.",
            driver.display_name
        )
    } else {
        format!("Welcome, {}. Session started.", driver.display_name)
    }
}
