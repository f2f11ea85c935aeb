//! Mock collaborators for testing

use async_trait::async_trait;
use drivewatch_api::{
    AlertLevel, DriverPayload, Event, EventBatch, SessionRecord, TelemetryRecord, VehiclePayload,
};
use drivewatch_util::{DriverId, EventId, NetworkError, TelemetryId, VehicleId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::{Alerter, CloudClient, HostError, HostResult, MediaUploader, MetricsSource};

/// Records every alert rendered
#[derive(Debug, Default)]
pub struct MockAlerter {
    shown: Mutex<Vec<(AlertLevel, String)>>,
}

impl MockAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<(AlertLevel, String)> {
        self.shown.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.shown().into_iter().map(|(_, m)| m).collect()
    }

    pub fn count(&self, level: AlertLevel) -> usize {
        self.shown.lock().unwrap().iter().filter(|(l, _)| *l == level).count()
    }
}

impl Alerter for MockAlerter {
    fn notify(&self, level: AlertLevel, message: &str) {
        self.shown.lock().unwrap().push((level, message.to_string()));
    }
}

/// In-memory central service for unit/integration testing
#[derive(Default)]
pub struct MockCloud {
    vehicles: Mutex<HashMap<String, VehiclePayload>>,
    vehicle_drivers: Mutex<HashMap<VehicleId, Vec<DriverPayload>>>,
    drivers: Mutex<HashMap<DriverId, DriverPayload>>,

    /// When set, every call fails with this error
    pub failure: Arc<Mutex<Option<NetworkError>>>,

    /// Telemetry samples the remote refuses
    pub rejected_telemetry: Arc<Mutex<HashSet<TelemetryId>>>,

    pub event_batches: Mutex<Vec<EventBatch>>,
    pub telemetry: Mutex<Vec<TelemetryRecord>>,
    pub sessions: Mutex<Vec<SessionRecord>>,

    driver_fetches: AtomicUsize,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a dead link (connection refused on every call)
    pub fn set_offline(&self, offline: bool) {
        *self.failure.lock().unwrap() = offline
            .then(|| NetworkError::Connection("connection refused".into()));
    }

    pub fn set_failure(&self, failure: Option<NetworkError>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn add_vehicle(&self, vehicle: VehiclePayload, drivers: Vec<DriverPayload>) {
        for driver in &drivers {
            self.add_driver(driver.clone());
        }
        self.vehicle_drivers.lock().unwrap().insert(vehicle.id, drivers);
        self.vehicles
            .lock()
            .unwrap()
            .insert(vehicle.plate.clone(), vehicle);
    }

    pub fn add_driver(&self, driver: DriverPayload) {
        self.drivers.lock().unwrap().insert(driver.id, driver);
    }

    pub fn reject_telemetry(&self, id: TelemetryId) {
        self.rejected_telemetry.lock().unwrap().insert(id);
    }

    /// Ids of every event acknowledged, in the order received
    pub fn received_event_ids(&self) -> Vec<EventId> {
        self.event_batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.events.iter().map(|e| e.id))
            .collect()
    }

    pub fn received_sessions(&self) -> Vec<SessionRecord> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn received_telemetry(&self) -> Vec<TelemetryRecord> {
        self.telemetry.lock().unwrap().clone()
    }

    pub fn driver_fetches(&self) -> usize {
        self.driver_fetches.load(Ordering::SeqCst)
    }

    fn check_link(&self) -> HostResult<()> {
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(HostError::Network(err)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CloudClient for MockCloud {
    async fn post_events(&self, batch: &EventBatch) -> HostResult<()> {
        self.check_link()?;
        self.event_batches.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn post_telemetry(&self, record: &TelemetryRecord) -> HostResult<()> {
        self.check_link()?;
        if self.rejected_telemetry.lock().unwrap().contains(&record.id) {
            return Err(HostError::Network(NetworkError::Http { status: 422 }));
        }
        self.telemetry.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn post_session(&self, record: &SessionRecord) -> HostResult<()> {
        self.check_link()?;
        self.sessions.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn fetch_vehicle_by_plate(&self, plate: &str) -> HostResult<VehiclePayload> {
        self.check_link()?;
        self.vehicles
            .lock()
            .unwrap()
            .get(plate)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("vehicle with plate {}", plate)))
    }

    async fn fetch_vehicle_drivers(&self, vehicle: &VehicleId) -> HostResult<Vec<DriverPayload>> {
        self.check_link()?;
        Ok(self
            .vehicle_drivers
            .lock()
            .unwrap()
            .get(vehicle)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_driver(&self, id: &DriverId) -> HostResult<DriverPayload> {
        self.driver_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_link()?;
        self.drivers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("driver {}", id)))
    }
}

/// Media uploader that accepts everything except configured events
#[derive(Debug, Default)]
pub struct MockUploader {
    pub failing: Mutex<HashSet<EventId>>,
    uploaded: Mutex<Vec<EventId>>,
}

impl MockUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, id: EventId) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn uploaded(&self) -> Vec<EventId> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaUploader for MockUploader {
    async fn upload(&self, event: &Event) -> HostResult<()> {
        if self.failing.lock().unwrap().contains(&event.id) {
            return Err(HostError::Network(NetworkError::Timeout));
        }
        self.uploaded.lock().unwrap().push(event.id);
        Ok(())
    }
}

/// Metrics source returning a fixed record
#[derive(Debug, Default)]
pub struct MockMetrics {
    pub metrics: Mutex<BTreeMap<String, f64>>,
}

impl MockMetrics {
    pub fn with(metrics: impl IntoIterator<Item = (&'static str, f64)>) -> Self {
        Self {
            metrics: Mutex::new(
                metrics
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
        }
    }
}

impl MetricsSource for MockMetrics {
    fn collect(&self) -> HostResult<BTreeMap<String, f64>> {
        Ok(self.metrics.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(id: DriverId) -> DriverPayload {
        DriverPayload {
            id,
            badge_hash: Some("hash".into()),
            display_name: Some("Ana".into()),
            active: Some(true),
            embedding: None,
        }
    }

    #[tokio::test]
    async fn mock_cloud_lookup() {
        let cloud = MockCloud::new();
        let vehicle = VehiclePayload {
            id: VehicleId::new(),
            plate: "ABC-123".into(),
            internal_number: None,
        };
        let id = DriverId::new();
        cloud.add_vehicle(vehicle.clone(), vec![driver(id)]);

        assert_eq!(cloud.fetch_vehicle_by_plate("ABC-123").await.unwrap(), vehicle);
        assert_eq!(cloud.fetch_vehicle_drivers(&vehicle.id).await.unwrap().len(), 1);
        assert_eq!(cloud.fetch_driver(&id).await.unwrap().id, id);
        assert!(matches!(
            cloud.fetch_driver(&DriverId::new()).await,
            Err(HostError::NotFound(_))
        ));
        assert_eq!(cloud.driver_fetches(), 2);
    }

    #[tokio::test]
    async fn mock_cloud_offline() {
        let cloud = MockCloud::new();
        cloud.set_offline(true);

        let result = cloud.post_events(&EventBatch { events: vec![] }).await;
        assert!(matches!(
            result,
            Err(HostError::Network(NetworkError::Connection(_)))
        ));
        assert!(cloud.received_event_ids().is_empty());

        cloud.set_offline(false);
        cloud.post_events(&EventBatch { events: vec![] }).await.unwrap();
    }

    #[test]
    fn mock_alerter_records() {
        let alerter = MockAlerter::new();
        alerter.notify(AlertLevel::Critical, "limit");
        alerter.notify(AlertLevel::Info, "welcome");

        assert_eq!(alerter.count(AlertLevel::Critical), 1);
        assert_eq!(alerter.messages(), vec!["limit", "welcome"]);
    }
}
