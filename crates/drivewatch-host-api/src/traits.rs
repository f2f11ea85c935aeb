//! Collaborator capability traits

use async_trait::async_trait;
use drivewatch_api::{
    AlertLevel, DriverPayload, Event, EventBatch, SessionRecord, TelemetryRecord, VehiclePayload,
};
use drivewatch_util::{AgentError, DriverId, NetworkError, VehicleId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from collaborator operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HostError {
    /// Whether retrying on a later tick may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, HostError::Network(_) | HostError::Io(_))
    }
}

impl From<HostError> for AgentError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::Network(net) => AgentError::Network(net),
            HostError::NotFound(what) => AgentError::NotFound(what),
            other => AgentError::System(other.to_string()),
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// Renders alert text to the operator
pub trait Alerter: Send + Sync {
    fn notify(&self, level: AlertLevel, message: &str);
}

/// Central service reached over the network
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// `POST /events`; the whole batch is acknowledged or none of it is
    async fn post_events(&self, batch: &EventBatch) -> HostResult<()>;

    /// `POST /telemetry`
    async fn post_telemetry(&self, record: &TelemetryRecord) -> HostResult<()>;

    /// `POST /sessions` (idempotent upsert)
    async fn post_session(&self, record: &SessionRecord) -> HostResult<()>;

    /// `GET /vehicles/by-plate?plate=`; unknown plate is [`HostError::NotFound`]
    async fn fetch_vehicle_by_plate(&self, plate: &str) -> HostResult<VehiclePayload>;

    /// `GET /vehicles/{id}/drivers`
    async fn fetch_vehicle_drivers(&self, vehicle: &VehicleId) -> HostResult<Vec<DriverPayload>>;

    /// `GET /drivers/{id}`; unknown driver is [`HostError::NotFound`]
    async fn fetch_driver(&self, id: &DriverId) -> HostResult<DriverPayload>;
}

/// Hands event media off for upload
#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Succeeds only when every media file of the event was accepted
    async fn upload(&self, event: &Event) -> HostResult<()>;
}

/// Produces a flat record of device metrics
pub trait MetricsSource: Send + Sync {
    fn collect(&self) -> HostResult<BTreeMap<String, f64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_map_to_agent_network() {
        let err: AgentError = HostError::Network(NetworkError::Timeout).into();
        assert!(matches!(err, AgentError::Network(NetworkError::Timeout)));

        let err: AgentError = HostError::NotFound("driver".into()).into();
        assert!(matches!(err, AgentError::NotFound(_)));

        assert!(HostError::Network(NetworkError::Http { status: 502 }).is_transient());
        assert!(!HostError::Decode("bad json".into()).is_transient());
    }
}
