//! Error types for drivewatch

use thiserror::Error;

use crate::{DriverId, VehicleId};

/// Transport-level failure talking to the central service.
///
/// All variants are transient: the failed pass is retried on the next tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("remote returned HTTP {status}")]
    Http { status: u16 },
}

impl NetworkError {
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Http { status } => Some(*status),
            _ => None,
        }
    }
}

/// Core error type for drivewatch operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Driver {0} is not active")]
    InactiveDriver(DriverId),

    #[error("No active session for vehicle {0}")]
    NoActiveSession(VehicleId),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Session could not be persisted: {0}")]
    SessionPersistence(String),

    #[error("System error: {0}")]
    System(String),
}

impl AgentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn system(msg: impl Into<String>) -> Self {
        Self::System(msg.into())
    }

    /// Whether the failure is expected to clear up on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::Network(_) | AgentError::SessionPersistence(_)
        )
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
