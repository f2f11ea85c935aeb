//! Persistence layer for drivewatchd
//!
//! Provides:
//! - Driver, vehicle and device configuration cache
//! - Driving sessions with atomic transitions
//! - Event journal and telemetry samples with sync flags
//! - Local alerts and sync watermarks

mod sqlite;
mod traits;

pub use sqlite::*;
pub use traits::*;

use drivewatch_util::{AgentError, SessionId};
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Event references unknown session {0}")]
    UnknownSession(SessionId),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => StoreError::Constraint(e.to_string()),
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for AgentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AgentError::NotFound(what),
            other => AgentError::Persistence(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
