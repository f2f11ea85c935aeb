//! Outcomes reported by the session engine

use drivewatch_util::{AgentError, AgentResult, DriverId, EventId, SessionId};
use std::fmt;

/// What a badge scan did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A new session was opened, possibly replacing another driver's
    SessionStarted {
        session_id: SessionId,
        driver_id: DriverId,
        replaced: Option<SessionId>,
        /// Driver record still holds placeholder data
        provisional: bool,
    },

    /// The scanning driver's own session was closed
    SessionEnded {
        session_id: SessionId,
        driver_id: DriverId,
        duration: chrono::Duration,
    },

    /// Scan refused; no session changed
    Rejected {
        driver_id: DriverId,
        reason: RejectReason,
    },
}

impl ScanOutcome {
    /// Surface a rejection as its error for callers that do not branch on it
    pub fn into_result(self) -> AgentResult<ScanOutcome> {
        match self {
            ScanOutcome::Rejected {
                driver_id,
                reason: RejectReason::InactiveDriver,
            } => Err(AgentError::InactiveDriver(driver_id)),
            other => Ok(other),
        }
    }
}

/// Why a scan was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InactiveDriver,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InactiveDriver => f.write_str("driver is not active"),
        }
    }
}

/// Result of the continuous-driving guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationStatus {
    Idle,
    WithinLimit {
        session_id: SessionId,
        elapsed: chrono::Duration,
    },
    /// Limit exceeded; alert raised and event journaled, session left open
    Exceeded {
        session_id: SessionId,
        elapsed: chrono::Duration,
        event_id: EventId,
    },
}
