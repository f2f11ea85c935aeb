//! Per-vehicle session state
//!
//! State is derived from the store on every decision rather than cached, so it
//! is identical before and after a restart.

use chrono::{DateTime, Utc};
use drivewatch_api::Session;
use drivewatch_util::{DriverId, SessionId};

/// Assignment state of one vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleState {
    Idle,
    Active {
        driver_id: DriverId,
        session_id: SessionId,
        started_at: DateTime<Utc>,
    },
}

impl VehicleState {
    pub fn from_active(session: Option<&Session>) -> Self {
        match session {
            Some(s) if s.is_active() => VehicleState::Active {
                driver_id: s.driver_id,
                session_id: s.session_id,
                started_at: s.started_at,
            },
            _ => VehicleState::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, VehicleState::Active { .. })
    }
}

/// Who is driving right now, for display
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentAssignment {
    pub driver_id: DriverId,
    pub driver_name: String,
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub elapsed: chrono::Duration,
    /// Driver record still holds placeholder data
    pub provisional: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivewatch_util::VehicleId;

    #[test]
    fn state_from_session() {
        assert_eq!(VehicleState::from_active(None), VehicleState::Idle);

        let now = drivewatch_util::now();
        let mut session = Session::open(DriverId::new(), VehicleId::new(), now);
        let state = VehicleState::from_active(Some(&session));
        assert!(state.is_active());
        assert!(matches!(
            state,
            VehicleState::Active { session_id, .. } if session_id == session.session_id
        ));

        session.state = drivewatch_api::SessionState::Finished;
        assert_eq!(VehicleState::from_active(Some(&session)), VehicleState::Idle);
    }
}
