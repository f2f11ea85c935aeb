//! Interval scheduling for the agent control loop
//!
//! The loop is cooperative: on every tick it asks the scheduler which
//! subsystems are due, runs each one to completion, then marks it as run.
//! All timing state lives in this struct and is passed by reference into the
//! loop, so there are no process-wide timers.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::MonotonicInstant;

/// Periodic passes driven by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    SessionCheck,
    TelemetryCollect,
    EventPush,
    TelemetryPush,
    SessionPush,
    MediaPush,
    Retention,
}

impl Subsystem {
    /// Fixed order in which due subsystems run within one tick
    pub const ALL: [Subsystem; 7] = [
        Subsystem::SessionCheck,
        Subsystem::TelemetryCollect,
        Subsystem::EventPush,
        Subsystem::TelemetryPush,
        Subsystem::SessionPush,
        Subsystem::MediaPush,
        Subsystem::Retention,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::SessionCheck => "session_check",
            Subsystem::TelemetryCollect => "telemetry_collect",
            Subsystem::EventPush => "event_push",
            Subsystem::TelemetryPush => "telemetry_push",
            Subsystem::SessionPush => "session_push",
            Subsystem::MediaPush => "media_push",
            Subsystem::Retention => "retention",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Slot {
    interval: Duration,
    last_run: MonotonicInstant,
    forced: bool,
}

/// Last-run bookkeeping for every scheduled subsystem
#[derive(Debug, Default)]
pub struct Scheduler {
    slots: HashMap<Subsystem, Slot>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a subsystem.
    ///
    /// It first becomes due one full interval after `start`.
    pub fn register(&mut self, subsystem: Subsystem, interval: Duration, start: MonotonicInstant) {
        self.slots.insert(
            subsystem,
            Slot {
                interval,
                last_run: start,
                forced: false,
            },
        );
    }

    /// Builder-style registration
    pub fn with(mut self, subsystem: Subsystem, interval: Duration, start: MonotonicInstant) -> Self {
        self.register(subsystem, interval, start);
        self
    }

    /// Whether `now - last_run >= interval`. Unregistered subsystems never run.
    pub fn is_due(&self, subsystem: Subsystem, now: MonotonicInstant) -> bool {
        match self.slots.get(&subsystem) {
            Some(slot) => slot.forced || now.duration_since(slot.last_run) >= slot.interval,
            None => false,
        }
    }

    /// All due subsystems, in [`Subsystem::ALL`] order
    pub fn due(&self, now: MonotonicInstant) -> Vec<Subsystem> {
        Subsystem::ALL
            .into_iter()
            .filter(|s| self.is_due(*s, now))
            .collect()
    }

    pub fn mark_run(&mut self, subsystem: Subsystem, now: MonotonicInstant) {
        if let Some(slot) = self.slots.get_mut(&subsystem) {
            slot.last_run = now;
            slot.forced = false;
        }
    }

    /// Make a subsystem due on the next check regardless of its interval
    pub fn force_due(&mut self, subsystem: Subsystem) {
        if let Some(slot) = self.slots.get_mut(&subsystem) {
            slot.forced = true;
        }
    }
}
