//! Strongly-typed identifiers for drivewatch
//!
//! Every entity identifier is a UUID on the wire and in the local store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::AgentError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from text, rejecting anything that is not a UUID
            pub fn parse(value: &str) -> Result<Self, AgentError> {
                Uuid::parse_str(value.trim()).map(Self).map_err(|e| {
                    AgentError::validation(format!(
                        "invalid {} '{}': {}",
                        stringify!($name),
                        value,
                        e
                    ))
                })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = AgentError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

uuid_id!(
    /// Driver identifier, also the payload of a badge scan
    DriverId
);

uuid_id!(
    /// Vehicle identifier assigned by the central service
    VehicleId
);

uuid_id!(
    /// Driving session identifier; the cloud correlation key, never reused
    SessionId
);

uuid_id!(
    /// Journal event identifier
    EventId
);

uuid_id!(
    /// Telemetry sample identifier
    TelemetryId
);

uuid_id!(
    /// Local alert identifier
    AlertId
);

impl DriverId {
    /// Parse a raw scanner payload.
    ///
    /// Badges may encode either the bare UUID or `driver:<uuid>`.
    pub fn from_scan(raw: &str) -> Result<Self, AgentError> {
        let trimmed = raw.trim();
        let value = trimmed.strip_prefix("driver:").unwrap_or(trimmed);
        Self::parse(value)
    }

    /// First block of the UUID, for short human-readable labels
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}
