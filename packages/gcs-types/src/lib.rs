//! # gcs-types
//!
//! Shared wire records for the ground-control stack.
//!
//! These types are used by:
//! - `gcs-broker`: validating inbound commands, framing subscriber envelopes,
//!   canonicalising serial telemetry lines
//! - `flight-sim`: emitting one canonical telemetry record per tick
//! - Dashboards and mission tools: everything they see on the wire is one of
//!   these shapes serialised as JSON
//!
//! ## Conventions
//!
//! - Angles in degrees, distances in meters, speeds in m/s, pressure in hPa,
//!   temperature in °C. Yaw/heading/wind direction are wrapped into [0,360).
//! - Altitude is AGL unless a record explicitly says otherwise.
//! - Timestamps are ISO-8601 UTC (`chrono::DateTime<Utc>`).
//! - All wire structs serialise camelCase; wire-visible enums serialise
//!   snake_case.
//!
//! ## Invariants
//! - `Telemetry.message_id` is strictly increasing per aircraft (gaps ok,
//!   reversals forbidden — enforced at the codec/generator boundary).
//! - `Command.priority == emergency` implies `requires_ack`.
//! - A `FlightPlan` starts with a `takeoff` or `home` waypoint and carries at
//!   most one `home`.

pub mod alert;
pub mod command;
pub mod envelope;
pub mod error;
pub mod geo;
pub mod mission;
pub mod telemetry;
pub mod topic;

pub use alert::{AlertCategory, AlertLevel, SafetyAlert};
pub use command::{Command, CommandKind, CommandPriority, WireCommand};
pub use envelope::{Envelope, ErrorCode};
pub use error::SchemaError;
pub use mission::{
    FlightEnvelope, FlightPlan, FlightPlanParameters, TurbulenceBand, Waypoint, WaypointKind,
    WeatherLimits,
};
pub use telemetry::{Attitude, Environmental, Position, Speed, SystemHealth, Telemetry};
