//! # flight-sim
//!
//! Fixed-frequency flight simulation that can stand in for a real aircraft on
//! the telemetry fabric. Each simulated aircraft composes:
//!
//! - an environment model (wind/gusts/turbulence/atmosphere),
//! - a GPS model (satellite visibility, DOP, fix type, reported-position error),
//! - a 6-DoF rigid-body flight model (fixed-wing or rotorcraft),
//! - a flight-plan executor driving the model via navigation commands,
//! - a telemetry generator emitting one canonical record per tick.
//!
//! The [`host`] module owns the aircraft set and the tick loop; everything
//! else is pure per-aircraft state advanced from that one task. All noise
//! sources are seeded, so a run is reproducible from its seed.

pub mod environment;
pub mod executor;
pub mod flight_model;
pub mod gps;
pub mod host;
pub mod telemetry_gen;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown simulator '{0}'")]
    UnknownSimulator(String),

    #[error("no simulated aircraft '{0}'")]
    UnknownAircraft(String),

    #[error("aircraft '{0}' is already simulated")]
    DuplicateAircraft(String),

    #[error("command violates flight envelope: {0}")]
    Envelope(String),

    #[error("flight plan has no home waypoint")]
    NoHomeWaypoint,

    #[error("invalid record: {0}")]
    Schema(#[from] gcs_types::SchemaError),

    #[error("simulator host is shut down")]
    HostClosed,
}

pub use executor::{EndAction, NavCommands, PlanExecutor, WaypointReached};
pub use flight_model::{AircraftKind, ControlInputs, FlightModel};
pub use gps::{FixType, GpsModel, GpsReading};
pub use host::{AircraftSummary, SimulatorHandle, SimulatorHostConfig, TickSink};
pub use telemetry_gen::TelemetryGenerator;
