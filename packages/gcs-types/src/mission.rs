//! Mission shapes: waypoints, flight plans, flight envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchemaError;
use crate::telemetry::Position;

// ── Waypoints ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointKind {
    Takeoff,
    Waypoint,
    Survey,
    Circle,
    Landing,
    Home,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub position: Position,
    #[serde(rename = "type")]
    pub kind: WaypointKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    /// Circle radius, meters (`circle` waypoints)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    /// Loiter duration, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl Waypoint {
    pub fn simple(id: u32, kind: WaypointKind, position: Position) -> Self {
        Self { id, name: None, position, kind, actions: None, radius: None, duration: None }
    }
}

// ── Flight plan ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherLimits {
    pub max_wind: f64,
    pub min_visibility: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
}

impl Default for WeatherLimits {
    fn default() -> Self {
        Self { max_wind: 15.0, min_visibility: 5_000.0, min_temperature: -10.0, max_temperature: 45.0 }
    }
}

/// Plan-level tuning. The speed/radius values double as the executor's
/// navigation defaults and can be overridden per plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlightPlanParameters {
    pub cruise_speed: f64,
    pub approach_speed: f64,
    pub cruise_altitude: f64,
    pub max_altitude: f64,
    /// Waypoint-reached radius, meters
    pub waypoint_radius: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuel_limit: Option<f64>,
    pub weather_limits: WeatherLimits,
}

impl Default for FlightPlanParameters {
    fn default() -> Self {
        Self {
            cruise_speed: 15.0,
            approach_speed: 12.0,
            cruise_altitude: 100.0,
            max_altitude: 120.0,
            waypoint_radius: 50.0,
            battery_limit: None,
            fuel_limit: None,
            weather_limits: WeatherLimits::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightPlan {
    pub id: String,
    pub name: String,
    pub aircraft_id: String,
    pub waypoints: Vec<Waypoint>,
    #[serde(default)]
    pub parameters: FlightPlanParameters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlightPlan {
    pub fn new(name: &str, aircraft_id: &str, waypoints: Vec<Waypoint>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            aircraft_id: aircraft_id.to_string(),
            waypoints,
            parameters: FlightPlanParameters::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.aircraft_id.is_empty() {
            return Err(SchemaError::Empty { field: "aircraftId" });
        }
        let first = self
            .waypoints
            .first()
            .ok_or(SchemaError::Invariant("flight plan needs at least one waypoint"))?;
        if !matches!(first.kind, WaypointKind::Takeoff | WaypointKind::Home) {
            return Err(SchemaError::Invariant("first waypoint must be takeoff or home"));
        }
        let homes = self.waypoints.iter().filter(|w| w.kind == WaypointKind::Home).count();
        if homes > 1 {
            return Err(SchemaError::Invariant("at most one home waypoint"));
        }
        if self.parameters.cruise_altitude > self.parameters.max_altitude {
            return Err(SchemaError::OutOfRange {
                field: "cruiseAltitude",
                value: self.parameters.cruise_altitude,
            });
        }
        Ok(())
    }

    /// The `home` waypoint, when the plan carries one. Emergency
    /// return-to-home is only possible for plans that do.
    pub fn home(&self) -> Option<&Waypoint> {
        self.waypoints.iter().find(|w| w.kind == WaypointKind::Home)
    }
}

// ── Flight envelope ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurbulenceBand {
    Light,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeRange {
    pub min: f64,
    pub max: f64,
    pub cruise: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeWeather {
    pub max_wind_speed: f64,
    pub min_visibility: f64,
    pub max_turbulence: TurbulenceBand,
}

/// Operating limits the simulator rejects commands against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightEnvelope {
    pub airspeed: EnvelopeRange,
    pub altitude: EnvelopeRange,
    pub max_bank_angle: f64,
    pub weather: EnvelopeWeather,
}

impl FlightEnvelope {
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (range, field) in [(self.airspeed, "airspeed"), (self.altitude, "altitude")] {
            if !(range.min < range.cruise && range.cruise < range.max) {
                return Err(SchemaError::BadParameter {
                    field: "envelope",
                    message: format!("{field}: expected min < cruise < max"),
                });
            }
        }
        Ok(())
    }

    pub fn contains_altitude(&self, altitude: f64) -> bool {
        (self.altitude.min..=self.altitude.max).contains(&altitude)
    }

    pub fn contains_airspeed(&self, airspeed: f64) -> bool {
        (self.airspeed.min..=self.airspeed.max).contains(&airspeed)
    }
}

impl Default for FlightEnvelope {
    fn default() -> Self {
        Self {
            airspeed: EnvelopeRange { min: 9.0, max: 22.0, cruise: 15.0 },
            altitude: EnvelopeRange { min: 0.0, max: 120.0, cruise: 100.0 },
            max_bank_angle: 45.0,
            weather: EnvelopeWeather {
                max_wind_speed: 15.0,
                min_visibility: 5_000.0,
                max_turbulence: TurbulenceBand::Moderate,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(kinds: &[WaypointKind]) -> FlightPlan {
        let waypoints = kinds
            .iter()
            .enumerate()
            .map(|(i, &kind)| {
                Waypoint::simple(
                    i as u32,
                    kind,
                    Position { latitude: 0.0, longitude: 0.001 * i as f64, altitude: 100.0 },
                )
            })
            .collect();
        FlightPlan::new("survey-7", "sumo_001", waypoints)
    }

    #[test]
    fn valid_plan_passes() {
        let plan = plan_with(&[
            WaypointKind::Home,
            WaypointKind::Waypoint,
            WaypointKind::Landing,
        ]);
        plan.validate().unwrap();
        assert_eq!(plan.home().unwrap().id, 0);
    }

    #[test]
    fn empty_plan_rejected() {
        assert!(plan_with(&[]).validate().is_err());
    }

    #[test]
    fn first_waypoint_must_be_takeoff_or_home() {
        let plan = plan_with(&[WaypointKind::Waypoint, WaypointKind::Landing]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn at_most_one_home() {
        let plan = plan_with(&[WaypointKind::Home, WaypointKind::Home]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn cruise_altitude_capped_by_max() {
        let mut plan = plan_with(&[WaypointKind::Takeoff, WaypointKind::Landing]);
        plan.parameters.cruise_altitude = 150.0;
        plan.parameters.max_altitude = 120.0;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn envelope_ordering_enforced() {
        let mut env = FlightEnvelope::default();
        env.validate().unwrap();
        env.airspeed.cruise = 25.0;
        assert!(env.validate().is_err());
    }

    #[test]
    fn plan_defaults_follow_navigation_defaults() {
        let p = FlightPlanParameters::default();
        assert_eq!(p.cruise_speed, 15.0);
        assert_eq!(p.approach_speed, 12.0);
        assert_eq!(p.waypoint_radius, 50.0);
    }
}
