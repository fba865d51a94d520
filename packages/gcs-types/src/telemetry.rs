//! Canonical telemetry record and its component shapes.
//!
//! One `Telemetry` is produced per aircraft per tick (simulator path) or per
//! accepted serial line (autopilot path). Records are immutable once
//! published; the broker shares them read-only across subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

// ── Position ──────────────────────────────────────────────────────────────────

/// Geographic position. Altitude is meters AGL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Result<Self, SchemaError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(SchemaError::OutOfRange { field: "latitude", value: latitude });
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(SchemaError::OutOfRange { field: "longitude", value: longitude });
        }
        Ok(Self { latitude, longitude, altitude })
    }
}

// ── Attitude ──────────────────────────────────────────────────────────────────

/// Euler attitude in degrees. Yaw is wrapped into [0,360).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Attitude {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw: crate::geo::wrap_deg_360(yaw) }
    }
}

// ── Speed ─────────────────────────────────────────────────────────────────────

/// Speeds in m/s. Positive vertical speed is a climb.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Speed {
    pub airspeed: f64,
    pub groundspeed: f64,
    pub vertical_speed: f64,
}

// ── System health ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    /// Battery charge, percent
    pub battery: f64,
    /// Fuel remaining, percent (liquid-fuel airframes only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuel: Option<f64>,
    pub gps_satellites: u32,
    /// Estimated horizontal position accuracy, meters
    pub gps_accuracy: f64,
    /// Datalink RSSI, dBm
    pub datalink_rssi: f64,
    /// Autopilot CPU load, percent
    pub cpu_load: f64,
    /// Board temperature, °C
    pub temperature: f64,
}

impl SystemHealth {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !(0.0..=100.0).contains(&self.battery) {
            return Err(SchemaError::OutOfRange { field: "battery", value: self.battery });
        }
        if let Some(fuel) = self.fuel {
            if !(0.0..=100.0).contains(&fuel) {
                return Err(SchemaError::OutOfRange { field: "fuel", value: fuel });
            }
        }
        if self.gps_accuracy < 0.0 {
            return Err(SchemaError::OutOfRange { field: "gpsAccuracy", value: self.gps_accuracy });
        }
        if !(0.0..=100.0).contains(&self.cpu_load) {
            return Err(SchemaError::OutOfRange { field: "cpuLoad", value: self.cpu_load });
        }
        Ok(())
    }
}

// ── Environmental ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environmental {
    /// Air temperature, °C
    pub temperature: f64,
    /// Relative humidity, percent
    pub humidity: f64,
    /// Static pressure, hPa
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    /// (PM2.5, PM10) in µg/m³, when the airframe carries an AQ sensor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_quality: Option<(f64, f64)>,
}

impl Environmental {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !(0.0..=100.0).contains(&self.humidity) {
            return Err(SchemaError::OutOfRange { field: "humidity", value: self.humidity });
        }
        if self.wind_speed < 0.0 {
            return Err(SchemaError::OutOfRange { field: "windSpeed", value: self.wind_speed });
        }
        if !(0.0..360.0).contains(&self.wind_direction) {
            return Err(SchemaError::OutOfRange {
                field: "windDirection",
                value: self.wind_direction,
            });
        }
        Ok(())
    }
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

/// One canonical telemetry record.
///
/// `message_id` is strictly increasing per aircraft across both ingest paths.
/// Gaps mean loss and are fine; a reversal is a protocol violation and the
/// codec drops the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub timestamp: DateTime<Utc>,
    pub aircraft_id: String,
    pub message_id: u64,
    pub position: Position,
    pub attitude: Attitude,
    pub speed: Speed,
    pub system: SystemHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environmental>,
}

impl Telemetry {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.aircraft_id.is_empty() {
            return Err(SchemaError::Empty { field: "aircraftId" });
        }
        // Re-check position ranges: deserialized records bypass the constructor
        Position::new(
            self.position.latitude,
            self.position.longitude,
            self.position.altitude,
        )?;
        self.system.validate()?;
        if let Some(env) = &self.environment {
            env.validate()?;
        }
        Ok(())
    }
}
