//! telemetry_gen.rs — canonical record assembly.
//!
//! Folds the environment, GPS and flight-model state into exactly one
//! `Telemetry` per tick, with a monotonic per-aircraft message id, plus any
//! threshold alerts derived from that state. Alert ids are stable so repeated
//! emissions coalesce on dashboards.

use chrono::Utc;
use gcs_types::alert::{AlertCategory, AlertLevel, SafetyAlert};
use gcs_types::telemetry::{Environmental, SystemHealth, Telemetry};

use crate::environment::EnvironmentModel;
use crate::flight_model::FlightModel;
use crate::gps::GpsReading;

pub struct TelemetryGenerator {
    aircraft_id: String,
    next_message_id: u64,
    battery_pct: f64,
    flight_secs: f64,
}

impl TelemetryGenerator {
    pub fn new(aircraft_id: &str) -> Self {
        Self {
            aircraft_id: aircraft_id.to_string(),
            next_message_id: 1,
            battery_pct: 100.0,
            flight_secs: 0.0,
        }
    }

    pub fn battery_pct(&self) -> f64 {
        self.battery_pct
    }

    /// Pack voltage for a 6S pack: 22 V empty, 25 V full.
    pub fn battery_voltage(&self) -> f64 {
        22.0 + 3.0 * self.battery_pct / 100.0
    }

    pub fn generate(
        &mut self,
        dt: f64,
        model: &FlightModel,
        gps: &GpsReading,
        env: &EnvironmentModel,
    ) -> (Telemetry, Vec<SafetyAlert>) {
        let controls = model.controls();
        let flying = !model.on_ground() || controls.throttle > 0.05;
        if flying {
            self.flight_secs += dt;
            // 0.1 %/min idle draw plus 0.5 %/min at full throttle
            let pct_per_min = 0.1 + 0.5 * controls.throttle;
            self.battery_pct = (self.battery_pct - pct_per_min * dt / 60.0).max(0.0);
        }

        let altitude = model.position().altitude;
        let wind_aloft = env.wind_at(altitude);
        let atmosphere = env.atmosphere_at(altitude);
        let surface = env.state();

        let system = SystemHealth {
            battery: self.battery_pct,
            fuel: None,
            gps_satellites: gps.visible_satellites,
            gps_accuracy: gps.accuracy_m,
            datalink_rssi: -60.0 + 4.0 * (self.flight_secs * 0.1).sin(),
            cpu_load: (18.0 + 20.0 * controls.throttle).clamp(0.0, 100.0),
            temperature: surface.atmosphere.temperature + 12.0,
        };

        let environment = Environmental {
            temperature: atmosphere.temperature,
            humidity: atmosphere.humidity,
            pressure: atmosphere.pressure,
            wind_speed: wind_aloft.0,
            wind_direction: wind_aloft.1,
            air_quality: None,
        };

        let telemetry = Telemetry {
            timestamp: Utc::now(),
            aircraft_id: self.aircraft_id.clone(),
            message_id: self.next_message_id,
            // Downstream consumers see the GPS solution, not ground truth
            position: gps.position,
            attitude: model.attitude_deg(),
            speed: model.speed(wind_aloft),
            system,
            environment: Some(environment),
        };
        self.next_message_id += 1;

        let alerts = self.derive_alerts(model, gps, env);
        (telemetry, alerts)
    }

    fn derive_alerts(
        &self,
        model: &FlightModel,
        gps: &GpsReading,
        env: &EnvironmentModel,
    ) -> Vec<SafetyAlert> {
        let ac = self.aircraft_id.as_str();
        let mut alerts = Vec::new();

        if self.battery_pct < 20.0 {
            let level = if self.battery_pct < 10.0 { AlertLevel::Critical } else { AlertLevel::Warning };
            alerts.push(
                SafetyAlert::new(
                    ac,
                    level,
                    AlertCategory::System,
                    "battery_low",
                    format!("battery at {:.0}%", self.battery_pct),
                )
                .with_data(serde_json::json!({
                    "battery": self.battery_pct,
                    "voltage": self.battery_voltage(),
                })),
            );
        }

        if gps.visible_satellites < 6 {
            let level = if gps.visible_satellites < 4 { AlertLevel::Critical } else { AlertLevel::Warning };
            alerts.push(
                SafetyAlert::new(
                    ac,
                    level,
                    AlertCategory::Navigation,
                    "gps_low_sats",
                    format!("{} satellites visible", gps.visible_satellites),
                )
                .with_data(serde_json::json!({ "satellites": gps.visible_satellites })),
            );
        }

        let wind = env.state().wind.speed;
        if wind > 15.0 {
            let level = if wind > 25.0 { AlertLevel::Critical } else { AlertLevel::Warning };
            alerts.push(SafetyAlert::new(
                ac,
                level,
                AlertCategory::Weather,
                "high_wind",
                format!("surface wind {wind:.1} m/s"),
            ));
        }

        let altitude = model.position().altitude;
        if !model.on_ground() && altitude < 10.0 {
            alerts.push(SafetyAlert::new(
                ac,
                AlertLevel::Warning,
                AlertCategory::Navigation,
                "low_altitude",
                format!("altitude {altitude:.1} m"),
            ));
        }

        alerts
    }
}
