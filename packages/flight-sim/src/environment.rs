//! environment.rs — wind, gusts, turbulence and atmosphere.
//!
//! Surface state evolves deterministically (sinusoids over elapsed time) with
//! seeded noise on top; altitude-dependent lookups derive winds-aloft and ISA
//! atmosphere from the surface state. One instance per simulated aircraft.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const TAU: f64 = std::f64::consts::TAU;

/// ISA constants: sea-level 288.15 K / 101325 Pa, lapse 0.0065 K/m.
const ISA_LAPSE_K_PER_M: f64 = 0.0065;
const ISA_SEA_LEVEL_K: f64 = 288.15;
const DRY_AIR_GAS_CONSTANT: f64 = 287.05;

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindState {
    pub speed: f64,
    pub direction: f64,
    pub gusts: f64,
    /// Normalised turbulence intensity in [0,1]
    pub turbulence: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Atmosphere {
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
    /// Air density, kg/m³ (from virtual temperature)
    pub density: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
    pub range_m: f64,
    pub ceiling_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecipitationKind {
    None,
    Rain,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Precipitation {
    pub kind: PrecipitationKind,
    /// Normalised intensity in [0,1]
    pub intensity: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EnvironmentState {
    pub wind: WindState,
    pub atmosphere: Atmosphere,
    pub visibility: Visibility,
    pub precipitation: Precipitation,
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub base_wind_speed: f64,
    pub base_wind_direction: f64,
    pub base_turbulence: f64,
    pub base_humidity: f64,
    /// Diurnal temperature swing amplitude, °C
    pub temperature_amplitude: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            base_wind_speed: 5.0,
            base_wind_direction: 270.0,
            base_turbulence: 0.2,
            base_humidity: 55.0,
            temperature_amplitude: 8.0,
        }
    }
}

// ── Model ─────────────────────────────────────────────────────────────────────

pub struct EnvironmentModel {
    cfg: EnvironmentConfig,
    state: EnvironmentState,
    t: f64,
    rng: StdRng,
}

impl EnvironmentModel {
    pub fn new(cfg: EnvironmentConfig, seed: u64) -> Self {
        let mut model = Self {
            cfg,
            state: EnvironmentState {
                wind: WindState {
                    speed: cfg.base_wind_speed,
                    direction: cfg.base_wind_direction,
                    gusts: 0.0,
                    turbulence: cfg.base_turbulence,
                },
                atmosphere: Atmosphere {
                    temperature: 15.0,
                    pressure: 1013.25,
                    humidity: cfg.base_humidity,
                    density: 1.225,
                },
                visibility: Visibility { range_m: 10_000.0, ceiling_m: 3_000.0 },
                precipitation: Precipitation { kind: PrecipitationKind::None, intensity: 0.0 },
            },
            t: 0.0,
            rng: StdRng::seed_from_u64(seed),
        };
        model.tick(0.0);
        model
    }

    pub fn state(&self) -> &EnvironmentState {
        &self.state
    }

    /// Advance the surface state by `dt` seconds.
    pub fn tick(&mut self, dt: f64) {
        self.t += dt;
        let t = self.t;

        // Wind: two sinusoids over the base (0.1 Hz / 2 m/s, 0.3 Hz / 1 m/s)
        let speed = self.cfg.base_wind_speed
            + 2.0 * (TAU * 0.1 * t).sin()
            + 1.0 * (TAU * 0.3 * t).sin();
        self.state.wind.speed = speed.max(0.0);

        // Direction meanders ±15° at 0.05 Hz
        self.state.wind.direction = gcs_types::geo::wrap_deg_360(
            self.cfg.base_wind_direction + 15.0 * (TAU * 0.05 * t).sin(),
        );

        // Gust onset is a rare event; otherwise gusts bleed off at 5 m/s per s
        if self.rng.gen_bool(0.01) {
            self.state.wind.gusts =
                self.state.wind.speed * (1.2 + self.rng.gen_range(0.0..0.8));
        } else {
            self.state.wind.gusts = (self.state.wind.gusts - 5.0 * dt).max(0.0);
        }

        self.state.wind.turbulence =
            (self.cfg.base_turbulence + self.rng.gen_range(-0.05..=0.05)).clamp(0.0, 1.0);

        // Atmosphere: slow cycles
        self.state.atmosphere.temperature =
            15.0 + self.cfg.temperature_amplitude * (0.001 * t).sin();
        self.state.atmosphere.pressure = 1013.25 + 20.0 * (0.0005 * t).sin();
        self.state.atmosphere.humidity =
            (self.cfg.base_humidity + 20.0 * (0.0003 * t).sin()).clamp(10.0, 90.0);
        self.state.atmosphere.density = density_from_virtual_temperature(
            self.state.atmosphere.temperature,
            self.state.atmosphere.pressure,
            self.state.atmosphere.humidity,
        );

        // Visibility degrades linearly once humidity passes 85%
        let humidity = self.state.atmosphere.humidity;
        self.state.visibility.range_m = if humidity > 85.0 {
            10_000.0 - (humidity - 85.0) * 500.0
        } else {
            10_000.0
        };
        self.state.visibility.ceiling_m = (self.state.visibility.range_m * 0.3).min(3_000.0);

        // Rain when the slow weather cycle bottoms out in humid air
        let weather_cycle = (0.0002 * t).sin();
        if weather_cycle < -0.7 && humidity > 80.0 {
            self.state.precipitation.kind = PrecipitationKind::Rain;
            self.state.precipitation.intensity = ((-weather_cycle - 0.7) / 0.3).clamp(0.0, 1.0);
        } else {
            self.state.precipitation.kind = PrecipitationKind::None;
            self.state.precipitation.intensity = 0.0;
        }
    }

    // ── Altitude lookups ─────────────────────────────────────────────────────

    /// Wind (speed, direction) at altitude. Magnitude scales up to 2× by 1 km.
    pub fn wind_at(&self, altitude_m: f64) -> (f64, f64) {
        let scale = (1.0 + altitude_m.max(0.0) / 1000.0).min(2.0);
        (self.state.wind.speed * scale, self.state.wind.direction)
    }

    /// Turbulence intensity at altitude: ramps 1.0–1.5× through the boundary
    /// layer (≤3 km), eases to the 1.3× jet-level band (5–15 km), calm above.
    pub fn turbulence_at(&self, altitude_m: f64) -> f64 {
        let alt = altitude_m.max(0.0);
        let scale = if alt <= 3_000.0 {
            1.0 + 0.5 * (alt / 3_000.0)
        } else if alt < 5_000.0 {
            1.5 - 0.2 * ((alt - 3_000.0) / 2_000.0)
        } else if alt <= 15_000.0 {
            1.3
        } else {
            1.0
        };
        (self.state.wind.turbulence * scale).clamp(0.0, 1.0)
    }

    /// ISA-lapsed atmosphere at altitude, anchored at the surface state.
    pub fn atmosphere_at(&self, altitude_m: f64) -> Atmosphere {
        let alt = altitude_m.max(0.0);
        let surface = self.state.atmosphere;
        let temperature = surface.temperature - ISA_LAPSE_K_PER_M * alt;
        let t0_k = (surface.temperature + 273.15).max(ISA_SEA_LEVEL_K - 60.0);
        let pressure =
            surface.pressure * (1.0 - ISA_LAPSE_K_PER_M * alt / t0_k).powf(5.2561);
        let density = density_from_virtual_temperature(temperature, pressure, surface.humidity);
        Atmosphere { temperature, pressure, humidity: surface.humidity, density }
    }

    /// Conservative go/no-go: any single limit exceeded means unsafe.
    pub fn is_flight_safe(&self) -> bool {
        let s = &self.state;
        s.wind.speed <= 15.0
            && s.wind.gusts <= 20.0
            && s.visibility.range_m >= 5_000.0
            && s.precipitation.intensity <= 0.5
            && s.wind.turbulence <= 0.7
    }
}

/// ρ = 100·p / (R_d · T_v), with T_v = T_K / (1 − 0.378·e/p) and the vapour
/// pressure e from the Tetens approximation.
fn density_from_virtual_temperature(temperature_c: f64, pressure_hpa: f64, humidity_pct: f64) -> f64 {
    let saturation_hpa = 6.112 * ((17.67 * temperature_c) / (temperature_c + 243.5)).exp();
    let vapor_hpa = (humidity_pct / 100.0) * saturation_hpa;
    let t_kelvin = temperature_c + 273.15;
    let virtual_t = t_kelvin / (1.0 - 0.378 * vapor_hpa / pressure_hpa);
    (pressure_hpa * 100.0) / (DRY_AIR_GAS_CONSTANT * virtual_t)
}
