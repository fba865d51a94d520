//! flight_model.rs — 6-DoF rigid-body flight model.
//!
//! World frame is ENU (x east, y north, z up); attitude is held in radians
//! and wrapped every tick. Semi-implicit Euler with a flat-earth geographic
//! update keeps the integrator cheap and stable at 50 Hz.

use gcs_types::geo;
use gcs_types::telemetry::{Attitude, Position, Speed};
use serde::{Deserialize, Serialize};

use crate::executor::NavCommands;

const GRAVITY: f64 = 9.81;
/// Moments reach full authority at this airspeed (m/s).
const CONTROL_AUTHORITY_SPEED: f64 = 20.0;
const ANGULAR_DAMPING: f64 = 0.95;
/// Touchdown faster than this is a hard landing.
const HARD_LANDING_SINK: f64 = -2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AircraftKind {
    FixedWing,
    Rotorcraft,
}

/// Airframe constants per kind. Values describe a small UAS.
#[derive(Debug, Clone, Copy)]
pub struct AirframeParams {
    pub mass_kg: f64,
    pub max_thrust_n: f64,
    pub drag_coefficient: f64,
    pub lift_coefficient: f64,
    pub wing_area_m2: f64,
}

impl AirframeParams {
    pub fn for_kind(kind: AircraftKind) -> Self {
        match kind {
            AircraftKind::FixedWing => Self {
                mass_kg: 2.0,
                max_thrust_n: 24.0,
                drag_coefficient: 0.06,
                lift_coefficient: 1.1,
                wing_area_m2: 0.45,
            },
            AircraftKind::Rotorcraft => Self {
                mass_kg: 1.4,
                max_thrust_n: 32.0,
                drag_coefficient: 0.9,
                lift_coefficient: 0.0,
                wing_area_m2: 0.08,
            },
        }
    }
}

/// Throttle in [0,1]; surfaces in [-1,1]. Positive elevator pitches up.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlInputs {
    pub throttle: f64,
    pub aileron: f64,
    pub elevator: f64,
    pub rudder: f64,
}

impl ControlInputs {
    fn clamped(self) -> Self {
        Self {
            throttle: self.throttle.clamp(0.0, 1.0),
            aileron: self.aileron.clamp(-1.0, 1.0),
            elevator: self.elevator.clamp(-1.0, 1.0),
            rudder: self.rudder.clamp(-1.0, 1.0),
        }
    }
}

pub struct FlightModel {
    pub kind: AircraftKind,
    params: AirframeParams,
    position: Position,
    /// ENU velocity, m/s
    velocity: [f64; 3],
    acceleration: [f64; 3],
    /// roll, pitch, yaw — radians; yaw 0 = north, positive clockwise
    attitude: [f64; 3],
    angular_velocity: [f64; 3],
    controls: ControlInputs,
    hard_landing: bool,
}

impl FlightModel {
    pub fn new(kind: AircraftKind, position: Position) -> Self {
        Self {
            kind,
            params: AirframeParams::for_kind(kind),
            position,
            velocity: [0.0; 3],
            acceleration: [0.0; 3],
            attitude: [0.0; 3],
            angular_velocity: [0.0; 3],
            controls: ControlInputs::default(),
            hard_landing: false,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn controls(&self) -> ControlInputs {
        self.controls
    }

    pub fn set_controls(&mut self, controls: ControlInputs) {
        self.controls = controls.clamped();
    }

    pub fn on_ground(&self) -> bool {
        self.position.altitude <= 0.0
    }

    pub fn had_hard_landing(&self) -> bool {
        self.hard_landing
    }

    /// Flare-and-descend configuration for an immediate landing.
    pub fn emergency_land(&mut self) {
        self.controls.throttle = 0.2;
        self.controls.elevator = 0.3;
    }

    pub fn groundspeed(&self) -> f64 {
        (self.velocity[0].powi(2) + self.velocity[1].powi(2)).sqrt()
    }

    pub fn vertical_speed(&self) -> f64 {
        self.velocity[2]
    }

    /// Airspeed against the wind vector (speed m/s, direction the wind blows
    /// FROM, degrees).
    pub fn airspeed(&self, wind: (f64, f64)) -> f64 {
        let (wind_speed, wind_from_deg) = wind;
        let to_rad = (wind_from_deg + 180.0).to_radians();
        let wind_e = wind_speed * to_rad.sin();
        let wind_n = wind_speed * to_rad.cos();
        let rel_e = self.velocity[0] - wind_e;
        let rel_n = self.velocity[1] - wind_n;
        (rel_e.powi(2) + rel_n.powi(2) + self.velocity[2].powi(2)).sqrt()
    }

    pub fn attitude_deg(&self) -> Attitude {
        Attitude::new(
            self.attitude[0].to_degrees(),
            self.attitude[1].to_degrees(),
            self.attitude[2].to_degrees(),
        )
    }

    pub fn speed(&self, wind: (f64, f64)) -> Speed {
        Speed {
            airspeed: self.airspeed(wind),
            groundspeed: self.groundspeed(),
            vertical_speed: self.vertical_speed(),
        }
    }

    /// Map navigation commands onto surface deflections and throttle.
    /// Cascaded P-control: heading error commands a bank, altitude error
    /// commands a pitch, the surfaces chase those targets.
    pub fn apply_navigation_commands(&mut self, nav: &NavCommands, wind: (f64, f64)) {
        let heading_deg = self.attitude[2].to_degrees();
        let heading_err = geo::wrap_deg_180(nav.heading_deg - heading_deg);
        let altitude_err = nav.altitude_m - self.position.altitude;
        let airspeed_err = nav.airspeed_mps - self.airspeed(wind);

        let desired_roll = (heading_err / 45.0).clamp(-1.0, 1.0) * 30_f64.to_radians();
        let desired_pitch = (altitude_err / 50.0).clamp(-1.0, 1.0) * 15_f64.to_radians();

        self.controls = ControlInputs {
            aileron: ((desired_roll - self.attitude[0]) / 20_f64.to_radians()).clamp(-1.0, 1.0),
            elevator: ((desired_pitch - self.attitude[1]) / 20_f64.to_radians()).clamp(-1.0, 1.0),
            rudder: (heading_err / 90.0).clamp(-1.0, 1.0) * 0.3,
            throttle: (0.55 + airspeed_err / 10.0 + altitude_err / 200.0).clamp(0.0, 1.0),
        };
    }

    /// One integration step. `air_density` kg/m³, wind as (speed, from-deg).
    pub fn tick(&mut self, dt: f64, air_density: f64, wind: (f64, f64)) {
        if dt <= 0.0 {
            return;
        }
        let p = self.params;
        let c = self.controls;
        let [roll, pitch, yaw] = self.attitude;
        let v = self.airspeed(wind);
        let q = 0.5 * air_density * v * v; // dynamic pressure

        // Forces (ENU, newtons)
        let mut force = [0.0, 0.0, -p.mass_kg * GRAVITY];

        // Drag opposes the velocity vector
        let speed = (self.velocity[0].powi(2)
            + self.velocity[1].powi(2)
            + self.velocity[2].powi(2))
        .sqrt();
        if speed > 1e-6 {
            let drag = p.drag_coefficient * q;
            for axis in 0..3 {
                force[axis] -= drag * self.velocity[axis] / speed;
            }
        }

        // Lift (fixed-wing only): pitch sets the magnitude, roll tilts it
        if self.kind == AircraftKind::FixedWing {
            let lift = p.lift_coefficient * pitch.sin().max(0.0) * p.wing_area_m2 * q;
            force[2] += lift * roll.cos();
            // Horizontal component of tilted lift turns the aircraft
            let lateral = lift * roll.sin();
            force[0] += lateral * (yaw + std::f64::consts::FRAC_PI_2).sin();
            force[1] += lateral * (yaw + std::f64::consts::FRAC_PI_2).cos();
        }

        // Thrust along the body axis rotated into the world frame
        let thrust = c.throttle * p.max_thrust_n;
        match self.kind {
            AircraftKind::FixedWing => {
                force[0] += thrust * pitch.cos() * yaw.sin();
                force[1] += thrust * pitch.cos() * yaw.cos();
                force[2] += thrust * pitch.sin();
            }
            AircraftKind::Rotorcraft => {
                // Rotor disc thrust: mostly up, tilted by attitude
                force[2] += thrust * roll.cos() * pitch.cos();
                let fwd = thrust * pitch.sin();
                force[0] += fwd * yaw.sin();
                force[1] += fwd * yaw.cos();
                let lat = -thrust * roll.sin();
                force[0] += lat * (yaw + std::f64::consts::FRAC_PI_2).sin();
                force[1] += lat * (yaw + std::f64::consts::FRAC_PI_2).cos();
            }
        }

        // Semi-implicit Euler
        for axis in 0..3 {
            self.acceleration[axis] = force[axis] / p.mass_kg;
            self.velocity[axis] += self.acceleration[axis] * dt;
        }

        let (dlat, dlon) =
            geo::offset_deg(self.position.latitude, self.velocity[1] * dt, self.velocity[0] * dt);
        self.position.latitude = (self.position.latitude + dlat).clamp(-90.0, 90.0);
        self.position.longitude = geo::wrap_deg_180(self.position.longitude + dlon);
        self.position.altitude += self.velocity[2] * dt;

        // Moments, scaled by control effectiveness
        let effectiveness = (v / CONTROL_AUTHORITY_SPEED).min(1.0);
        let moments = [c.aileron * 10.0, c.elevator * 8.0, c.rudder * 6.0];
        for axis in 0..3 {
            self.angular_velocity[axis] += moments[axis] * effectiveness * dt;
            self.angular_velocity[axis] *= ANGULAR_DAMPING;
        }
        // Aileron rolls, elevator pitches, rudder yaws; a banked fixed wing
        // also yaws at the coordinated-turn rate g·tan(φ)/V
        self.attitude[0] += self.angular_velocity[0] * dt;
        self.attitude[1] += self.angular_velocity[1] * dt;
        self.attitude[2] += self.angular_velocity[2] * dt;
        if self.kind == AircraftKind::FixedWing && v > 3.0 {
            let turn_rate = GRAVITY * self.attitude[0].tan().clamp(-2.0, 2.0) / v;
            self.attitude[2] += turn_rate * dt;
        }

        self.attitude[0] = wrap_rad(self.attitude[0]);
        self.attitude[1] = self.attitude[1].clamp(-std::f64::consts::FRAC_PI_2, std::f64::consts::FRAC_PI_2);
        self.attitude[2] = wrap_rad(self.attitude[2]);

        // Ground contact
        if self.position.altitude <= 0.0 {
            self.position.altitude = 0.0;
            if self.velocity[2] < HARD_LANDING_SINK {
                self.velocity[0] *= 0.1;
                self.velocity[1] *= 0.1;
                self.hard_landing = true;
            }
            if self.velocity[2] < 0.0 {
                self.velocity[2] = 0.0;
            }
        }
    }
}

/// Wrap an angle into (-π, π].
fn wrap_rad(rad: f64) -> f64 {
    let mut w = rad % std::f64::consts::TAU;
    if w > std::f64::consts::PI {
        w -= std::f64::consts::TAU;
    } else if w <= -std::f64::consts::PI {
        w += std::f64::consts::TAU;
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;

    const RHO: f64 = 1.225;
    const CALM: (f64, f64) = (0.0, 0.0);

    fn airborne() -> FlightModel {
        FlightModel::new(
            AircraftKind::FixedWing,
            Position { latitude: 52.0, longitude: 4.0, altitude: 100.0 },
        )
    }

    #[test]
    fn gravity_pulls_an_unpowered_airframe_down() {
        let mut m = airborne();
        for _ in 0..50 {
            m.tick(0.02, RHO, CALM);
        }
        assert!(m.vertical_speed() < -5.0);
        assert!(m.position().altitude < 100.0);
    }

    #[test]
    fn full_throttle_accelerates_along_heading() {
        let mut m = airborne();
        m.set_controls(ControlInputs { throttle: 1.0, ..Default::default() });
        for _ in 0..250 {
            m.tick(0.02, RHO, CALM);
        }
        // Heading 0 = north: latitude must grow, longitude stay put
        assert!(m.groundspeed() > 5.0);
        assert!(m.position().latitude > 52.0);
        assert!((m.position().longitude - 4.0).abs() < 1e-6);
    }

    #[test]
    fn ground_contact_clamps_altitude() {
        let mut m = FlightModel::new(
            AircraftKind::FixedWing,
            Position { latitude: 0.0, longitude: 0.0, altitude: 1.0 },
        );
        for _ in 0..200 {
            m.tick(0.02, RHO, CALM);
            assert!(m.position().altitude >= 0.0);
        }
        assert_eq!(m.position().altitude, 0.0);
        assert_eq!(m.vertical_speed(), 0.0);
    }

    #[test]
    fn hard_landing_kills_horizontal_speed() {
        let mut m = FlightModel::new(
            AircraftKind::FixedWing,
            Position { latitude: 0.0, longitude: 0.0, altitude: 60.0 },
        );
        // Dive until touchdown
        let mut before = 0.0;
        for _ in 0..5_000 {
            before = m.groundspeed();
            m.tick(0.02, RHO, CALM);
            if m.on_ground() {
                break;
            }
        }
        assert!(m.on_ground());
        assert!(m.had_hard_landing());
        assert!(m.groundspeed() <= before * 0.1 + 1e-6);
    }

    #[test]
    fn emergency_land_sets_flare_controls() {
        let mut m = airborne();
        m.emergency_land();
        assert_eq!(m.controls().throttle, 0.2);
        assert_eq!(m.controls().elevator, 0.3);
    }

    #[test]
    fn controls_are_clamped() {
        let mut m = airborne();
        m.set_controls(ControlInputs { throttle: 7.0, aileron: -3.0, elevator: 2.0, rudder: 0.5 });
        let c = m.controls();
        assert_eq!(c.throttle, 1.0);
        assert_eq!(c.aileron, -1.0);
        assert_eq!(c.elevator, 1.0);
        assert_eq!(c.rudder, 0.5);
    }

    #[test]
    fn nav_commands_steer_toward_requested_heading() {
        let mut m = airborne();
        m.set_controls(ControlInputs { throttle: 0.8, ..Default::default() });
        // Spin up first so the surfaces have authority
        for _ in 0..400 {
            m.tick(0.02, RHO, CALM);
        }
        let nav = NavCommands { heading_deg: 90.0, altitude_m: 100.0, airspeed_mps: 15.0 };
        for _ in 0..3_000 {
            m.apply_navigation_commands(&nav, CALM);
            m.tick(0.02, RHO, CALM);
        }
        let heading = m.attitude_deg().yaw;
        let err = gcs_types::geo::wrap_deg_180(90.0 - heading).abs();
        assert!(err < 20.0, "heading {heading} after convergence");
    }

    #[test]
    fn airspeed_accounts_for_wind() {
        let mut m = airborne();
        // Flying north at 10 m/s into a 5 m/s northerly headwind
        m.velocity = [0.0, 10.0, 0.0];
        assert!((m.airspeed((5.0, 0.0)) - 15.0).abs() < 1e-9);
        // Same wind from the south is a tailwind
        assert!((m.airspeed((5.0, 180.0)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn wrap_rad_bounds() {
        assert!((wrap_rad(3.0 * std::f64::consts::PI) - std::f64::consts::PI).abs() < 1e-9);
        assert!(wrap_rad(-3.5 * std::f64::consts::PI) > -std::f64::consts::PI);
    }
}
