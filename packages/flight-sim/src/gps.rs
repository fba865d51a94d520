//! gps.rs — GPS receiver model.
//!
//! Walks a 32-satellite constellation, derives visibility/DOP/fix type, and
//! corrupts the true position into a reported one. With fewer than four
//! visible satellites there is no fix and the reported position freezes.

use gcs_types::telemetry::Position;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

const SATELLITE_COUNT: usize = 32;
/// Receiver accuracy floor with a plain autonomous fix, meters.
const AUTONOMOUS_ACCURACY_M: f64 = 2.5;
const DGPS_ACCURACY_M: f64 = 1.0;
const RTK_ACCURACY_M: f64 = 0.02;
const NO_FIX_ACCURACY_M: f64 = 999.0;
/// DGPS corrections are only usable within this range of the base station.
const DGPS_MAX_BASE_DISTANCE_M: f64 = 100_000.0;

// ── Satellites ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Satellite {
    pub id: u8,
    pub elevation_deg: f64,
    pub azimuth_deg: f64,
    pub snr_db: f64,
    pub healthy: bool,
    elevation_phase: f64,
}

impl Satellite {
    fn is_visible(&self) -> bool {
        self.healthy && self.elevation_deg > 15.0 && self.snr_db > 30.0
    }
}

// ── Fix ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixType {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "2d")]
    TwoD,
    #[serde(rename = "3d")]
    ThreeD,
    #[serde(rename = "dgps")]
    Dgps,
    #[serde(rename = "rtk")]
    Rtk,
}

/// Snapshot handed to the telemetry generator each tick.
#[derive(Debug, Clone, Copy)]
pub struct GpsReading {
    pub position: Position,
    pub fix: FixType,
    pub visible_satellites: u32,
    pub hdop: f64,
    pub vdop: f64,
    pub accuracy_m: f64,
}

// ── Model ─────────────────────────────────────────────────────────────────────

pub struct GpsModel {
    satellites: Vec<Satellite>,
    rng: StdRng,
    /// `dgps`/`rtk` forced by an external call; `None` = autonomous
    forced: Option<FixType>,
    base_station: Option<Position>,
    multipath_m: f64,
    atmospheric_m: f64,
    reported: Option<Position>,
    update_rate_hz: f64,
    since_update_s: f64,
    t: f64,
    last_reading: Option<GpsReading>,
}

impl GpsModel {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let satellites = (0..SATELLITE_COUNT)
            .map(|i| {
                let elevation = rng.gen_range(5.0..85.0);
                Satellite {
                    id: i as u8 + 1,
                    elevation_deg: elevation,
                    azimuth_deg: rng.gen_range(0.0..360.0),
                    snr_db: 35.0 + (elevation / 90.0) * 15.0,
                    healthy: true,
                    elevation_phase: rng.gen_range(0.0..std::f64::consts::TAU),
                }
            })
            .collect();
        Self {
            satellites,
            rng,
            forced: None,
            base_station: None,
            multipath_m: 0.0,
            atmospheric_m: 0.5,
            reported: None,
            update_rate_hz: 10.0,
            since_update_s: 0.0,
            t: 0.0,
            last_reading: None,
        }
    }

    /// Force differential mode. Fails if the base station is out of range of
    /// the receiver.
    pub fn force_dgps(&mut self, base_station: Position, current: &Position) -> Result<(), String> {
        let distance = gcs_types::geo::distance_m(&base_station, current);
        if distance >= DGPS_MAX_BASE_DISTANCE_M {
            return Err(format!("base station {:.0} m away, DGPS limit is 100 km", distance));
        }
        self.base_station = Some(base_station);
        self.forced = Some(FixType::Dgps);
        Ok(())
    }

    pub fn force_rtk(&mut self) {
        self.forced = Some(FixType::Rtk);
    }

    pub fn clear_forced_mode(&mut self) {
        self.forced = None;
        self.base_station = None;
    }

    pub fn visible_count(&self) -> u32 {
        self.satellites.iter().filter(|s| s.is_visible()).count() as u32
    }

    /// Advance constellation and produce a reading for the true position.
    pub fn tick(&mut self, dt: f64, true_position: &Position) -> GpsReading {
        self.t += dt;
        self.walk_constellation(dt);

        // Error terms random-walk slowly between fixes
        self.multipath_m =
            (self.multipath_m + self.rng.gen_range(-0.05..=0.05)).clamp(-1.0, 1.0);
        self.atmospheric_m = 0.5 * (1.0 + (0.00005 * self.t).sin());

        self.since_update_s += dt;
        let interval = 1.0 / self.update_rate_hz;
        if self.since_update_s < interval {
            // Below the receiver update rate the last reading holds
            if let Some(reading) = self.last_reading {
                return reading;
            }
        }
        self.since_update_s = 0.0;

        let visible: Vec<&Satellite> =
            self.satellites.iter().filter(|s| s.is_visible()).collect();
        let visible_count = visible.len() as u32;

        let (hdop, vdop) = if visible.is_empty() {
            (99.0, 99.0)
        } else {
            let mean_elev: f64 =
                visible.iter().map(|s| s.elevation_deg).sum::<f64>() / visible.len() as f64;
            let hdop = (4.0 / (visible_count as f64).sqrt()) * (1.0 + (45.0 - mean_elev) / 45.0);
            (hdop, 1.5 * hdop)
        };

        let fix = match visible_count {
            0..=3 => FixType::None,
            4 => FixType::TwoD,
            _ => match self.forced {
                Some(mode) => mode,
                None => FixType::ThreeD,
            },
        };

        let reading = match fix {
            FixType::None => {
                // No fix: position frozen at the last report
                let held = self.reported.unwrap_or(*true_position);
                GpsReading {
                    position: held,
                    fix,
                    visible_satellites: visible_count,
                    hdop,
                    vdop,
                    accuracy_m: NO_FIX_ACCURACY_M,
                }
            }
            _ => {
                let base_accuracy = match fix {
                    FixType::Dgps => DGPS_ACCURACY_M,
                    FixType::Rtk => RTK_ACCURACY_M,
                    _ => AUTONOMOUS_ACCURACY_M,
                };
                let accuracy = base_accuracy * hdop;
                let magnitude =
                    base_accuracy * hdop + self.multipath_m.abs() + self.atmospheric_m;
                let position = self.corrupt(true_position, magnitude, fix);
                self.reported = Some(position);
                GpsReading {
                    position,
                    fix,
                    visible_satellites: visible_count,
                    hdop,
                    vdop,
                    accuracy_m: accuracy,
                }
            }
        };
        self.last_reading = Some(reading);
        reading
    }

    fn walk_constellation(&mut self, dt: f64) {
        for sat in &mut self.satellites {
            // 0.5°/min azimuth drift, slow elevation oscillation
            sat.azimuth_deg =
                gcs_types::geo::wrap_deg_360(sat.azimuth_deg + 0.5 / 60.0 * dt);
            sat.elevation_deg = (sat.elevation_deg
                + 0.1 / 60.0 * dt * (0.0005 * self.t + sat.elevation_phase).sin())
            .clamp(0.0, 90.0);

            let noise = self.rng.gen_range(-5.0..=5.0);
            sat.snr_db = (35.0 + (sat.elevation_deg / 90.0) * 15.0 + noise).clamp(20.0, 50.0);

            if self.rng.gen_bool(1.0 / 10_000.0) {
                sat.healthy = !sat.healthy;
            }
        }
    }

    /// In-plane displacement at a random bearing; altitude error 1.5× horizontal.
    fn corrupt(&mut self, true_position: &Position, magnitude_m: f64, fix: FixType) -> Position {
        let bearing = self.rng.gen_range(0.0..360.0);
        let walk = Normal::new(0.0, (magnitude_m * 0.5).max(1e-6)).unwrap();
        let horizontal = walk.sample(&mut self.rng).abs().min(magnitude_m * 2.0);
        let mut reported = gcs_types::geo::destination(true_position, bearing, horizontal);
        reported.altitude = match fix {
            // A 2d fix carries no altitude solution; hold the last one
            FixType::TwoD => self
                .reported
                .map(|p| p.altitude)
                .unwrap_or(true_position.altitude),
            _ => {
                let vertical = walk.sample(&mut self.rng) * 1.5;
                true_position.altitude + vertical
            }
        };
        reported
    }

    /// Test/scenario hook: leave `keep` satellites visible, bury the rest
    /// below the horizon so health toggles cannot bring them back.
    pub fn degrade_to(&mut self, keep: usize) {
        for (i, sat) in self.satellites.iter_mut().enumerate() {
            sat.healthy = i < keep;
            if i < keep {
                sat.elevation_deg = 60.0;
                sat.snr_db = 45.0;
            } else {
                sat.elevation_deg = 0.0;
            }
        }
    }

    /// Restore every satellite to a healthy, visible state.
    pub fn restore(&mut self) {
        for sat in &mut self.satellites {
            sat.healthy = true;
            if sat.elevation_deg <= 15.0 {
                sat.elevation_deg = 30.0;
            }
            sat.snr_db = sat.snr_db.max(35.0);
        }
    }
}
