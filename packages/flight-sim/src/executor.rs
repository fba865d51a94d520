//! executor.rs — waypoint sequencing and navigation command generation.
//!
//! Per tick: refresh leg geometry (distance/bearing/cross-track), check
//! waypoint-reached, emit `heading`/`altitude`/`airspeed` commands for the
//! flight model. Circle waypoints loiter on a tangent track; reaching the end
//! of the plan applies the configured end action.

use chrono::{DateTime, Utc};
use gcs_types::geo;
use gcs_types::mission::{FlightPlan, Waypoint, WaypointKind};
use gcs_types::telemetry::Position;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::SimError;

/// Default loiter radius when a circle waypoint does not carry one, meters.
const DEFAULT_CIRCLE_RADIUS_M: f64 = 100.0;

// ── Outputs ───────────────────────────────────────────────────────────────────

/// Navigation setpoints handed to the flight model each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavCommands {
    pub heading_deg: f64,
    pub altitude_m: f64,
    pub airspeed_mps: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaypointReached {
    pub waypoint_id: u32,
    pub lap: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndAction {
    /// Jump back to the first waypoint, then loiter there
    ReturnHome,
    /// Cycle the plan indefinitely
    Repeat,
    /// Loiter on the final waypoint
    #[default]
    Hold,
}

// ── Executor ──────────────────────────────────────────────────────────────────

pub struct PlanExecutor {
    plan: FlightPlan,
    current_index: usize,
    end_action: EndAction,
    lap: u32,
    reached_log: Vec<WaypointReached>,

    /// Leg start for cross-track computation
    leg_start: Position,
    circling: bool,
    circle_center: Option<Position>,
    circle_radius: f64,
    circle_elapsed: f64,
    /// Set once the end action has collapsed into a loiter
    holding: bool,
    /// Returning to waypoint 0 after plan completion
    returning_home: bool,
    landing_override: bool,
    paused: bool,

    // Last-computed geometry, exposed for telemetry/status
    pub distance_to_target_m: f64,
    pub bearing_to_target_deg: f64,
    pub cross_track_m: f64,
}

impl PlanExecutor {
    pub fn new(plan: FlightPlan) -> Result<Self, SimError> {
        plan.validate()?;
        let leg_start = plan.waypoints[0].position;
        Ok(Self {
            plan,
            current_index: 0,
            end_action: EndAction::default(),
            lap: 0,
            reached_log: Vec::new(),
            leg_start,
            circling: false,
            circle_center: None,
            circle_radius: DEFAULT_CIRCLE_RADIUS_M,
            circle_elapsed: 0.0,
            holding: false,
            returning_home: false,
            landing_override: false,
            paused: false,
            distance_to_target_m: 0.0,
            bearing_to_target_deg: 0.0,
            cross_track_m: 0.0,
        })
    }

    /// Replace the plan and reset navigation state. Loading the same plan
    /// twice is the same as loading it once and skipping to waypoint 0.
    pub fn load(&mut self, plan: FlightPlan) -> Result<(), SimError> {
        plan.validate()?;
        self.leg_start = plan.waypoints[0].position;
        self.plan = plan;
        self.reset_nav(0);
        self.lap = 0;
        self.reached_log.clear();
        Ok(())
    }

    pub fn plan(&self) -> &FlightPlan {
        &self.plan
    }

    /// Mutable navigation defaults — the `parameter_set` command lands here.
    pub fn plan_parameters_mut(&mut self) -> &mut gcs_types::mission::FlightPlanParameters {
        &mut self.plan.parameters
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn lap(&self) -> u32 {
        self.lap
    }

    pub fn reached_log(&self) -> &[WaypointReached] {
        &self.reached_log
    }

    pub fn set_end_action(&mut self, action: EndAction) {
        self.end_action = action;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn current_waypoint(&self) -> &Waypoint {
        &self.plan.waypoints[self.current_index]
    }

    fn reset_nav(&mut self, index: usize) {
        self.current_index = index;
        self.circling = false;
        self.circle_center = None;
        self.circle_elapsed = 0.0;
        self.holding = false;
        self.returning_home = false;
        self.landing_override = false;
    }

    /// Jump to a waypoint by index.
    pub fn skip_to(&mut self, index: usize) -> Result<(), SimError> {
        if index >= self.plan.waypoints.len() {
            return Err(SimError::Envelope(format!(
                "waypoint index {index} out of range (plan has {})",
                self.plan.waypoints.len()
            )));
        }
        self.leg_start = self.current_waypoint().position;
        self.reset_nav(index);
        Ok(())
    }

    /// Replace a waypoint in place, matched by id.
    pub fn update_waypoint(&mut self, waypoint: Waypoint) -> Result<(), SimError> {
        let slot = self
            .plan
            .waypoints
            .iter_mut()
            .find(|w| w.id == waypoint.id)
            .ok_or_else(|| SimError::Envelope(format!("no waypoint with id {}", waypoint.id)))?;
        *slot = waypoint;
        self.plan.updated_at = Utc::now();
        Ok(())
    }

    /// Divert to the plan's `home` waypoint. Plans without one cannot RTH.
    pub fn emergency_return_to_home(&mut self) -> Result<(), SimError> {
        let index = self
            .plan
            .waypoints
            .iter()
            .position(|w| w.kind == WaypointKind::Home)
            .ok_or(SimError::NoHomeWaypoint)?;
        self.leg_start = self.current_waypoint().position;
        self.reset_nav(index);
        self.holding = false;
        info!(waypoint = index, "emergency return to home");
        Ok(())
    }

    /// Descend to the surface at the current target.
    pub fn emergency_land(&mut self) {
        self.landing_override = true;
    }

    /// Advance one tick from the aircraft position. Returns `None` while
    /// paused.
    pub fn tick(&mut self, position: &Position, dt: f64) -> Option<NavCommands> {
        if self.paused {
            return None;
        }

        let target = self.current_waypoint().clone();
        self.distance_to_target_m = geo::distance_m(position, &target.position);
        self.bearing_to_target_deg = geo::bearing_deg(position, &target.position);
        self.cross_track_m = geo::cross_track_m(&self.leg_start, &target.position, position);

        let radius = self.plan.parameters.waypoint_radius;

        if self.circling {
            self.circle_elapsed += dt;
            let dwell = target.duration.unwrap_or(f64::INFINITY);
            if !self.holding && self.circle_elapsed >= dwell {
                self.advance(&target);
            }
        } else if self.distance_to_target_m <= radius {
            self.log_reached(&target);
            if self.returning_home || (self.holding_kind(&target) && self.end_action == EndAction::Hold) {
                // Terminal loiter
                self.begin_circle(&target);
                self.holding = true;
            } else if target.kind == WaypointKind::Circle {
                self.begin_circle(&target);
            } else {
                self.advance(&target);
            }
        }

        Some(self.commands_for(position, &target))
    }

    fn holding_kind(&self, target: &Waypoint) -> bool {
        // Only the final waypoint collapses into a terminal hold
        self.current_index + 1 >= self.plan.waypoints.len()
            && target.kind != WaypointKind::Circle
    }

    fn begin_circle(&mut self, target: &Waypoint) {
        self.circling = true;
        self.circle_center = Some(target.position);
        self.circle_radius = target.radius.unwrap_or(DEFAULT_CIRCLE_RADIUS_M);
        self.circle_elapsed = 0.0;
    }

    fn log_reached(&mut self, target: &Waypoint) {
        debug!(
            waypoint = target.id,
            lap = self.lap,
            "waypoint reached"
        );
        self.reached_log.push(WaypointReached {
            waypoint_id: target.id,
            lap: self.lap,
            timestamp: Utc::now(),
        });
    }

    fn advance(&mut self, reached: &Waypoint) {
        self.leg_start = reached.position;
        self.circling = false;
        self.circle_center = None;

        if self.current_index + 1 < self.plan.waypoints.len() {
            self.current_index += 1;
            return;
        }

        // End of plan
        match self.end_action {
            EndAction::Repeat => {
                self.current_index = 0;
                self.lap += 1;
            }
            EndAction::ReturnHome => {
                self.current_index = 0;
                self.returning_home = true;
            }
            EndAction::Hold => {
                self.holding = true;
                self.begin_circle(reached);
            }
        }
    }

    fn commands_for(&self, position: &Position, target: &Waypoint) -> NavCommands {
        let params = &self.plan.parameters;

        let heading_deg = if self.circling {
            let center = self.circle_center.unwrap_or(target.position);
            let from_center = geo::bearing_deg(&center, position);
            let radius_error = geo::distance_m(&center, position) - self.circle_radius;
            // Clockwise tangent, corrected back onto the circle
            let correction = radius_error.atan2(self.circle_radius).to_degrees();
            geo::wrap_deg_360(from_center + 90.0 + correction)
        } else {
            let correction = self
                .cross_track_m
                .atan2(self.distance_to_target_m.max(50.0))
                .to_degrees();
            geo::wrap_deg_360(self.bearing_to_target_deg - correction)
        };

        let altitude_m = if self.landing_override { 0.0 } else { target.position.altitude };

        let approach = matches!(target.kind, WaypointKind::Landing) || self.landing_override;
        let airspeed_mps = if approach { params.approach_speed } else { params.cruise_speed };

        NavCommands { heading_deg, altitude_m, airspeed_mps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcs_types::mission::FlightPlanParameters;

    fn wp(id: u32, kind: WaypointKind, lat: f64, lon: f64, alt: f64) -> Waypoint {
        Waypoint::simple(id, kind, Position { latitude: lat, longitude: lon, altitude: alt })
    }

    /// home(0,0,0) → wp(0,0.001,100) → wp(0.001,0.001,100) → landing(0,0,0)
    fn square_plan() -> FlightPlan {
        FlightPlan::new(
            "square",
            "ac1",
            vec![
                wp(0, WaypointKind::Home, 0.0, 0.0, 0.0),
                wp(1, WaypointKind::Waypoint, 0.0, 0.001, 100.0),
                wp(2, WaypointKind::Waypoint, 0.001, 0.001, 100.0),
                wp(3, WaypointKind::Landing, 0.0, 0.0, 0.0),
            ],
        )
    }

    /// Drive the executor by teleporting the aircraft to each commanded
    /// target — geometry-only integration, no flight model.
    fn fly_lap(exec: &mut PlanExecutor, hops: usize) {
        for _ in 0..hops {
            let target = exec.plan().waypoints[exec.current_index()].position;
            exec.tick(&target, 1.0);
        }
    }

    #[test]
    fn waypoint_advance_is_single_step() {
        let mut exec = PlanExecutor::new(square_plan()).unwrap();
        let at_home = Position { latitude: 0.0, longitude: 0.0, altitude: 0.0 };
        exec.tick(&at_home, 0.02).unwrap();
        assert_eq!(exec.current_index(), 1);
        // Same position again: not within 50 m of wp1, so no further advance
        exec.tick(&at_home, 0.02).unwrap();
        assert_eq!(exec.current_index(), 1);
    }

    #[test]
    fn repeat_cycles_and_logs_each_waypoint_once_per_lap() {
        let mut exec = PlanExecutor::new(square_plan()).unwrap();
        exec.set_end_action(EndAction::Repeat);
        fly_lap(&mut exec, 16); // 4 laps × 4 waypoints
        assert_eq!(exec.lap(), 4);
        assert_eq!(exec.reached_log().len(), 16);
        for lap in 0..4 {
            let ids: Vec<u32> = exec
                .reached_log()
                .iter()
                .filter(|r| r.lap == lap)
                .map(|r| r.waypoint_id)
                .collect();
            assert_eq!(ids, vec![0, 1, 2, 3], "lap {lap}");
        }
    }

    #[test]
    fn hold_loiters_on_final_waypoint() {
        let mut exec = PlanExecutor::new(square_plan()).unwrap();
        exec.set_end_action(EndAction::Hold);
        fly_lap(&mut exec, 4);
        let end = exec.plan().waypoints[3].position;
        let nav = exec.tick(&end, 1.0).unwrap();
        assert_eq!(exec.current_index(), 3);
        // Loitering: heading is a tangent, not a straight-in bearing
        assert!(exec.reached_log().len() == 4);
        assert!(nav.airspeed_mps > 0.0);
        // Still index 3 after many ticks
        for _ in 0..20 {
            exec.tick(&end, 1.0);
        }
        assert_eq!(exec.current_index(), 3);
    }

    #[test]
    fn reload_equals_load_then_skip_to_zero() {
        let plan = square_plan();
        let mut a = PlanExecutor::new(plan.clone()).unwrap();
        let mut b = PlanExecutor::new(plan.clone()).unwrap();
        let mid = Position { latitude: 0.0, longitude: 0.001, altitude: 100.0 };
        a.tick(&mid, 1.0);
        b.tick(&mid, 1.0);

        a.load(plan.clone()).unwrap();
        b.load(plan.clone()).unwrap();
        b.load(plan).unwrap();
        b.skip_to(0).unwrap();
        assert_eq!(a.current_index(), b.current_index());
        assert_eq!(a.lap(), b.lap());
    }

    #[test]
    fn cross_track_correction_steers_back_to_leg() {
        let mut exec = PlanExecutor::new(square_plan()).unwrap();
        exec.skip_to(2).unwrap(); // leg runs NE from wp0 (0,0) to wp2 (0.001, 0.001)
        // Aircraft right of the leg: cross-track positive, correction
        // subtracts from the direct bearing
        let east_of_leg = Position { latitude: 0.0005, longitude: 0.0012, altitude: 100.0 };
        let nav = exec.tick(&east_of_leg, 0.02).unwrap();
        let direct = exec.bearing_to_target_deg;
        let diff = geo::wrap_deg_180(nav.heading_deg - direct);
        assert!(exec.cross_track_m > 0.0);
        assert!(diff < 0.0, "correction should subtract: direct {direct}, got {}", nav.heading_deg);
    }

    #[test]
    fn landing_leg_uses_approach_speed() {
        let mut exec = PlanExecutor::new(square_plan()).unwrap();
        exec.skip_to(3).unwrap();
        let pos = Position { latitude: 0.0008, longitude: 0.0, altitude: 60.0 };
        let nav = exec.tick(&pos, 0.02).unwrap();
        assert_eq!(nav.airspeed_mps, FlightPlanParameters::default().approach_speed);
        assert_eq!(nav.altitude_m, 0.0);
    }

    #[test]
    fn rth_requires_home_waypoint() {
        let mut with_home = PlanExecutor::new(square_plan()).unwrap();
        with_home.skip_to(2).unwrap();
        with_home.emergency_return_to_home().unwrap();
        assert_eq!(with_home.current_index(), 0);

        let mut no_home = PlanExecutor::new(FlightPlan::new(
            "no-home",
            "ac1",
            vec![
                wp(0, WaypointKind::Takeoff, 0.0, 0.0, 0.0),
                wp(1, WaypointKind::Landing, 0.001, 0.0, 0.0),
            ],
        ))
        .unwrap();
        assert!(matches!(no_home.emergency_return_to_home(), Err(SimError::NoHomeWaypoint)));
    }

    #[test]
    fn emergency_land_overrides_altitude() {
        let mut exec = PlanExecutor::new(square_plan()).unwrap();
        exec.skip_to(1).unwrap();
        exec.emergency_land();
        let pos = Position { latitude: 0.0, longitude: 0.0005, altitude: 90.0 };
        let nav = exec.tick(&pos, 0.02).unwrap();
        assert_eq!(nav.altitude_m, 0.0);
        assert_eq!(nav.airspeed_mps, FlightPlanParameters::default().approach_speed);
    }

    #[test]
    fn circle_waypoint_loiters_for_duration_then_advances() {
        let mut circle_wp = wp(1, WaypointKind::Circle, 0.0, 0.001, 80.0);
        circle_wp.radius = Some(60.0);
        circle_wp.duration = Some(5.0);
        let plan = FlightPlan::new(
            "loiter",
            "ac1",
            vec![
                wp(0, WaypointKind::Takeoff, 0.0, 0.0, 0.0),
                circle_wp,
                wp(2, WaypointKind::Landing, 0.0, 0.002, 0.0),
            ],
        );
        let mut exec = PlanExecutor::new(plan).unwrap();
        exec.skip_to(1).unwrap();
        let at_circle = Position { latitude: 0.0, longitude: 0.001, altitude: 80.0 };
        exec.tick(&at_circle, 1.0).unwrap();
        assert_eq!(exec.current_index(), 1); // circling, not advanced
        for _ in 0..5 {
            exec.tick(&at_circle, 1.0);
        }
        assert_eq!(exec.current_index(), 2); // dwell expired
    }

    #[test]
    fn paused_executor_emits_nothing() {
        let mut exec = PlanExecutor::new(square_plan()).unwrap();
        exec.pause();
        let pos = Position { latitude: 0.0, longitude: 0.0, altitude: 0.0 };
        assert!(exec.tick(&pos, 0.02).is_none());
        exec.resume();
        assert!(exec.tick(&pos, 0.02).is_some());
    }
}
