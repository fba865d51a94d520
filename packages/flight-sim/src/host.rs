//! host.rs — simulator host: owns the aircraft set and the tick loop.
//!
//! All aircraft state lives inside one Tokio task; control operations and
//! commands arrive over a bounded mpsc channel and answer on oneshot replies,
//! so nothing outside the loop ever touches a model mid-tick. A shared
//! read-only registry maps `aircraft_id → simulator_id` for broker routing.
//!
//! The loop measures wall-clock Δt between ticks rather than assuming the
//! nominal period, so physics stays correct under load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcs_types::alert::{AlertCategory, AlertLevel, SafetyAlert};
use gcs_types::command::{Command, CommandKind};
use gcs_types::mission::{FlightEnvelope, FlightPlan};
use gcs_types::telemetry::{Position, Telemetry};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use crate::environment::{EnvironmentConfig, EnvironmentModel};
use crate::executor::{EndAction, PlanExecutor};
use crate::flight_model::{AircraftKind, FlightModel};
use crate::gps::GpsModel;
use crate::telemetry_gen::TelemetryGenerator;
use crate::SimError;

// ── Publishing seam ───────────────────────────────────────────────────────────

/// Where tick output goes. The broker implements this with try-send
/// semantics; a tick never blocks on I/O.
pub trait TickSink: Send + Sync {
    fn publish_telemetry(&self, telemetry: &Telemetry);
    fn publish_alert(&self, alert: &SafetyAlert);
    fn publish_status(&self, subject: &str, status: serde_json::Value);
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct SimulatorHostConfig {
    pub tick_hz: f64,
    /// Master seed; each aircraft derives its model seeds from this
    pub seed: u64,
}

impl Default for SimulatorHostConfig {
    fn default() -> Self {
        Self { tick_hz: 50.0, seed: 0 }
    }
}

// ── Per-aircraft state ────────────────────────────────────────────────────────

struct SimAircraft {
    simulator_id: String,
    aircraft_id: String,
    kind: AircraftKind,
    running: bool,
    mission_active: bool,
    environment: EnvironmentModel,
    gps: GpsModel,
    model: FlightModel,
    executor: Option<PlanExecutor>,
    generator: TelemetryGenerator,
    envelope: FlightEnvelope,
}

impl SimAircraft {
    fn new(aircraft_id: &str, position: Position, kind: AircraftKind, seed: u64) -> Self {
        Self {
            simulator_id: Uuid::new_v4().to_string(),
            aircraft_id: aircraft_id.to_string(),
            kind,
            running: false,
            mission_active: false,
            environment: EnvironmentModel::new(EnvironmentConfig::default(), seed),
            gps: GpsModel::new(seed.wrapping_add(1)),
            model: FlightModel::new(kind, position),
            executor: None,
            generator: TelemetryGenerator::new(aircraft_id),
            envelope: FlightEnvelope::default(),
        }
    }

    /// One tick: environment → GPS → flight model → executor → telemetry.
    fn tick(&mut self, dt: f64, sink: &dyn TickSink) -> Result<(), SimError> {
        self.environment.tick(dt);
        let true_position = *self.model.position();
        let gps = self.gps.tick(dt, &true_position);

        let altitude = true_position.altitude;
        let density = self.environment.atmosphere_at(altitude).density;
        let wind = self.environment.wind_at(altitude);
        self.model.tick(dt, density, wind);

        if self.mission_active {
            if let Some(executor) = self.executor.as_mut() {
                if let Some(nav) = executor.tick(self.model.position(), dt) {
                    self.model.apply_navigation_commands(&nav, wind);
                }
            }
        }

        let (telemetry, alerts) = self.generator.generate(dt, &self.model, &gps, &self.environment);
        sink.publish_telemetry(&telemetry);
        for alert in &alerts {
            sink.publish_alert(alert);
        }
        Ok(())
    }

    fn handle_command(&mut self, command: &Command, sink: &dyn TickSink) -> Result<(), SimError> {
        match &command.kind {
            CommandKind::WaypointUpdate { waypoint } => {
                if !self.envelope.contains_altitude(waypoint.position.altitude) {
                    return Err(SimError::Envelope(format!(
                        "waypoint altitude {} outside envelope",
                        waypoint.position.altitude
                    )));
                }
                self.executor
                    .as_mut()
                    .ok_or_else(|| SimError::Envelope("no flight plan loaded".into()))?
                    .update_waypoint(waypoint.clone())
            }
            CommandKind::FlightPlanUpload { plan } => self.load_plan(plan.clone()),
            CommandKind::ParameterSet { name, value } => self.set_parameter(name, value),
            CommandKind::MissionStart => {
                let executor = self
                    .executor
                    .as_mut()
                    .ok_or_else(|| SimError::Envelope("no flight plan loaded".into()))?;
                executor.resume();
                self.mission_active = true;
                self.running = true;
                Ok(())
            }
            CommandKind::MissionPause => {
                if let Some(executor) = self.executor.as_mut() {
                    executor.pause();
                }
                Ok(())
            }
            CommandKind::MissionAbort => {
                self.mission_active = false;
                Ok(())
            }
            CommandKind::ReturnToHome => {
                let executor = self
                    .executor
                    .as_mut()
                    .ok_or_else(|| SimError::Envelope("no flight plan loaded".into()))?;
                match executor.emergency_return_to_home() {
                    Ok(()) => {
                        self.mission_active = true;
                        executor.resume();
                        Ok(())
                    }
                    Err(err @ SimError::NoHomeWaypoint) => {
                        sink.publish_alert(&SafetyAlert::new(
                            &self.aircraft_id,
                            AlertLevel::Critical,
                            AlertCategory::Navigation,
                            "rth_no_home",
                            "return-to-home refused: flight plan has no home waypoint",
                        ));
                        Err(err)
                    }
                    Err(err) => Err(err),
                }
            }
            CommandKind::EmergencyLand => {
                self.model.emergency_land();
                if let Some(executor) = self.executor.as_mut() {
                    executor.emergency_land();
                }
                Ok(())
            }
        }
    }

    fn load_plan(&mut self, plan: FlightPlan) -> Result<(), SimError> {
        if plan.aircraft_id != self.aircraft_id {
            return Err(SimError::Envelope(format!(
                "plan is for '{}', aircraft is '{}'",
                plan.aircraft_id, self.aircraft_id
            )));
        }
        if !self.envelope.contains_altitude(plan.parameters.cruise_altitude) {
            return Err(SimError::Envelope(format!(
                "cruise altitude {} outside envelope",
                plan.parameters.cruise_altitude
            )));
        }
        match self.executor.as_mut() {
            Some(executor) => executor.load(plan)?,
            None => self.executor = Some(PlanExecutor::new(plan)?),
        }
        Ok(())
    }

    fn set_parameter(&mut self, name: &str, value: &serde_json::Value) -> Result<(), SimError> {
        let executor = self
            .executor
            .as_mut()
            .ok_or_else(|| SimError::Envelope("no flight plan loaded".into()))?;
        match name {
            "cruiseSpeed" => {
                let speed = value
                    .as_f64()
                    .ok_or_else(|| SimError::Envelope("cruiseSpeed must be a number".into()))?;
                if !self.envelope.contains_airspeed(speed) {
                    return Err(SimError::Envelope(format!("cruiseSpeed {speed} outside envelope")));
                }
                executor.plan_parameters_mut().cruise_speed = speed;
                Ok(())
            }
            "cruiseAltitude" => {
                let altitude = value
                    .as_f64()
                    .ok_or_else(|| SimError::Envelope("cruiseAltitude must be a number".into()))?;
                if !self.envelope.contains_altitude(altitude) {
                    return Err(SimError::Envelope(format!(
                        "cruiseAltitude {altitude} outside envelope"
                    )));
                }
                executor.plan_parameters_mut().cruise_altitude = altitude;
                Ok(())
            }
            "endAction" => {
                let action: EndAction = serde_json::from_value(value.clone())
                    .map_err(|e| SimError::Envelope(format!("endAction: {e}")))?;
                executor.set_end_action(action);
                Ok(())
            }
            other => Err(SimError::Envelope(format!("unknown parameter '{other}'"))),
        }
    }

    fn summary(&self) -> AircraftSummary {
        AircraftSummary {
            simulator_id: self.simulator_id.clone(),
            aircraft_id: self.aircraft_id.clone(),
            kind: self.kind,
            running: self.running,
            mission_active: self.mission_active,
            battery: self.generator.battery_pct(),
            position: *self.model.position(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AircraftSummary {
    pub simulator_id: String,
    pub aircraft_id: String,
    #[serde(rename = "type")]
    pub kind: AircraftKind,
    pub running: bool,
    pub mission_active: bool,
    pub battery: f64,
    pub position: Position,
}

// ── Ops channel ───────────────────────────────────────────────────────────────

pub enum CommandTarget {
    Simulator(String),
    Aircraft(String),
}

enum HostOp {
    Create {
        aircraft_id: String,
        position: Position,
        kind: AircraftKind,
        reply: oneshot::Sender<Result<String, SimError>>,
    },
    Delete {
        simulator_id: String,
        reply: oneshot::Sender<Result<(), SimError>>,
    },
    SetRunning {
        simulator_id: String,
        running: bool,
        reply: oneshot::Sender<Result<(), SimError>>,
    },
    LoadPlan {
        simulator_id: String,
        plan: Box<FlightPlan>,
        reply: oneshot::Sender<Result<(), SimError>>,
    },
    Command {
        target: CommandTarget,
        command: Box<Command>,
        reply: oneshot::Sender<Result<(), SimError>>,
    },
    List {
        reply: oneshot::Sender<Vec<AircraftSummary>>,
    },
    SetPaused {
        paused: bool,
        reply: oneshot::Sender<()>,
    },
    SetSpeed {
        speed: f64,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloneable front door to the simulator host task.
#[derive(Clone)]
pub struct SimulatorHandle {
    ops: mpsc::Sender<HostOp>,
    registry: Arc<RwLock<HashMap<String, String>>>,
}

impl SimulatorHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HostOp,
    ) -> Result<T, SimError> {
        let (tx, rx) = oneshot::channel();
        self.ops.send(build(tx)).await.map_err(|_| SimError::HostClosed)?;
        rx.await.map_err(|_| SimError::HostClosed)
    }

    /// Is this aircraft id backed by a simulated aircraft?
    pub async fn is_simulated(&self, aircraft_id: &str) -> bool {
        self.registry.read().await.contains_key(aircraft_id)
    }

    pub async fn create(
        &self,
        aircraft_id: &str,
        position: Position,
        kind: AircraftKind,
    ) -> Result<String, SimError> {
        self.call(|reply| HostOp::Create {
            aircraft_id: aircraft_id.to_string(),
            position,
            kind,
            reply,
        })
        .await?
    }

    pub async fn delete(&self, simulator_id: &str) -> Result<(), SimError> {
        self.call(|reply| HostOp::Delete { simulator_id: simulator_id.to_string(), reply }).await?
    }

    pub async fn set_running(&self, simulator_id: &str, running: bool) -> Result<(), SimError> {
        self.call(|reply| HostOp::SetRunning {
            simulator_id: simulator_id.to_string(),
            running,
            reply,
        })
        .await?
    }

    pub async fn load_plan(&self, simulator_id: &str, plan: FlightPlan) -> Result<(), SimError> {
        self.call(|reply| HostOp::LoadPlan {
            simulator_id: simulator_id.to_string(),
            plan: Box::new(plan),
            reply,
        })
        .await?
    }

    /// Deliver a command addressed by aircraft id (broker path).
    pub async fn command_aircraft(&self, command: Command) -> Result<(), SimError> {
        let target = CommandTarget::Aircraft(command.destination.clone());
        self.call(|reply| HostOp::Command { target, command: Box::new(command), reply }).await?
    }

    /// Deliver a command addressed by simulator id (control API path).
    pub async fn command_simulator(
        &self,
        simulator_id: &str,
        command: Command,
    ) -> Result<(), SimError> {
        let target = CommandTarget::Simulator(simulator_id.to_string());
        self.call(|reply| HostOp::Command { target, command: Box::new(command), reply }).await?
    }

    pub async fn list(&self) -> Result<Vec<AircraftSummary>, SimError> {
        self.call(|reply| HostOp::List { reply }).await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), SimError> {
        self.call(|reply| HostOp::SetPaused { paused, reply }).await
    }

    pub async fn set_speed(&self, speed: f64) -> Result<(), SimError> {
        self.call(|reply| HostOp::SetSpeed { speed: speed.clamp(0.1, 20.0), reply }).await
    }

    /// Cooperative shutdown: the loop exits after its current tick.
    pub async fn shutdown(&self) -> Result<(), SimError> {
        self.call(|reply| HostOp::Shutdown { reply }).await
    }
}

// ── Host task ─────────────────────────────────────────────────────────────────

/// Spawn the host task. The returned handle is the only way in.
pub fn spawn(config: SimulatorHostConfig, sink: Arc<dyn TickSink>) -> SimulatorHandle {
    let (ops_tx, ops_rx) = mpsc::channel(64);
    let registry = Arc::new(RwLock::new(HashMap::new()));
    let handle = SimulatorHandle { ops: ops_tx, registry: registry.clone() };
    tokio::spawn(run_loop(config, sink, ops_rx, registry));
    handle
}

async fn run_loop(
    config: SimulatorHostConfig,
    sink: Arc<dyn TickSink>,
    mut ops_rx: mpsc::Receiver<HostOp>,
    registry: Arc<RwLock<HashMap<String, String>>>,
) {
    let mut aircraft: HashMap<String, SimAircraft> = HashMap::new();
    let mut created: u64 = 0;
    let mut paused = false;
    let mut speed = 1.0_f64;

    let period = Duration::from_secs_f64(1.0 / config.tick_hz.max(1.0));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    info!("⚙ simulator host running at {} Hz", config.tick_hz);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_tick).as_secs_f64() * speed;
                last_tick = now;
                if paused {
                    continue;
                }
                for craft in aircraft.values_mut().filter(|a| a.running) {
                    if let Err(e) = craft.tick(dt, sink.as_ref()) {
                        // One bad tick never takes the loop down
                        warn!(aircraft = %craft.aircraft_id, "tick failed: {e}");
                        sink.publish_status("sim", serde_json::json!({
                            "state": "degraded",
                            "aircraftId": craft.aircraft_id,
                            "error": e.to_string(),
                        }));
                    }
                }
            }
            op = ops_rx.recv() => {
                let Some(op) = op else { break };
                if handle_op(op, &mut aircraft, &mut created, &mut paused, &mut speed,
                             &config, sink.as_ref(), &registry).await {
                    break;
                }
            }
        }
    }
    info!("simulator host stopped");
}

#[allow(clippy::too_many_arguments)]
async fn handle_op(
    op: HostOp,
    aircraft: &mut HashMap<String, SimAircraft>,
    created: &mut u64,
    paused: &mut bool,
    speed: &mut f64,
    config: &SimulatorHostConfig,
    sink: &dyn TickSink,
    registry: &Arc<RwLock<HashMap<String, String>>>,
) -> bool {
    match op {
        HostOp::Create { aircraft_id, position, kind, reply } => {
            let result = if aircraft.values().any(|a| a.aircraft_id == aircraft_id) {
                Err(SimError::DuplicateAircraft(aircraft_id.clone()))
            } else {
                *created += 1;
                let seed = config.seed.wrapping_add(*created * 1000);
                let craft = SimAircraft::new(&aircraft_id, position, kind, seed);
                let simulator_id = craft.simulator_id.clone();
                registry.write().await.insert(aircraft_id.clone(), simulator_id.clone());
                aircraft.insert(simulator_id.clone(), craft);
                info!(%aircraft_id, %simulator_id, "simulated aircraft created");
                Ok(simulator_id)
            };
            let _ = reply.send(result);
        }
        HostOp::Delete { simulator_id, reply } => {
            let result = match aircraft.remove(&simulator_id) {
                Some(craft) => {
                    registry.write().await.remove(&craft.aircraft_id);
                    info!(aircraft_id = %craft.aircraft_id, "simulated aircraft deleted");
                    Ok(())
                }
                None => Err(SimError::UnknownSimulator(simulator_id)),
            };
            let _ = reply.send(result);
        }
        HostOp::SetRunning { simulator_id, running, reply } => {
            let result = match aircraft.get_mut(&simulator_id) {
                Some(craft) => {
                    craft.running = running;
                    Ok(())
                }
                None => Err(SimError::UnknownSimulator(simulator_id)),
            };
            let _ = reply.send(result);
        }
        HostOp::LoadPlan { simulator_id, plan, reply } => {
            let result = match aircraft.get_mut(&simulator_id) {
                Some(craft) => craft.load_plan(*plan),
                None => Err(SimError::UnknownSimulator(simulator_id)),
            };
            let _ = reply.send(result);
        }
        HostOp::Command { target, command, reply } => {
            let craft = match &target {
                CommandTarget::Simulator(id) => aircraft.get_mut(id),
                CommandTarget::Aircraft(id) => {
                    aircraft.values_mut().find(|a| a.aircraft_id == *id)
                }
            };
            let result = match craft {
                Some(craft) => craft.handle_command(&command, sink),
                None => Err(match target {
                    CommandTarget::Simulator(id) => SimError::UnknownSimulator(id),
                    CommandTarget::Aircraft(id) => SimError::UnknownAircraft(id),
                }),
            };
            let _ = reply.send(result);
        }
        HostOp::List { reply } => {
            let mut summaries: Vec<_> = aircraft.values().map(SimAircraft::summary).collect();
            summaries.sort_by(|a, b| a.aircraft_id.cmp(&b.aircraft_id));
            let _ = reply.send(summaries);
        }
        HostOp::SetPaused { paused: value, reply } => {
            *paused = value;
            info!(paused = value, "simulator host pause state");
            let _ = reply.send(());
        }
        HostOp::SetSpeed { speed: value, reply } => {
            *speed = value;
            info!(speed = value, "simulator speed multiplier");
            let _ = reply.send(());
        }
        HostOp::Shutdown { reply } => {
            let _ = reply.send(());
            return true;
        }
    }
    false
}
