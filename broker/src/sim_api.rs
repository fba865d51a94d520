//! sim_api.rs — simulator control endpoint.
//!
//! HTTP surface mirroring the host operations: list, create, delete,
//! start/stop, load-flight-plan, send-command, plus host-level pause/resume
//! and sim-speed. Served on its own port next to the broker.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use flight_sim::{AircraftKind, SimError, SimulatorHandle};
use gcs_types::command::{Command, WireCommand};
use gcs_types::mission::FlightPlan;
use gcs_types::telemetry::Position;
use serde::{Deserialize, Serialize};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(err: SimError) -> ApiError {
    let status = match &err {
        SimError::UnknownSimulator(_) | SimError::UnknownAircraft(_) => StatusCode::NOT_FOUND,
        SimError::DuplicateAircraft(_) => StatusCode::CONFLICT,
        SimError::Envelope(_) | SimError::NoHomeWaypoint | SimError::Schema(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SimError::HostClosed => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

fn schema_error(err: gcs_types::SchemaError) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}

pub fn router(handle: SimulatorHandle) -> Router {
    Router::new()
        .route("/aircraft", get(list).post(create))
        .route("/aircraft/:id", axum::routing::delete(remove))
        .route("/aircraft/:id/start", post(start))
        .route("/aircraft/:id/stop", post(stop))
        .route("/aircraft/:id/plan", post(load_plan))
        .route("/aircraft/:id/command", post(send_command))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/speed", post(set_speed))
        .with_state(handle)
}

// ── Requests / responses ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    aircraft_id: String,
    position: Position,
    #[serde(rename = "type")]
    kind: AircraftKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    simulator_id: String,
}

#[derive(Debug, Deserialize)]
struct SpeedRequest {
    speed: f64,
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn list(
    State(handle): State<SimulatorHandle>,
) -> Result<Json<Vec<flight_sim::AircraftSummary>>, ApiError> {
    handle.list().await.map(Json).map_err(error_response)
}

async fn create(
    State(handle): State<SimulatorHandle>,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<CreateResponse>), ApiError> {
    let simulator_id = handle
        .create(&request.aircraft_id, request.position, request.kind)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(CreateResponse { simulator_id })))
}

async fn remove(
    State(handle): State<SimulatorHandle>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    handle.delete(&id).await.map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start(
    State(handle): State<SimulatorHandle>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    handle.set_running(&id, true).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}

async fn stop(
    State(handle): State<SimulatorHandle>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    handle.set_running(&id, false).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}

async fn load_plan(
    State(handle): State<SimulatorHandle>,
    Path(id): Path<String>,
    Json(plan): Json<FlightPlan>,
) -> Result<StatusCode, ApiError> {
    plan.validate().map_err(schema_error)?;
    handle.load_plan(&id, plan).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}

async fn send_command(
    State(handle): State<SimulatorHandle>,
    Path(id): Path<String>,
    Json(wire): Json<WireCommand>,
) -> Result<StatusCode, ApiError> {
    let command = Command::from_wire(wire).map_err(schema_error)?;
    handle.command_simulator(&id, command).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}

async fn pause(State(handle): State<SimulatorHandle>) -> Result<StatusCode, ApiError> {
    handle.set_paused(true).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}

async fn resume(State(handle): State<SimulatorHandle>) -> Result<StatusCode, ApiError> {
    handle.set_paused(false).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}

async fn set_speed(
    State(handle): State<SimulatorHandle>,
    Json(request): Json<SpeedRequest>,
) -> Result<StatusCode, ApiError> {
    handle.set_speed(request.speed).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}
