mod broker;
mod config;
mod external_bus;
mod serial_link;
mod sim_api;
mod subscriber;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use broker::Broker;
use config::{Args, GcsConfig};
use flight_sim::host::{self, SimulatorHostConfig};
use serial_link::JsonCommandFormatter;

// ─── Health Endpoint ──────────────────────────────────────────────────────────
// GET /health → { status, timestamp, subscribers, serialLinks,
//                 externalBusConnected, uptimeSecs }
async fn health(State(broker): State<Arc<Broker>>) -> Json<crate::broker::BrokerHealth> {
    Json(broker.health())
}

// ─── Inject Endpoint ──────────────────────────────────────────────────────────
// POST /inject/<topicSuffix> republishes the body — test tooling only, gated
// behind the allow_inject flag.
async fn inject(
    State(broker): State<Arc<Broker>>,
    Path(suffix): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !broker.allow_inject() {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "inject endpoint is disabled" })),
        );
    }
    broker.inject(&suffix, body);
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = GcsConfig::load(&args);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cfg.log_level.clone().into()),
        )
        .init();

    info!("🛩  GCS broker v{} starting", env!("CARGO_PKG_VERSION"));

    let broker = Broker::new(cfg.egress_queue_capacity, cfg.allow_inject);

    // Simulator host — ticks publish straight into the broker
    let host_cfg = SimulatorHostConfig { tick_hz: cfg.sim_tick_hz, seed: cfg.sim_seed };
    let sim = host::spawn(host_cfg, broker.clone());
    broker.attach_simulator(sim.clone());

    // Serial links, one task per configured autopilot
    let mut link_tasks = Vec::new();
    for link in &cfg.serial_links {
        info!(aircraft = %link.aircraft_id, path = %link.path, "configuring serial link");
        link_tasks.push(serial_link::spawn_link(
            broker.clone(),
            link.clone(),
            None,
            Arc::new(JsonCommandFormatter),
        ));
    }

    // External bus (optional)
    match &cfg.external_bus_url {
        Some(url) => external_bus::spawn_bus(broker.clone(), url.clone()),
        None => info!("external bus not configured — local-only routing"),
    }

    let cors = || {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let broker_app = Router::new()
        .route("/ws", get(subscriber::ws_handler))
        .route("/health", get(health))
        .route("/inject/*suffix", post(inject))
        .with_state(broker.clone())
        .layer(cors());

    let sim_app = sim_api::router(sim.clone()).layer(cors());

    let broker_addr = format!("0.0.0.0:{}", cfg.broker_port);
    let sim_addr = format!("0.0.0.0:{}", cfg.sim_port);
    let broker_listener = tokio::net::TcpListener::bind(&broker_addr).await?;
    let sim_listener = tokio::net::TcpListener::bind(&sim_addr).await?;
    info!("🚀 broker on {broker_addr}, simulator control on {sim_addr}");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut broker_shutdown = shutdown_rx.clone();
    let mut sim_shutdown = shutdown_rx;

    let broker_server = tokio::spawn(async move {
        axum::serve(broker_listener, broker_app)
            .with_graceful_shutdown(async move {
                let _ = broker_shutdown.changed().await;
            })
            .await
    });
    let sim_server = tokio::spawn(async move {
        axum::serve(sim_listener, sim_app)
            .with_graceful_shutdown(async move {
                let _ = sim_shutdown.changed().await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    // Cooperative: stop accepting, drain egress (≤5 s), close the serial
    // links, then stop the sim loop after its current tick
    broker.shutdown(Duration::from_secs(5)).await;
    broker.close_serial_links();
    for task in link_tasks {
        let _ = task.await;
    }
    let _ = sim.shutdown().await;
    let _ = broker_server.await;
    let _ = sim_server.await;
    info!("ground control stopped");
    Ok(())
}
