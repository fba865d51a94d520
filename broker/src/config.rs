//! Startup configuration: `gcs.toml` + CLI overrides + env fallbacks.

use clap::Parser;
use serde::Deserialize;
use tracing::warn;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gcs-broker", about = "UAS ground-control broker + simulator")]
pub struct Args {
    /// Config file path
    #[arg(short, long, default_value = "gcs.toml")]
    pub config: String,
    /// Broker listen port (overrides config)
    #[arg(long)]
    pub port: Option<u16>,
    /// Simulator control port (overrides config)
    #[arg(long)]
    pub sim_port: Option<u16>,
    /// External bus URL, e.g. redis://127.0.0.1:6379 (overrides config)
    #[arg(long)]
    pub bus_url: Option<String>,
    /// Enable the operator inject endpoint
    #[arg(long)]
    pub allow_inject: bool,
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SerialLinkConfig {
    pub path: String,
    pub baud_rate: u32,
    pub aircraft_id: String,
}

impl Default for SerialLinkConfig {
    fn default() -> Self {
        Self { path: "/dev/ttyUSB0".into(), baud_rate: 57_600, aircraft_id: String::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GcsConfig {
    pub broker_port: u16,
    pub sim_port: u16,
    /// Redis URL; absent = local-only routing
    pub external_bus_url: Option<String>,
    pub serial_links: Vec<SerialLinkConfig>,
    pub sim_tick_hz: f64,
    pub sim_seed: u64,
    pub egress_queue_capacity: usize,
    pub allow_inject: bool,
    pub log_level: String,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            broker_port: 3001,
            sim_port: 3002,
            external_bus_url: None,
            serial_links: Vec::new(),
            sim_tick_hz: 50.0,
            sim_seed: 0,
            egress_queue_capacity: 1024,
            allow_inject: false,
            log_level: "gcs_broker=info,flight_sim=info".into(),
        }
    }
}

impl GcsConfig {
    /// Load order: file, then env, then CLI flags — later wins.
    pub fn load(args: &Args) -> Self {
        let raw = std::fs::read_to_string(&args.config)
            .unwrap_or_else(|_| include_str!("../gcs.toml").to_string());
        let mut cfg: GcsConfig = match toml::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("invalid {}: {e} — using defaults", args.config);
                GcsConfig::default()
            }
        };

        if let Ok(port) = std::env::var("GCS_PORT") {
            if let Ok(port) = port.parse() {
                cfg.broker_port = port;
            }
        }
        if let Ok(port) = std::env::var("GCS_SIM_PORT") {
            if let Ok(port) = port.parse() {
                cfg.sim_port = port;
            }
        }
        if let Ok(url) = std::env::var("GCS_BUS_URL") {
            cfg.external_bus_url = Some(url);
        }

        if let Some(port) = args.port {
            cfg.broker_port = port;
        }
        if let Some(port) = args.sim_port {
            cfg.sim_port = port;
        }
        if let Some(url) = &args.bus_url {
            cfg.external_bus_url = Some(url.clone());
        }
        if args.allow_inject {
            cfg.allow_inject = true;
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg: GcsConfig = toml::from_str(
            r#"
            broker_port = 4100
            sim_port = 4101
            external_bus_url = "redis://127.0.0.1:6379"
            sim_tick_hz = 25.0
            allow_inject = true

            [[serial_links]]
            path = "/dev/ttyACM0"
            baud_rate = 115200
            aircraft_id = "sumo_001"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.broker_port, 4100);
        assert_eq!(cfg.sim_tick_hz, 25.0);
        assert_eq!(cfg.serial_links.len(), 1);
        assert_eq!(cfg.serial_links[0].aircraft_id, "sumo_001");
        assert!(cfg.allow_inject);
    }

    #[test]
    fn defaults_apply_to_missing_keys() {
        let cfg: GcsConfig = toml::from_str("broker_port = 9000").unwrap();
        assert_eq!(cfg.broker_port, 9000);
        assert_eq!(cfg.sim_port, 3002);
        assert_eq!(cfg.egress_queue_capacity, 1024);
        assert!(cfg.external_bus_url.is_none());
    }
}
