//! serial_link.rs — line-framed autopilot link.
//!
//! Each configured link gets one task owning the port: newline-framed reads
//! with a renewed 5 s timeout, outbound commands serialised one per line.
//! Inbound JSON objects are canonicalised into `Telemetry` (the codec fills
//! missing timestamp/aircraftId/messageId and drops messageId reversals);
//! anything else goes to the pluggable [`LineParser`], and unsupported bodies
//! are dropped and counted.
//!
//! Silence escalates through `communication` alerts (warning at 5 s, critical
//! at 15 s, info on recovery). Open failures retry with exponential backoff
//! (1 s doubling to 30 s) while `status/<aircraftId>` reports disconnected.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gcs_types::alert::{AlertCategory, AlertLevel, SafetyAlert};
use gcs_types::command::Command;
use gcs_types::telemetry::Telemetry;
use gcs_types::topic;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::config::SerialLinkConfig;

// ── Pluggable codec seams ─────────────────────────────────────────────────────

/// Parser for opaque (non-JSON) line bodies — the hook where a binary
/// autopilot framing would plug in. Returning `None` drops the line.
pub trait LineParser: Send + Sync {
    fn parse(&self, aircraft_id: &str, line: &str) -> Option<Telemetry>;
}

pub trait CommandFormatter: Send + Sync {
    fn format(&self, command: &Command) -> String;
}

/// Default outbound format: wire-shape JSON, one command per line.
pub struct JsonCommandFormatter;

impl CommandFormatter for JsonCommandFormatter {
    fn format(&self, command: &Command) -> String {
        serde_json::to_string(&command.to_wire()).unwrap_or_default()
    }
}

// ── Timing ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct LinkTiming {
    pub read_timeout: Duration,
    pub warn_after: Duration,
    pub critical_after: Duration,
    pub reopen_backoff_max: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            warn_after: Duration::from_secs(5),
            critical_after: Duration::from_secs(15),
            reopen_backoff_max: Duration::from_secs(30),
        }
    }
}

// ── Link state ────────────────────────────────────────────────────────────────

struct LinkState {
    aircraft_id: String,
    last_message_id: u64,
    dropped_lines: u64,
    silence: Duration,
    warned: bool,
    critical: bool,
}

impl LinkState {
    fn new(aircraft_id: &str) -> Self {
        Self {
            aircraft_id: aircraft_id.to_string(),
            last_message_id: 0,
            dropped_lines: 0,
            silence: Duration::ZERO,
            warned: false,
            critical: false,
        }
    }
}

// ── Spawning ──────────────────────────────────────────────────────────────────

/// Open the link and keep it open; the task survives port errors and ends
/// cleanly when the broker signals [`Broker::close_serial_links`]. The
/// returned handle lets shutdown await the close.
pub fn spawn_link(
    broker: Arc<Broker>,
    config: SerialLinkConfig,
    parser: Option<Arc<dyn LineParser>>,
    formatter: Arc<dyn CommandFormatter>,
) -> tokio::task::JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<Command>(32);
    broker.register_serial_link(&config.aircraft_id, tx);
    let mut shutdown = broker.link_shutdown_signal();

    tokio::spawn(async move {
        let timing = LinkTiming::default();
        let mut state = LinkState::new(&config.aircraft_id);
        let mut backoff = Duration::from_secs(1);

        loop {
            if *shutdown.borrow() {
                break;
            }
            match tokio_serial::new(&config.path, config.baud_rate).open_native_async() {
                Ok(stream) => {
                    info!(aircraft = %config.aircraft_id, path = %config.path, "serial link open");
                    publish_status(&broker, &state.aircraft_id, "connected");
                    backoff = Duration::from_secs(1);
                    let result = run_link(
                        &broker,
                        &mut state,
                        timing,
                        stream,
                        &mut rx,
                        &mut shutdown,
                        parser.as_deref(),
                        formatter.as_ref(),
                    )
                    .await;
                    match result {
                        // Shutdown signal or command channel closed
                        Ok(()) => break,
                        Err(e) => {
                            warn!(aircraft = %config.aircraft_id, "serial link error: {e}");
                            publish_status(&broker, &state.aircraft_id, "disconnected");
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        aircraft = %config.aircraft_id,
                        path = %config.path,
                        "serial open failed: {e}, retrying in {backoff:?}"
                    );
                    publish_status(&broker, &state.aircraft_id, "disconnected");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => break,
            }
            backoff = (backoff * 2).min(timing.reopen_backoff_max);
        }
        publish_status(&broker, &state.aircraft_id, "disconnected");
        info!(aircraft = %config.aircraft_id, "serial link closed");
    })
}

fn publish_status(broker: &Broker, aircraft_id: &str, state: &str) {
    broker.publish(
        &topic::status(aircraft_id),
        serde_json::json!({ "state": state, "timestamp": Utc::now() }),
    );
}

// ── Core loop ─────────────────────────────────────────────────────────────────

/// Drive one open stream until it errors, the command channel closes, or the
/// broker signals shutdown. Generic over the stream so tests run it against
/// an in-memory duplex.
#[allow(clippy::too_many_arguments)]
async fn run_link<S>(
    broker: &Broker,
    state: &mut LinkState,
    timing: LinkTiming,
    stream: S,
    commands: &mut mpsc::Receiver<Command>,
    shutdown: &mut watch::Receiver<bool>,
    parser: Option<&dyn LineParser>,
    formatter: &dyn CommandFormatter,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                // Clean close: give buffered outbound bytes a last chance
                let _ = write_half.flush().await;
                return Ok(());
            }
            read = timeout(timing.read_timeout, lines.next_line()) => {
                match read {
                    Err(_elapsed) => {
                        state.silence += timing.read_timeout;
                        escalate_silence(broker, state, timing);
                    }
                    Ok(Ok(Some(line))) => {
                        note_recovery(broker, state);
                        process_line(broker, state, parser, &line);
                    }
                    Ok(Ok(None)) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "serial stream closed",
                        ));
                    }
                    Ok(Err(e)) => return Err(e),
                }
            }
            command = commands.recv() => {
                match command {
                    Some(command) => {
                        let mut line = formatter.format(&command);
                        line.push('\n');
                        write_half.write_all(line.as_bytes()).await?;
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

fn escalate_silence(broker: &Broker, state: &mut LinkState, timing: LinkTiming) {
    if !state.critical && state.silence >= timing.critical_after {
        state.critical = true;
        publish_link_alert(
            broker,
            state,
            AlertLevel::Critical,
            format!("no data for {:.0} s", state.silence.as_secs_f64()),
        );
    } else if !state.warned && state.silence >= timing.warn_after {
        state.warned = true;
        publish_link_alert(
            broker,
            state,
            AlertLevel::Warning,
            format!("no data for {:.0} s", state.silence.as_secs_f64()),
        );
    }
}

fn note_recovery(broker: &Broker, state: &mut LinkState) {
    if state.warned || state.critical {
        publish_link_alert(broker, state, AlertLevel::Info, "link recovered".to_string());
    }
    state.silence = Duration::ZERO;
    state.warned = false;
    state.critical = false;
}

fn publish_link_alert(broker: &Broker, state: &LinkState, level: AlertLevel, message: String) {
    let alert = SafetyAlert::new(
        &state.aircraft_id,
        level,
        AlertCategory::Communication,
        "link_timeout",
        message,
    );
    broker.publish(
        &topic::alerts(&state.aircraft_id),
        serde_json::to_value(&alert).unwrap_or_default(),
    );
}

// ── Inbound canonicalisation ──────────────────────────────────────────────────

fn process_line(
    broker: &Broker,
    state: &mut LinkState,
    parser: Option<&dyn LineParser>,
    line: &str,
) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(mut value) if value.is_object() => {
            if let Some(object) = value.as_object_mut() {
                if !object.contains_key("timestamp") {
                    object.insert("timestamp".into(), serde_json::json!(Utc::now()));
                }
                if !object.contains_key("aircraftId") {
                    object.insert("aircraftId".into(), serde_json::json!(state.aircraft_id));
                }
                if !object.contains_key("messageId") {
                    object.insert("messageId".into(), serde_json::json!(state.last_message_id + 1));
                }
            }
            match serde_json::from_value::<Telemetry>(value) {
                Ok(telemetry) if telemetry.validate().is_ok() => {
                    accept_telemetry(broker, state, telemetry);
                }
                _ => {
                    state.dropped_lines += 1;
                    debug!(aircraft = %state.aircraft_id, "dropped non-schema JSON line");
                }
            }
        }
        _ => match parser.and_then(|p| p.parse(&state.aircraft_id, trimmed)) {
            Some(telemetry) => accept_telemetry(broker, state, telemetry),
            None => {
                state.dropped_lines += 1;
                debug!(aircraft = %state.aircraft_id, "dropped unsupported line body");
            }
        },
    }
}

fn accept_telemetry(broker: &Broker, state: &mut LinkState, telemetry: Telemetry) {
    // Gaps are loss and fine; reversals are a protocol violation
    if telemetry.message_id <= state.last_message_id {
        state.dropped_lines += 1;
        debug!(
            aircraft = %state.aircraft_id,
            id = telemetry.message_id,
            last = state.last_message_id,
            "dropped messageId reversal"
        );
        return;
    }
    state.last_message_id = telemetry.message_id;
    broker.publish(
        &topic::telemetry(&telemetry.aircraft_id),
        serde_json::to_value(&telemetry).unwrap_or_default(),
    );
}
