//! external_bus.rs — Redis pub/sub bridge.
//!
//! Optional. When configured, every local publication is forwarded to
//! `paparazzi/<topic>` on the bus and inbound bus messages are fed back into
//! local routing. Connection loss is non-fatal: the broker keeps routing
//! locally while this task reconnects with backoff, and bus congestion never
//! blocks a local publish (the broker hands frames over on a bounded channel
//! with try-send semantics).
//!
//! Outbound payloads are wrapped `{origin, payload}` so our own publications
//! echoing back through the subscription are recognised and skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use gcs_types::topic;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, BusFrame};

const OUTBOUND_QUEUE: usize = 1024;
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Attach a bus bridge to the broker and run it in the background.
pub fn spawn_bus(broker: Arc<Broker>, url: String) {
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let connected = Arc::new(AtomicBool::new(false));
    broker.attach_bus(tx, connected.clone());
    tokio::spawn(bus_task(broker, url, rx, connected));
}

async fn bus_task(
    broker: Arc<Broker>,
    url: String,
    mut outbound: mpsc::Receiver<BusFrame>,
    connected: Arc<AtomicBool>,
) {
    let origin = Uuid::new_v4().to_string();
    let mut backoff = Duration::from_secs(1);

    loop {
        match run_connection(&broker, &url, &mut outbound, &connected, &origin).await {
            Ok(()) => {
                // Outbound channel closed: broker shut down
                connected.store(false, Ordering::Release);
                return;
            }
            Err(e) => {
                connected.store(false, Ordering::Release);
                warn!("external bus: {e} — reconnecting in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_MAX);
            }
        }
    }
}

async fn run_connection(
    broker: &Broker,
    url: &str,
    outbound: &mut mpsc::Receiver<BusFrame>,
    connected: &AtomicBool,
    origin: &str,
) -> redis::RedisResult<()> {
    let client = redis::Client::open(url)?;
    let mut publish_conn = client.get_multiplexed_async_connection().await?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(format!("{}/*", topic::BUS_ROOT)).await?;
    connected.store(true, Ordering::Release);
    info!("📡 external bus connected at {url}");

    let mut inbound = pubsub.on_message();
    loop {
        tokio::select! {
            message = inbound.next() => {
                let Some(message) = message else {
                    return Err(redis::RedisError::from((
                        redis::ErrorKind::IoError,
                        "subscription stream ended",
                    )));
                };
                let channel = message.get_channel_name().to_string();
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!("bus payload decode failed: {e}");
                        continue;
                    }
                };
                if let Some((local_topic, body)) = extract_inbound(&channel, &payload, origin) {
                    broker.publish_from_bus(&local_topic, body);
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { return Ok(()) };
                let channel = format!("{}/{}", topic::BUS_ROOT, frame.topic);
                let wrapped = serde_json::json!({
                    "origin": origin,
                    "payload": frame.payload,
                })
                .to_string();
                let _: () = publish_conn.publish(channel, wrapped).await?;
            }
        }
    }
}

/// Map a bus message onto a local publication, skipping our own echoes.
/// Foreign producers may publish bare payloads without the origin wrapper.
fn extract_inbound(
    channel: &str,
    payload: &str,
    own_origin: &str,
) -> Option<(String, serde_json::Value)> {
    let local_topic = channel.strip_prefix(topic::BUS_ROOT)?.strip_prefix('/')?;
    if local_topic.is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    match value.get("origin").and_then(|o| o.as_str()) {
        Some(origin) if origin == own_origin => None,
        Some(_) => Some((local_topic.to_string(), value.get("payload")?.clone())),
        None => Some((local_topic.to_string(), value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_outside_bus_root_is_ignored() {
        assert!(extract_inbound("other/telemetry/ac1", "{}", "me").is_none());
        assert!(extract_inbound("paparazzi", "{}", "me").is_none());
        assert!(extract_inbound("paparazzi/", "{}", "me").is_none());
    }

    #[test]
    fn own_echo_is_skipped() {
        let payload = r#"{"origin":"me","payload":{"aircraftId":"ac1"}}"#;
        assert!(extract_inbound("paparazzi/telemetry/ac1", payload, "me").is_none());
    }

    #[test]
    fn foreign_wrapped_payload_is_unwrapped() {
        let payload = r#"{"origin":"them","payload":{"aircraftId":"ac1"}}"#;
        let (topic, body) = extract_inbound("paparazzi/telemetry/ac1", payload, "me").unwrap();
        assert_eq!(topic, "telemetry/ac1");
        assert_eq!(body["aircraftId"], "ac1");
    }

    #[test]
    fn bare_payload_without_wrapper_passes_through() {
        let payload = r#"{"aircraftId":"ac1","messageId":4}"#;
        let (topic, body) = extract_inbound("paparazzi/telemetry/ac1", payload, "me").unwrap();
        assert_eq!(topic, "telemetry/ac1");
        assert_eq!(body["messageId"], 4);
    }

    #[test]
    fn non_json_inbound_is_dropped() {
        assert!(extract_inbound("paparazzi/alerts/ac1", "not json", "me").is_none());
    }
}
