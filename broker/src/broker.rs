//! broker.rs — topic-routed pub/sub core.
//!
//! Owns the subscription table, the per-subscriber egress queues, the serial
//! link registry and the hand-off points to the simulator host and the
//! external bus. Publishing is synchronous and never blocks the caller: every
//! queue push is a try-push with the drop policy applied inline.
//!
//! Drop policy per frame class:
//! - telemetry / status / info-warning-caution alerts: drop-oldest on overflow
//! - commands and critical/emergency alerts: never dropped; when a queue holds
//!   nothing but protected frames the subscriber is disconnected instead
//! - emergency-priority commands jump to the front of the queue

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Instant;

use chrono::Utc;
use flight_sim::{SimError, SimulatorHandle, TickSink};
use gcs_types::alert::SafetyAlert;
use gcs_types::command::{Command, WireCommand};
use gcs_types::envelope::{Envelope, ErrorCode};
use gcs_types::error::SchemaError;
use gcs_types::telemetry::Telemetry;
use gcs_types::topic;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

pub type SubscriberId = u64;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid topic pattern '{0}'")]
    BadPattern(String),

    #[error("unknown subscriber {0}")]
    UnknownSubscriber(SubscriberId),
}

/// Command delivery failure, mapped onto a wire error code at the transport.
#[derive(Debug, Error)]
pub enum DeliverError {
    #[error("invalid command: {0}")]
    Invalid(#[from] SchemaError),

    #[error("no route to aircraft '{0}'")]
    NoRoute(String),

    #[error("rejected at aircraft boundary: {0}")]
    Envelope(String),
}

impl DeliverError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Invalid(_) => ErrorCode::InvalidCommand,
            Self::NoRoute(_) => ErrorCode::NoRoute,
            Self::Envelope(_) => ErrorCode::Envelope,
        }
    }

    fn from_sim(err: SimError, destination: &str) -> Self {
        match err {
            SimError::Envelope(msg) => Self::Envelope(msg),
            SimError::NoHomeWaypoint => Self::Envelope("flight plan has no home waypoint".into()),
            SimError::Schema(e) => Self::Invalid(e),
            _ => Self::NoRoute(destination.to_string()),
        }
    }
}

// ── Egress queue ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub envelope: Envelope,
    pub protected: bool,
}

enum PushOutcome {
    Queued,
    DroppedOldest,
    DroppedNew,
    /// Queue is saturated with protected frames — the subscriber must go
    Saturated,
}

/// Bounded per-subscriber outbound queue. One producer side (the router),
/// one consumer (the connection's writer loop).
pub struct EgressQueue {
    frames: Mutex<VecDeque<QueuedFrame>>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
    dropped: AtomicU64,
}

impl EgressQueue {
    fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, frame: QueuedFrame, jump: bool) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) {
            return PushOutcome::Queued;
        }
        let outcome = {
            let mut frames = self.frames.lock().unwrap();
            if frames.len() < self.capacity {
                if jump {
                    frames.push_front(frame);
                } else {
                    frames.push_back(frame);
                }
                PushOutcome::Queued
            } else if let Some(victim) = frames.iter().position(|f| !f.protected) {
                frames.remove(victim);
                if jump {
                    frames.push_front(frame);
                } else {
                    frames.push_back(frame);
                }
                PushOutcome::DroppedOldest
            } else if frame.protected {
                PushOutcome::Saturated
            } else {
                PushOutcome::DroppedNew
            }
        };
        match outcome {
            PushOutcome::Queued => {}
            PushOutcome::DroppedOldest | PushOutcome::DroppedNew => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Saturated => {}
        }
        self.notify.notify_one();
        outcome
    }

    pub fn try_pop(&self) -> Option<QueuedFrame> {
        self.frames.lock().unwrap().pop_front()
    }

    /// Await the next frame; `None` once the queue is closed and drained.
    pub async fn next(&self) -> Option<QueuedFrame> {
        loop {
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ── External-bus attachment ───────────────────────────────────────────────────

/// One local publication bound for the external bus.
#[derive(Debug)]
pub struct BusFrame {
    pub topic: String,
    pub payload: serde_json::Value,
}

struct BusAttachment {
    tx: mpsc::Sender<BusFrame>,
    connected: Arc<AtomicBool>,
}

// ── Health snapshot ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerHealth {
    pub status: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub subscribers: usize,
    pub serial_links: usize,
    pub external_bus_connected: bool,
    pub uptime_secs: u64,
}

// ── Broker ────────────────────────────────────────────────────────────────────

struct SubscriberEntry {
    patterns: HashSet<String>,
    queue: Arc<EgressQueue>,
}

pub struct Broker {
    subscribers: RwLock<HashMap<SubscriberId, SubscriberEntry>>,
    next_subscriber_id: AtomicU64,
    serial_links: RwLock<HashMap<String, mpsc::Sender<Command>>>,
    link_shutdown: watch::Sender<bool>,
    simulator: OnceLock<SimulatorHandle>,
    bus: OnceLock<BusAttachment>,
    egress_capacity: usize,
    allow_inject: bool,
    started: Instant,
    shutting_down: AtomicBool,
}

impl Broker {
    pub fn new(egress_capacity: usize, allow_inject: bool) -> Arc<Self> {
        let (link_shutdown, _) = watch::channel(false);
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            serial_links: RwLock::new(HashMap::new()),
            link_shutdown,
            simulator: OnceLock::new(),
            bus: OnceLock::new(),
            egress_capacity,
            allow_inject,
            started: Instant::now(),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Wire in the simulator host (once, at startup).
    pub fn attach_simulator(&self, handle: SimulatorHandle) {
        let _ = self.simulator.set(handle);
    }

    /// Wire in the external-bus bridge (once, at startup).
    pub fn attach_bus(&self, tx: mpsc::Sender<BusFrame>, connected: Arc<AtomicBool>) {
        let _ = self.bus.set(BusAttachment { tx, connected });
    }

    pub fn allow_inject(&self) -> bool {
        self.allow_inject
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    // ── Subscriber lifecycle ─────────────────────────────────────────────────

    pub fn add_subscriber(&self) -> (SubscriberId, Arc<EgressQueue>) {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(EgressQueue::new(self.egress_capacity));
        self.subscribers
            .write()
            .unwrap()
            .insert(id, SubscriberEntry { patterns: HashSet::new(), queue: queue.clone() });
        debug!(subscriber = id, "subscriber connected");
        (id, queue)
    }

    pub fn remove_subscriber(&self, id: SubscriberId) {
        if let Some(entry) = self.subscribers.write().unwrap().remove(&id) {
            entry.queue.close();
            debug!(subscriber = id, "subscriber removed");
        }
    }

    /// Idempotent: subscribing twice to the same pattern is one subscription.
    pub fn subscribe(&self, id: SubscriberId, pattern: &str) -> Result<(), BrokerError> {
        if !topic::is_valid_pattern(pattern) {
            return Err(BrokerError::BadPattern(pattern.to_string()));
        }
        let mut subscribers = self.subscribers.write().unwrap();
        let entry = subscribers.get_mut(&id).ok_or(BrokerError::UnknownSubscriber(id))?;
        entry.patterns.insert(pattern.to_string());
        Ok(())
    }

    pub fn unsubscribe(&self, id: SubscriberId, pattern: &str) -> Result<(), BrokerError> {
        let mut subscribers = self.subscribers.write().unwrap();
        let entry = subscribers.get_mut(&id).ok_or(BrokerError::UnknownSubscriber(id))?;
        entry.patterns.remove(pattern);
        Ok(())
    }

    // ── Publishing ───────────────────────────────────────────────────────────

    /// Publish to the external bus (if attached) and every matching
    /// subscriber. Never blocks.
    pub fn publish(&self, topic: &str, message: serde_json::Value) {
        self.publish_inner(topic, message, true, false);
    }

    /// Same path for messages arriving FROM the bus — no re-forward.
    pub fn publish_from_bus(&self, topic: &str, message: serde_json::Value) {
        self.publish_inner(topic, message, false, false);
    }

    /// Operator-facing bypass: republish `body` under the given topic suffix.
    pub fn inject(&self, topic_suffix: &str, body: serde_json::Value) {
        info!(topic = topic_suffix, "inject");
        self.publish_inner(topic_suffix, body, true, false);
    }

    fn publish_inner(
        &self,
        topic: &str,
        message: serde_json::Value,
        forward_to_bus: bool,
        emergency: bool,
    ) {
        if forward_to_bus {
            if let Some(bus) = self.bus.get() {
                let frame = BusFrame { topic: topic.to_string(), payload: message.clone() };
                // Bus congestion must never block local routing
                let _ = bus.tx.try_send(frame);
            }
        }

        let protected = frame_is_protected(topic, &message);
        let envelope = Envelope::Publish {
            topic: topic.to_string(),
            message,
            timestamp: Utc::now(),
        };

        let mut saturated: Vec<(SubscriberId, Arc<EgressQueue>)> = Vec::new();
        {
            let subscribers = self.subscribers.read().unwrap();
            for (id, entry) in subscribers.iter() {
                if !entry.patterns.iter().any(|p| topic::matches(p, topic)) {
                    continue;
                }
                let frame = QueuedFrame { envelope: envelope.clone(), protected };
                match entry.queue.push(frame, emergency) {
                    PushOutcome::Queued => {}
                    PushOutcome::DroppedOldest | PushOutcome::DroppedNew => {
                        debug!(subscriber = id, topic, "egress overflow, dropped a frame");
                    }
                    PushOutcome::Saturated => saturated.push((*id, entry.queue.clone())),
                }
            }
        }
        for (id, queue) in saturated {
            warn!(subscriber = id, "egress saturated with protected frames — disconnecting");
            queue.close();
            self.subscribers.write().unwrap().remove(&id);
        }
    }

    // ── Command routing ──────────────────────────────────────────────────────

    /// Validate, echo on `commands/<dst>`, then deliver to exactly one
    /// destination. The echo is published before delivery so dashboards see
    /// the command ahead of any telemetry it influences.
    pub async fn deliver_command(&self, wire: WireCommand) -> Result<(), DeliverError> {
        let command = Command::from_wire(wire)?;
        let destination = command.destination.clone();

        let simulated = match self.simulator.get() {
            Some(handle) => handle.is_simulated(&destination).await,
            None => false,
        };
        let serial = if simulated {
            None
        } else {
            self.serial_links.read().unwrap().get(&destination).cloned()
        };
        if !simulated && serial.is_none() {
            return Err(DeliverError::NoRoute(destination));
        }

        let echo = serde_json::to_value(command.to_wire()).unwrap_or_default();
        self.publish_inner(&topic::commands(&destination), echo, true, command.is_emergency());

        if simulated {
            if let Some(handle) = self.simulator.get() {
                handle
                    .command_aircraft(command)
                    .await
                    .map_err(|e| DeliverError::from_sim(e, &destination))?;
            }
        } else if let Some(tx) = serial {
            tx.send(command).await.map_err(|_| DeliverError::NoRoute(destination))?;
        }
        Ok(())
    }

    // ── Serial links ─────────────────────────────────────────────────────────

    pub fn register_serial_link(&self, aircraft_id: &str, tx: mpsc::Sender<Command>) {
        self.serial_links.write().unwrap().insert(aircraft_id.to_string(), tx);
    }

    /// Watch that flips true when the broker closes its serial links. Each
    /// link task selects on this next to its command channel.
    pub fn link_shutdown_signal(&self) -> watch::Receiver<bool> {
        self.link_shutdown.subscribe()
    }

    /// Close every serial link: signal the link tasks and drop the outbound
    /// command senders so their channels drain to a clean end.
    pub fn close_serial_links(&self) {
        let _ = self.link_shutdown.send(true);
        let count = {
            let mut links = self.serial_links.write().unwrap();
            let count = links.len();
            links.clear();
            count
        };
        info!("closed {count} serial link(s)");
    }

    // ── Health & shutdown ────────────────────────────────────────────────────

    pub fn health(&self) -> BrokerHealth {
        BrokerHealth {
            status: "ok".into(),
            timestamp: Utc::now(),
            subscribers: self.subscribers.read().unwrap().len(),
            serial_links: self.serial_links.read().unwrap().len(),
            external_bus_connected: self
                .bus
                .get()
                .map(|b| b.connected.load(Ordering::Acquire))
                .unwrap_or(false),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Stop accepting subscribers and wait (bounded) for egress to drain.
    pub async fn shutdown(&self, drain_timeout: std::time::Duration) {
        self.shutting_down.store(true, Ordering::Release);
        let deadline = Instant::now() + drain_timeout;
        loop {
            let drained = {
                let subscribers = self.subscribers.read().unwrap();
                subscribers.values().all(|e| e.queue.is_empty())
            };
            if drained || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let mut subscribers = self.subscribers.write().unwrap();
        for entry in subscribers.values() {
            entry.queue.close();
        }
        subscribers.clear();
        info!("broker egress drained and closed");
    }
}

/// Commands and critical/emergency alerts are exempt from drop-oldest.
fn frame_is_protected(topic: &str, message: &serde_json::Value) -> bool {
    if topic.starts_with("commands/") {
        return true;
    }
    if topic.starts_with("alerts/") {
        return matches!(
            message.get("level").and_then(|l| l.as_str()),
            Some("critical") | Some("emergency")
        );
    }
    false
}

// ── Simulator tick sink ───────────────────────────────────────────────────────

impl TickSink for Broker {
    fn publish_telemetry(&self, telemetry: &Telemetry) {
        match serde_json::to_value(telemetry) {
            Ok(value) => self.publish(&topic::telemetry(&telemetry.aircraft_id), value),
            Err(e) => warn!("telemetry serialisation failed: {e}"),
        }
    }

    fn publish_alert(&self, alert: &SafetyAlert) {
        match serde_json::to_value(alert) {
            Ok(value) => self.publish(&topic::alerts(&alert.aircraft_id), value),
            Err(e) => warn!("alert serialisation failed: {e}"),
        }
    }

    fn publish_status(&self, subject: &str, status: serde_json::Value) {
        self.publish(&topic::status(subject), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcs_types::command::CommandPriority;

    fn telemetry_json(aircraft: &str, message_id: u64) -> serde_json::Value {
        serde_json::json!({
            "aircraftId": aircraft,
            "messageId": message_id,
        })
    }

    fn alert_json(level: &str) -> serde_json::Value {
        serde_json::json!({ "level": level, "aircraftId": "ac1" })
    }

    fn wire_command(destination: &str, priority: CommandPriority) -> WireCommand {
        WireCommand {
            timestamp: Utc::now(),
            source: "dashboard".into(),
            destination: destination.into(),
            command_type: "emergency_land".into(),
            parameters: Default::default(),
            priority,
            requires_ack: true,
        }
    }

    fn drain_publishes(queue: &EgressQueue) -> Vec<(String, serde_json::Value)> {
        let mut out = Vec::new();
        while let Some(frame) = queue.try_pop() {
            if let Envelope::Publish { topic, message, .. } = frame.envelope {
                out.push((topic, message));
            }
        }
        out
    }

    // Scenario: two subscribers, one aircraft — each sees every record once.
    #[test]
    fn exact_and_wildcard_subscribers_each_get_one_copy() {
        let broker = Broker::new(1024, false);
        let (a, queue_a) = broker.add_subscriber();
        let (b, queue_b) = broker.add_subscriber();
        broker.subscribe(a, "telemetry/ac1").unwrap();
        broker.subscribe(b, "*").unwrap();

        for i in 0..100 {
            broker.publish("telemetry/ac1", telemetry_json("ac1", i));
        }

        let got_a = drain_publishes(&queue_a);
        let got_b = drain_publishes(&queue_b);
        assert_eq!(got_a.len(), 100);
        assert_eq!(got_b.len(), 100);
        assert!(got_a.iter().all(|(t, _)| t == "telemetry/ac1"));
        // Order preserved per topic
        for (i, (_, msg)) in got_a.iter().enumerate() {
            assert_eq!(msg["messageId"], i as u64);
        }
    }

    // R2: subscribing twice behaves like subscribing once.
    #[test]
    fn subscribe_is_idempotent() {
        let broker = Broker::new(1024, false);
        let (id, queue) = broker.add_subscriber();
        broker.subscribe(id, "telemetry/ac1").unwrap();
        broker.subscribe(id, "telemetry/ac1").unwrap();
        broker.publish("telemetry/ac1", telemetry_json("ac1", 1));
        assert_eq!(drain_publishes(&queue).len(), 1);
    }

    #[test]
    fn overlapping_patterns_still_deliver_once() {
        let broker = Broker::new(1024, false);
        let (id, queue) = broker.add_subscriber();
        broker.subscribe(id, "telemetry/ac1").unwrap();
        broker.subscribe(id, "telemetry/*").unwrap();
        broker.subscribe(id, "*").unwrap();
        broker.publish("telemetry/ac1", telemetry_json("ac1", 1));
        assert_eq!(drain_publishes(&queue).len(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broker = Broker::new(1024, false);
        let (id, queue) = broker.add_subscriber();
        broker.subscribe(id, "alerts/*").unwrap();
        broker.publish("alerts/ac1", alert_json("info"));
        broker.unsubscribe(id, "alerts/*").unwrap();
        broker.publish("alerts/ac1", alert_json("info"));
        assert_eq!(drain_publishes(&queue).len(), 1);
    }

    #[test]
    fn invalid_pattern_rejected() {
        let broker = Broker::new(1024, false);
        let (id, _queue) = broker.add_subscriber();
        assert!(matches!(
            broker.subscribe(id, "telemetry/*/raw"),
            Err(BrokerError::BadPattern(_))
        ));
    }

    // Scenario: slow subscriber — telemetry drops oldest, critical alerts survive.
    #[test]
    fn drop_oldest_spares_critical_alerts() {
        let broker = Broker::new(8, false);
        let (id, queue) = broker.add_subscriber();
        broker.subscribe(id, "*").unwrap();

        broker.publish("alerts/ac1", alert_json("critical"));
        for i in 0..100 {
            broker.publish("telemetry/ac1", telemetry_json("ac1", i));
        }
        broker.publish("alerts/ac1", alert_json("emergency"));

        let frames = drain_publishes(&queue);
        assert!(frames.len() <= 8);
        let critical: Vec<_> = frames
            .iter()
            .filter(|(t, _)| t.starts_with("alerts/"))
            .collect();
        assert_eq!(critical.len(), 2, "protected alerts must survive the flood");
        // The telemetry that survived is the newest
        let last_telemetry = frames.iter().rev().find(|(t, _)| t.starts_with("telemetry/")).unwrap();
        assert_eq!(last_telemetry.1["messageId"], 99);
    }

    #[test]
    fn saturation_with_protected_frames_disconnects() {
        let broker = Broker::new(2, false);
        let (id, queue) = broker.add_subscriber();
        broker.subscribe(id, "alerts/*").unwrap();

        for _ in 0..3 {
            broker.publish("alerts/ac1", alert_json("critical"));
        }
        assert!(queue.is_closed());
        assert_eq!(broker.health().subscribers, 0);
        let _ = id;
    }

    #[tokio::test]
    async fn no_route_command_yields_error_and_no_echo() {
        let broker = Broker::new(1024, false);
        let (id, queue) = broker.add_subscriber();
        broker.subscribe(id, "commands/*").unwrap();

        let err = broker
            .deliver_command(wire_command("ghost", CommandPriority::Normal))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliverError::NoRoute(_)));
        assert_eq!(err.code(), ErrorCode::NoRoute);
        assert!(drain_publishes(&queue).is_empty(), "no echo for unroutable commands");
    }

    #[tokio::test]
    async fn command_echo_precedes_serial_delivery() {
        let broker = Broker::new(1024, false);
        let (id, queue) = broker.add_subscriber();
        broker.subscribe(id, "commands/ac1").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        broker.register_serial_link("ac1", tx);

        broker
            .deliver_command(wire_command("ac1", CommandPriority::Normal))
            .await
            .unwrap();

        // Echo already queued by the time delivery returned
        let frames = drain_publishes(&queue);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1["commandType"], "emergency_land");
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.destination, "ac1");
    }

    #[tokio::test]
    async fn malformed_command_is_rejected_before_routing() {
        let broker = Broker::new(1024, false);
        let mut wire = wire_command("ac1", CommandPriority::Emergency);
        wire.requires_ack = false; // violates the emergency invariant
        let err = broker.deliver_command(wire).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCommand);
    }

    // Emergency commands jump ahead of queued traffic.
    #[tokio::test]
    async fn emergency_command_jumps_the_queue() {
        let broker = Broker::new(1024, false);
        let (id, queue) = broker.add_subscriber();
        broker.subscribe(id, "*").unwrap();
        let (tx, _rx) = mpsc::channel(4);
        broker.register_serial_link("ac1", tx);

        for i in 0..10 {
            broker.publish("telemetry/ac1", telemetry_json("ac1", i));
        }
        broker
            .deliver_command(wire_command("ac1", CommandPriority::Emergency))
            .await
            .unwrap();

        let first = queue.try_pop().unwrap();
        match first.envelope {
            Envelope::Publish { topic, .. } => assert_eq!(topic, "commands/ac1"),
            other => panic!("expected publish, got {other:?}"),
        }
    }

    // Scenario: emergency command while the egress queue is full of routine
    // traffic — echoed on commands/<dst> ahead of everything, and accepted by
    // the simulated aircraft.
    #[tokio::test]
    async fn emergency_land_reaches_a_simulated_aircraft_past_a_full_queue() {
        use flight_sim::host::{self, SimulatorHostConfig};
        use gcs_types::telemetry::Position;

        let broker = Broker::new(8, false);
        let sim = host::spawn(SimulatorHostConfig { tick_hz: 100.0, seed: 1 }, broker.clone());
        broker.attach_simulator(sim.clone());

        sim.create(
            "ac1",
            Position { latitude: 52.0, longitude: 4.0, altitude: 100.0 },
            flight_sim::AircraftKind::FixedWing,
        )
        .await
        .unwrap();

        let (id, queue) = broker.add_subscriber();
        broker.subscribe(id, "*").unwrap();
        for i in 0..20 {
            broker.publish("telemetry/ac1", telemetry_json("ac1", i));
        }

        broker
            .deliver_command(wire_command("ac1", CommandPriority::Emergency))
            .await
            .unwrap();

        let first = queue.try_pop().unwrap();
        assert!(first.protected);
        match first.envelope {
            Envelope::Publish { topic, message, .. } => {
                assert_eq!(topic, "commands/ac1");
                assert_eq!(message["commandType"], "emergency_land");
            }
            other => panic!("expected command echo first, got {other:?}"),
        }
        sim.shutdown().await.unwrap();
    }

    #[test]
    fn health_counts_reflect_registrations() {
        let broker = Broker::new(1024, false);
        let (_, _q1) = broker.add_subscriber();
        let (_, _q2) = broker.add_subscriber();
        let (tx, _rx) = mpsc::channel(1);
        broker.register_serial_link("ac1", tx);

        let health = broker.health();
        assert_eq!(health.subscribers, 2);
        assert_eq!(health.serial_links, 1);
        assert!(!health.external_bus_connected);
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn close_serial_links_signals_tasks_and_clears_the_registry() {
        let broker = Broker::new(16, false);
        let (tx, mut rx) = mpsc::channel::<Command>(1);
        broker.register_serial_link("ac1", tx);
        let mut shutdown = broker.link_shutdown_signal();
        assert!(!*shutdown.borrow());

        broker.close_serial_links();

        assert_eq!(broker.health().serial_links, 0);
        shutdown.changed().await.unwrap();
        assert!(*shutdown.borrow());
        // The broker-held sender is gone, so the channel drains to None
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn queue_next_wakes_on_push_and_ends_on_close() {
        let broker = Broker::new(16, false);
        let (id, queue) = broker.add_subscriber();
        broker.subscribe(id, "*").unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        broker.publish("status/ac1", serde_json::json!({"state": "connected"}));
        let frame = waiter.await.unwrap();
        assert!(frame.is_some());

        queue.close();
        assert!(queue.next().await.is_none());
    }
}
