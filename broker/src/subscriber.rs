//! subscriber.rs — WebSocket subscriber transport.
//!
//! One task per connection: a `select!` loop relaying egress-queue frames to
//! the socket and handling inbound envelopes. Malformed frames earn an
//! `error{malformed}` reply; three consecutive strikes close the session.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use chrono::Utc;
use gcs_types::envelope::{Envelope, ErrorCode};
use tracing::{debug, warn};

use crate::broker::{Broker, SubscriberId};

const MAX_MALFORMED_STRIKES: u32 = 3;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(broker): State<Arc<Broker>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, broker))
}

#[derive(Debug, PartialEq, Eq)]
enum FrameOutcome {
    Continue,
    Close,
}

struct Session {
    id: SubscriberId,
    malformed_strikes: u32,
}

async fn handle_socket(mut socket: WebSocket, broker: Arc<Broker>) {
    if broker.is_shutting_down() {
        return;
    }
    let (id, queue) = broker.add_subscriber();
    let mut session = Session { id, malformed_strikes: 0 };

    let welcome = Envelope::Welcome { timestamp: Utc::now() };
    if send_envelope(&mut socket, &welcome).await.is_err() {
        broker.remove_subscriber(id);
        return;
    }

    loop {
        tokio::select! {
            frame = queue.next() => {
                match frame {
                    Some(frame) => {
                        if send_envelope(&mut socket, &frame.envelope).await.is_err() {
                            break;
                        }
                    }
                    // Queue closed: broker-side disconnect (overflow policy
                    // or shutdown)
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let (replies, outcome) = process_text(&broker, &mut session, &text).await;
                        for reply in &replies {
                            if send_envelope(&mut socket, reply).await.is_err() {
                                break;
                            }
                        }
                        if outcome == FrameOutcome::Close {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let (reply, outcome) = session.strike("binary frames are not accepted");
                        if send_envelope(&mut socket, &reply).await.is_err() {
                            break;
                        }
                        if outcome == FrameOutcome::Close {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(subscriber = session.id, "socket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    broker.remove_subscriber(session.id);
    debug!(subscriber = session.id, "session closed");
}

impl Session {
    fn strike(&mut self, details: &str) -> (Envelope, FrameOutcome) {
        self.malformed_strikes += 1;
        let outcome = if self.malformed_strikes >= MAX_MALFORMED_STRIKES {
            warn!(subscriber = self.id, "three consecutive malformed frames, closing");
            FrameOutcome::Close
        } else {
            FrameOutcome::Continue
        };
        (Envelope::error(ErrorCode::Malformed, details), outcome)
    }
}

/// Handle one text frame; returns the replies to send and whether to close.
async fn process_text(
    broker: &Broker,
    session: &mut Session,
    text: &str,
) -> (Vec<Envelope>, FrameOutcome) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            let (reply, outcome) = session.strike(&e.to_string());
            return (vec![reply], outcome);
        }
    };
    session.malformed_strikes = 0;

    match envelope {
        Envelope::Subscribe { topic } => match broker.subscribe(session.id, &topic) {
            Ok(()) => (Vec::new(), FrameOutcome::Continue),
            Err(e) => (
                vec![Envelope::error(ErrorCode::Malformed, e.to_string())],
                FrameOutcome::Continue,
            ),
        },
        Envelope::Unsubscribe { topic } => match broker.unsubscribe(session.id, &topic) {
            Ok(()) => (Vec::new(), FrameOutcome::Continue),
            Err(e) => (
                vec![Envelope::error(ErrorCode::Malformed, e.to_string())],
                FrameOutcome::Continue,
            ),
        },
        Envelope::Command { data } => match broker.deliver_command(data).await {
            Ok(()) => (Vec::new(), FrameOutcome::Continue),
            Err(e) => (
                vec![Envelope::error(e.code(), e.to_string())],
                FrameOutcome::Continue,
            ),
        },
        Envelope::Ping => (
            vec![Envelope::Pong { timestamp: Utc::now() }],
            FrameOutcome::Continue,
        ),
        // Server-to-client envelopes arriving inbound are protocol misuse
        Envelope::Welcome { .. }
        | Envelope::Publish { .. }
        | Envelope::Pong { .. }
        | Envelope::Error { .. } => {
            let (reply, outcome) = session.strike("unexpected server envelope from client");
            (vec![reply], outcome)
        }
    }
}

async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), axum::Error> {
    let text = serde_json::to_string(envelope).unwrap_or_default();
    socket.send(Message::Text(text)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_for(broker: &Broker) -> Session {
        let (id, _queue) = broker.add_subscriber();
        Session { id, malformed_strikes: 0 }
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let broker = Broker::new(16, false);
        let mut session = session_for(&broker);
        let (replies, outcome) = process_text(&broker, &mut session, r#"{"type":"ping"}"#).await;
        assert_eq!(outcome, FrameOutcome::Continue);
        assert!(matches!(replies.as_slice(), [Envelope::Pong { .. }]));
    }

    #[tokio::test]
    async fn three_consecutive_malformed_frames_close() {
        let broker = Broker::new(16, false);
        let mut session = session_for(&broker);

        for i in 1..=2 {
            let (replies, outcome) = process_text(&broker, &mut session, "not json").await;
            assert_eq!(outcome, FrameOutcome::Continue, "strike {i}");
            assert!(matches!(
                replies.as_slice(),
                [Envelope::Error { code: ErrorCode::Malformed, .. }]
            ));
        }
        let (_, outcome) = process_text(&broker, &mut session, "{\"type\":").await;
        assert_eq!(outcome, FrameOutcome::Close);
    }

    #[tokio::test]
    async fn valid_frame_resets_the_strike_counter() {
        let broker = Broker::new(16, false);
        let mut session = session_for(&broker);
        process_text(&broker, &mut session, "garbage").await;
        process_text(&broker, &mut session, "garbage").await;
        let (_, outcome) = process_text(&broker, &mut session, r#"{"type":"ping"}"#).await;
        assert_eq!(outcome, FrameOutcome::Continue);
        // Counter restarted: two more bad frames still only reach strike two
        let (_, outcome) = process_text(&broker, &mut session, "garbage").await;
        assert_eq!(outcome, FrameOutcome::Continue);
    }

    #[tokio::test]
    async fn subscribe_then_publish_reaches_the_queue() {
        let broker = Broker::new(16, false);
        let (id, queue) = broker.add_subscriber();
        let mut session = Session { id, malformed_strikes: 0 };

        let (replies, _) =
            process_text(&broker, &mut session, r#"{"type":"subscribe","topic":"alerts/*"}"#).await;
        assert!(replies.is_empty());

        broker.publish("alerts/ac1", serde_json::json!({ "level": "info" }));
        let frame = queue.try_pop().unwrap();
        assert!(matches!(frame.envelope, Envelope::Publish { topic, .. } if topic == "alerts/ac1"));
    }

    #[tokio::test]
    async fn bad_pattern_answers_malformed_without_strike_escalation() {
        let broker = Broker::new(16, false);
        let mut session = session_for(&broker);
        let (replies, outcome) = process_text(
            &broker,
            &mut session,
            r#"{"type":"subscribe","topic":"*/telemetry"}"#,
        )
        .await;
        assert_eq!(outcome, FrameOutcome::Continue);
        assert!(matches!(
            replies.as_slice(),
            [Envelope::Error { code: ErrorCode::Malformed, .. }]
        ));
        assert_eq!(session.malformed_strikes, 0);
    }

    #[tokio::test]
    async fn unroutable_command_answers_no_route() {
        let broker = Broker::new(16, false);
        let mut session = session_for(&broker);
        let command = serde_json::json!({
            "type": "command",
            "data": {
                "timestamp": Utc::now(),
                "source": "dashboard",
                "destination": "ghost",
                "commandType": "mission_start",
                "priority": "normal",
            }
        });
        let (replies, outcome) =
            process_text(&broker, &mut session, &command.to_string()).await;
        assert_eq!(outcome, FrameOutcome::Continue);
        assert!(matches!(
            replies.as_slice(),
            [Envelope::Error { code: ErrorCode::NoRoute, .. }]
        ));
    }
}
