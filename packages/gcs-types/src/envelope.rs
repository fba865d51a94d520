//! Subscriber transport envelopes.
//!
//! Every frame on the subscriber WebSocket is one of these, tagged by `type`.
//! The broker sends `welcome`/`publish`/`pong`/`error`; subscribers send
//! `subscribe`/`unsubscribe`/`command`/`ping`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::WireCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidCommand,
    NoRoute,
    Malformed,
    /// Command rejected at the aircraft boundary (flight-envelope violation,
    /// RTH without a home waypoint, ...)
    Envelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Welcome {
        timestamp: DateTime<Utc>,
    },
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        message: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Command {
        data: WireCommand,
    },
    Ping,
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        code: ErrorCode,
        details: String,
    },
}

impl Envelope {
    pub fn error(code: ErrorCode, details: impl Into<String>) -> Self {
        Self::Error { code, details: details.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_by_type_field() {
        let frame = serde_json::to_value(Envelope::Subscribe { topic: "telemetry/*".into() }).unwrap();
        assert_eq!(frame["type"], "subscribe");
        assert_eq!(frame["topic"], "telemetry/*");

        let frame = serde_json::to_value(Envelope::Ping).unwrap();
        assert_eq!(frame, serde_json::json!({ "type": "ping" }));
    }

    #[test]
    fn parses_client_frames() {
        let parsed: Envelope = serde_json::from_str(r#"{"type":"unsubscribe","topic":"alerts/ac1"}"#).unwrap();
        assert!(matches!(parsed, Envelope::Unsubscribe { topic } if topic == "alerts/ac1"));

        let err: Result<Envelope, _> = serde_json::from_str(r#"{"type":"launch_missiles"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn error_codes_serialise_snake_case() {
        let frame = serde_json::to_value(Envelope::error(ErrorCode::NoRoute, "unknown aircraft ac9")).unwrap();
        assert_eq!(frame["code"], "no_route");
    }
}
