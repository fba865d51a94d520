//! Control commands: free-map wire shape and the tagged internal form.
//!
//! On the wire a command is `{commandType, parameters}` with a free map, which
//! is what dashboards and the external bus speak. Internally nothing carries a
//! property bag: the boundary normalises into [`CommandKind`], one variant per
//! command type with exactly the fields it needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;
use crate::mission::{FlightPlan, Waypoint};

// ── Priority ──────────────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CommandPriority {
    Low,
    #[default]
    Normal,
    High,
    Emergency,
}

// ── Wire form ─────────────────────────────────────────────────────────────────

/// Boundary-only command shape. `parameters` stays free-form here and is
/// normalised away by [`Command::from_wire`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCommand {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    /// Destination aircraft id — resolves to a serial link or a simulated
    /// aircraft at routing time.
    pub destination: String,
    pub command_type: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
    #[serde(default)]
    pub priority: CommandPriority,
    #[serde(default)]
    pub requires_ack: bool,
}

// ── Normalised form ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    WaypointUpdate { waypoint: Waypoint },
    FlightPlanUpload { plan: FlightPlan },
    ParameterSet { name: String, value: Value },
    MissionStart,
    MissionPause,
    MissionAbort,
    ReturnToHome,
    EmergencyLand,
}

impl CommandKind {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::WaypointUpdate { .. } => "waypoint_update",
            Self::FlightPlanUpload { .. } => "flight_plan_upload",
            Self::ParameterSet { .. } => "parameter_set",
            Self::MissionStart => "mission_start",
            Self::MissionPause => "mission_pause",
            Self::MissionAbort => "mission_abort",
            Self::ReturnToHome => "return_to_home",
            Self::EmergencyLand => "emergency_land",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub destination: String,
    pub kind: CommandKind,
    pub priority: CommandPriority,
    pub requires_ack: bool,
}

fn required<'a>(
    params: &'a serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, SchemaError> {
    params.get(field).ok_or(SchemaError::MissingParameter(field))
}

fn parse_param<T: serde::de::DeserializeOwned>(
    params: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<T, SchemaError> {
    serde_json::from_value(required(params, field)?.clone())
        .map_err(|e| SchemaError::BadParameter { field, message: e.to_string() })
}

impl Command {
    /// Normalise a wire command. Rejects unknown types, missing/malformed
    /// parameters, empty destinations, and emergency commands that do not
    /// request an ack.
    pub fn from_wire(wire: WireCommand) -> Result<Self, SchemaError> {
        if wire.destination.is_empty() {
            return Err(SchemaError::Empty { field: "destination" });
        }
        if wire.priority == CommandPriority::Emergency && !wire.requires_ack {
            return Err(SchemaError::Invariant("emergency commands must set requiresAck"));
        }

        let kind = match wire.command_type.as_str() {
            "waypoint_update" => CommandKind::WaypointUpdate {
                waypoint: parse_param(&wire.parameters, "waypoint")?,
            },
            "flight_plan_upload" => {
                let plan: FlightPlan = parse_param(&wire.parameters, "plan")?;
                plan.validate()?;
                CommandKind::FlightPlanUpload { plan }
            }
            "parameter_set" => CommandKind::ParameterSet {
                name: parse_param(&wire.parameters, "name")?,
                value: required(&wire.parameters, "value")?.clone(),
            },
            "mission_start" => CommandKind::MissionStart,
            "mission_pause" => CommandKind::MissionPause,
            "mission_abort" => CommandKind::MissionAbort,
            "return_to_home" => CommandKind::ReturnToHome,
            "emergency_land" => CommandKind::EmergencyLand,
            other => return Err(SchemaError::UnknownCommandType(other.to_string())),
        };

        Ok(Self {
            timestamp: wire.timestamp,
            source: wire.source,
            destination: wire.destination,
            kind,
            priority: wire.priority,
            requires_ack: wire.requires_ack,
        })
    }

    /// Rebuild the wire shape — for the `commands/<dst>` echo and the serial
    /// line formatter. The free map only ever exists on the wire.
    pub fn to_wire(&self) -> WireCommand {
        let mut parameters = serde_json::Map::new();
        match &self.kind {
            CommandKind::WaypointUpdate { waypoint } => {
                parameters.insert("waypoint".into(), serde_json::json!(waypoint));
            }
            CommandKind::FlightPlanUpload { plan } => {
                parameters.insert("plan".into(), serde_json::json!(plan));
            }
            CommandKind::ParameterSet { name, value } => {
                parameters.insert("name".into(), Value::String(name.clone()));
                parameters.insert("value".into(), value.clone());
            }
            _ => {}
        }
        WireCommand {
            timestamp: self.timestamp,
            source: self.source.clone(),
            destination: self.destination.clone(),
            command_type: self.kind.wire_name().to_string(),
            parameters,
            priority: self.priority,
            requires_ack: self.requires_ack,
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.priority == CommandPriority::Emergency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(command_type: &str, parameters: Value) -> WireCommand {
        WireCommand {
            timestamp: Utc::now(),
            source: "dashboard".into(),
            destination: "sumo_001".into(),
            command_type: command_type.into(),
            parameters: parameters.as_object().cloned().unwrap_or_default(),
            priority: CommandPriority::Normal,
            requires_ack: false,
        }
    }

    #[test]
    fn normalises_simple_commands() {
        for (name, expect) in [
            ("mission_start", CommandKind::MissionStart),
            ("mission_pause", CommandKind::MissionPause),
            ("mission_abort", CommandKind::MissionAbort),
            ("return_to_home", CommandKind::ReturnToHome),
            ("emergency_land", CommandKind::EmergencyLand),
        ] {
            let cmd = Command::from_wire(wire(name, Value::Null)).unwrap();
            assert_eq!(cmd.kind, expect);
            assert_eq!(cmd.kind.wire_name(), name);
        }
    }

    #[test]
    fn rejects_unknown_type() {
        let err = Command::from_wire(wire("self_destruct", Value::Null)).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownCommandType(_)));
    }

    #[test]
    fn emergency_requires_ack() {
        let mut w = wire("emergency_land", Value::Null);
        w.priority = CommandPriority::Emergency;
        assert!(Command::from_wire(w.clone()).is_err());
        w.requires_ack = true;
        assert!(Command::from_wire(w).is_ok());
    }

    #[test]
    fn parameter_set_round_trips_through_wire_form() {
        let w = wire("parameter_set", serde_json::json!({ "name": "cruiseSpeed", "value": 17.5 }));
        let cmd = Command::from_wire(w).unwrap();
        let back = cmd.to_wire();
        assert_eq!(back.command_type, "parameter_set");
        assert_eq!(back.parameters["name"], "cruiseSpeed");
        assert_eq!(back.parameters["value"], 17.5);
        assert_eq!(Command::from_wire(back).unwrap(), cmd);
    }

    #[test]
    fn waypoint_update_requires_waypoint_parameter() {
        let err = Command::from_wire(wire("waypoint_update", serde_json::json!({}))).unwrap_err();
        assert!(matches!(err, SchemaError::MissingParameter("waypoint")));
    }

    #[test]
    fn priority_order_puts_emergency_last() {
        assert!(CommandPriority::Emergency > CommandPriority::High);
        assert!(CommandPriority::High > CommandPriority::Normal);
        assert!(CommandPriority::Normal > CommandPriority::Low);
    }
}
