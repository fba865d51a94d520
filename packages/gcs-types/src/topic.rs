//! Hierarchical topics and subscription patterns.
//!
//! Topics are slash-separated: `telemetry/<aircraftId>`, `commands/<id>`,
//! `status/<id>`, `alerts/<id>`. Subscription patterns are either an exact
//! topic, a prefix with a trailing wildcard (`telemetry/*`), or the catch-all
//! `*`. Wildcards are only valid at the tail.

/// Topic roots used by the core.
pub const TELEMETRY: &str = "telemetry";
pub const COMMANDS: &str = "commands";
pub const STATUS: &str = "status";
pub const ALERTS: &str = "alerts";

/// External-bus namespace prepended to every bridged topic.
pub const BUS_ROOT: &str = "paparazzi";

pub fn telemetry(aircraft_id: &str) -> String {
    format!("{TELEMETRY}/{aircraft_id}")
}

pub fn commands(aircraft_id: &str) -> String {
    format!("{COMMANDS}/{aircraft_id}")
}

pub fn status(aircraft_id: &str) -> String {
    format!("{STATUS}/{aircraft_id}")
}

pub fn alerts(aircraft_id: &str) -> String {
    format!("{ALERTS}/{aircraft_id}")
}

/// Does `pattern` match `topic`?
///
/// Exact segments win over wildcards only in the sense that matching is
/// per-pattern; a subscriber holding both `telemetry/ac1` and `telemetry/*`
/// still receives one copy (the subscription set is consulted once per
/// publication).
pub fn matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return topic
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'));
    }
    pattern == topic
}

/// A syntactically valid pattern: non-empty, no interior wildcard segments.
pub fn is_valid_pattern(pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if pattern == "*" {
        return true;
    }
    let body = pattern.strip_suffix("/*").unwrap_or(pattern);
    !body.is_empty() && !body.split('/').any(|seg| seg.is_empty() || seg.contains('*'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(matches("telemetry/ac1", "telemetry/ac1"));
        assert!(!matches("telemetry/ac1", "telemetry/ac2"));
        assert!(!matches("telemetry/ac1", "alerts/ac1"));
    }

    #[test]
    fn trailing_wildcard() {
        assert!(matches("telemetry/*", "telemetry/ac1"));
        assert!(matches("telemetry/*", "telemetry/ac1/raw"));
        assert!(!matches("telemetry/*", "telemetry"));
        assert!(!matches("telemetry/*", "telemetrystream/ac1"));
    }

    #[test]
    fn catch_all() {
        assert!(matches("*", "telemetry/ac1"));
        assert!(matches("*", "alerts/ac9"));
    }

    #[test]
    fn pattern_validity() {
        assert!(is_valid_pattern("*"));
        assert!(is_valid_pattern("telemetry/*"));
        assert!(is_valid_pattern("commands/ac1"));
        assert!(!is_valid_pattern(""));
        assert!(!is_valid_pattern("telemetry/*/deep"));
        assert!(!is_valid_pattern("*/ac1"));
        assert!(!is_valid_pattern("telemetry//ac1"));
    }

    #[test]
    fn topic_builders() {
        assert_eq!(telemetry("ac1"), "telemetry/ac1");
        assert_eq!(commands("ac1"), "commands/ac1");
        assert_eq!(status("ac1"), "status/ac1");
        assert_eq!(alerts("ac1"), "alerts/ac1");
    }
}
