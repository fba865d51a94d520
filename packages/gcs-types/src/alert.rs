//! Safety alerts published under `alerts/<aircraftId>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Caution,
    Critical,
    Emergency,
}

impl AlertLevel {
    /// Critical/emergency alerts are exempt from queue-drop policy.
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Critical | Self::Emergency)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    System,
    Navigation,
    Weather,
    Fuel,
    Communication,
    Mission,
}

impl AlertCategory {
    fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Navigation => "navigation",
            Self::Weather => "weather",
            Self::Fuel => "fuel",
            Self::Communication => "communication",
            Self::Mission => "mission",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyAlert {
    /// Stable per aircraft+kind so repeated emissions coalesce on dashboards.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub aircraft_id: String,
    pub level: AlertLevel,
    pub category: AlertCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub acknowledged: bool,
}

impl SafetyAlert {
    /// `kind` is a short slug naming the condition (`battery_low`,
    /// `gps_low_sats`, `link_timeout`, ...). It keys the coalescing id.
    pub fn new(
        aircraft_id: &str,
        level: AlertLevel,
        category: AlertCategory,
        kind: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("{aircraft_id}/{}/{kind}", category.as_str()),
            timestamp: Utc::now(),
            aircraft_id: aircraft_id.to_string(),
            level,
            category,
            message: message.into(),
            data: None,
            acknowledged: false,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
