/// Telemetry endpoint wire format.
///
/// Each server-side metric is exposed on its own path and answers with
///
/// ```json
/// { "name": "sse.connections.active", "measurements": [ { "statistic": "VALUE", "value": 12.0 } ] }
/// ```
///
/// Only the first measurement is read; everything else is optional.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_unit: Option<String>,
    pub measurements: Vec<Measurement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default)]
    pub statistic: Option<String>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TelemetryError {
    #[error("malformed metric body: {0}")]
    Malformed(String),
    #[error("metric has no measurements")]
    Empty,
}

impl MetricResponse {
    pub fn parse(body: &[u8]) -> Result<Self, TelemetryError> {
        serde_json::from_slice(body).map_err(|e| TelemetryError::Malformed(e.to_string()))
    }

    pub fn first_value(&self) -> Option<f64> {
        self.measurements.first().map(|m| m.value)
    }
}

/// Parse a metric body down to its first measured value.
pub fn parse_gauge(body: &[u8]) -> Result<f64, TelemetryError> {
    MetricResponse::parse(body)?.first_value().ok_or(TelemetryError::Empty)
}

/// The server-side gauges the harness samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gauge {
    /// Open push connections as seen by the server
    ActiveConnections,
    /// Server memory in use, bytes
    MemoryUsed,
    /// Notifications the server has sent since start
    NotificationsSent,
}

impl Gauge {
    pub const ALL: [Gauge; 3] = [Gauge::ActiveConnections, Gauge::MemoryUsed, Gauge::NotificationsSent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveConnections => "active_connections",
            Self::MemoryUsed => "memory_used",
            Self::NotificationsSent => "notifications_sent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actuator_body() {
        let body = br#"{"name":"jvm.memory.used","baseUnit":"bytes","measurements":[{"statistic":"VALUE","value":1.5E8}],"availableTags":[]}"#;
        let metric = MetricResponse::parse(body).unwrap();
        assert_eq!(metric.name.as_deref(), Some("jvm.memory.used"));
        assert_eq!(metric.base_unit.as_deref(), Some("bytes"));
        assert_eq!(metric.first_value(), Some(150_000_000.0));
    }

    #[test]
    fn test_parse_gauge_minimal_body() {
        assert_eq!(parse_gauge(br#"{"measurements":[{"value":3}]}"#), Ok(3.0));
    }

    #[test]
    fn test_parse_gauge_errors() {
        assert_eq!(parse_gauge(br#"{"measurements":[]}"#), Err(TelemetryError::Empty));
        assert!(matches!(parse_gauge(b"not json"), Err(TelemetryError::Malformed(_))));
        assert!(matches!(parse_gauge(br#"{"value":1}"#), Err(TelemetryError::Malformed(_))));
    }
}
