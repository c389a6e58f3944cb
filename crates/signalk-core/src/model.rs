//! SignalK data model types.
//!
//! These types represent the structures flowing through the publisher:
//! - Delta messages as delivered by a SignalK server subscription
//! - Raw updates, one per path/value pair, with a resolved timestamp
//! - Publishable entries, the screened scalar values that become MQTT messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A SignalK delta message containing one or more updates.
///
/// Deltas are the primary mechanism for transmitting changes in SignalK.
/// They contain a context (which vessel/object) and a list of updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// The context path (e.g., "vessels.urn:mrn:signalk:uuid:...")
    /// If None, defaults to "vessels.self"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// The list of updates in this delta
    pub updates: Vec<Update>,
}

/// A single update within a delta, containing values from one source at one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Reference to source in /sources (e.g., "nmea0183.GP")
    #[serde(rename = "$source", skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,

    /// Embedded source object (alternative to $source)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,

    /// ISO 8601 timestamp (UTC)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// The path-value pairs in this update. Meta-only updates carry none.
    #[serde(default)]
    pub values: Vec<PathValue>,

    /// Metadata updates, passed through untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Vec<Value>>,
}

/// A single path-value pair within an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathValue {
    /// The SignalK path (e.g., "navigation.speedOverGround")
    pub path: String,

    /// The value at this path
    pub value: Value,
}

/// Source information describing where data originated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Label identifying the source bus (e.g., "N2K-1", "serial-COM1")
    pub label: String,

    /// Type of source (e.g., "NMEA0183", "NMEA2000", "signalk")
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,

    /// NMEA 2000 source address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,

    /// NMEA 0183 sentence type (e.g., "RMC", "GGA")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence: Option<String>,

    /// NMEA 0183 talker ID (e.g., "GP", "II")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub talker: Option<String>,
}

impl Update {
    /// Resolve the update timestamp, falling back to `now` when it is
    /// missing or not valid RFC 3339.
    pub fn resolved_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or(now)
    }
}

impl Delta {
    /// Flatten the delta into raw updates, preserving the order of updates
    /// and of values within each update.
    pub fn raw_updates(&self, now: DateTime<Utc>) -> Vec<RawUpdate> {
        self.updates
            .iter()
            .flat_map(|update| {
                let timestamp = update.resolved_timestamp(now);
                update
                    .values
                    .iter()
                    .map(move |pv| RawUpdate::new(&pv.path, UpdateValue::from(&pv.value), timestamp))
            })
            .collect()
    }
}

// ============================================================================
// Publisher input/output values
// ============================================================================

/// The value carried by a raw update.
///
/// Numbers are kept as `f64` so that non-finite values coming from
/// non-JSON sources can be represented and screened out.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateValue {
    /// Explicit null: the data point exists but has no value.
    Null,
    /// A scalar number, possibly NaN or infinite.
    Number(f64),
    /// A structured value such as a position or attitude.
    Object(Map<String, Value>),
    /// Strings, booleans and arrays.
    Other(Value),
}

impl From<&Value> for UpdateValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => UpdateValue::Null,
            Value::Number(n) => n
                .as_f64()
                .map(UpdateValue::Number)
                .unwrap_or_else(|| UpdateValue::Other(value.clone())),
            Value::Object(map) => UpdateValue::Object(map.clone()),
            other => UpdateValue::Other(other.clone()),
        }
    }
}

impl From<Value> for UpdateValue {
    fn from(value: Value) -> Self {
        UpdateValue::from(&value)
    }
}

impl From<f64> for UpdateValue {
    fn from(value: f64) -> Self {
        UpdateValue::Number(value)
    }
}

impl std::fmt::Display for UpdateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateValue::Null => write!(f, "null"),
            UpdateValue::Number(n) => write!(f, "{}", n),
            UpdateValue::Object(map) => write!(f, "{}", Value::Object(map.clone())),
            UpdateValue::Other(v) => write!(f, "{}", v),
        }
    }
}

/// One path/value pair from a subscription batch, with its timestamp resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RawUpdate {
    pub path: String,
    pub value: UpdateValue,
    pub timestamp: DateTime<Utc>,
}

impl RawUpdate {
    pub fn new(path: &str, value: impl Into<UpdateValue>, timestamp: DateTime<Utc>) -> Self {
        Self {
            path: path.to_string(),
            value: value.into(),
            timestamp,
        }
    }
}

/// A screened value that is safe to publish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryValue {
    /// Always finite.
    Number(f64),
    /// Published as the string "null".
    Null,
}

/// A publishable scalar entry produced by the value filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub path: String,
    pub value: EntryValue,
    pub timestamp: DateTime<Utc>,
}

impl Entry {
    pub fn number(path: &str, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            path: path.to_string(),
            value: EntryValue::Number(value),
            timestamp,
        }
    }

    pub fn null(path: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            path: path.to_string(),
            value: EntryValue::Null,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delta_deserialize() {
        let json = r#"{
            "context": "vessels.self",
            "updates": [{
                "$source": "nmea0183.GP",
                "timestamp": "2024-01-17T10:30:00.000Z",
                "values": [
                    {"path": "navigation.speedOverGround", "value": 3.85}
                ]
            }]
        }"#;

        let delta: Delta = serde_json::from_str(json).unwrap();
        assert_eq!(delta.context, Some("vessels.self".to_string()));
        assert_eq!(delta.updates.len(), 1);
        assert_eq!(delta.updates[0].values[0].path, "navigation.speedOverGround");
    }

    #[test]
    fn test_meta_only_update_deserializes() {
        let json = r#"{
            "context": "vessels.self",
            "updates": [{"meta": [{"path": "navigation.speedOverGround", "value": {"units": "m/s"}}]}]
        }"#;

        let delta: Delta = serde_json::from_str(json).unwrap();
        assert!(delta.updates[0].values.is_empty());
        assert!(delta.raw_updates(Utc::now()).is_empty());
    }

    #[test]
    fn test_raw_updates_keep_order_and_timestamps() {
        let json = r#"{
            "context": "vessels.self",
            "updates": [
                {
                    "timestamp": "2024-01-17T10:30:00.000Z",
                    "values": [
                        {"path": "navigation.speedOverGround", "value": 3.85},
                        {"path": "navigation.position", "value": {"latitude": 60.1, "longitude": 24.9}}
                    ]
                },
                {
                    "timestamp": "2024-01-17T10:31:00.000Z",
                    "values": [{"path": "environment.depth.belowTransducer", "value": null}]
                }
            ]
        }"#;
        let delta: Delta = serde_json::from_str(json).unwrap();
        let raw = delta.raw_updates(Utc::now());

        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0].path, "navigation.speedOverGround");
        assert_eq!(raw[0].value, UpdateValue::Number(3.85));
        assert!(matches!(raw[1].value, UpdateValue::Object(_)));
        assert_eq!(raw[2].value, UpdateValue::Null);
        assert_eq!(
            raw[2].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 17, 10, 31, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_timestamp_falls_back_to_now() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let update = Update {
            source_ref: None,
            source: None,
            timestamp: Some("yesterday".to_string()),
            values: vec![],
            meta: None,
        };
        assert_eq!(update.resolved_timestamp(now), now);
    }

    #[test]
    fn test_update_value_conversion() {
        assert_eq!(UpdateValue::from(serde_json::json!(null)), UpdateValue::Null);
        assert_eq!(UpdateValue::from(serde_json::json!(42)), UpdateValue::Number(42.0));
        assert_eq!(
            UpdateValue::from(serde_json::json!("WP001")),
            UpdateValue::Other(serde_json::json!("WP001"))
        );
        assert_eq!(
            UpdateValue::from(serde_json::json!(true)),
            UpdateValue::Other(serde_json::json!(true))
        );
    }
}
