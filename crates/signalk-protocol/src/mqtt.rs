//! The flat message record published to MQTT.
//!
//! Every publishable value becomes one record of the form
//!
//! ```json
//! {"context":"vessels.244123456","time":"2024-01-17T10:30:00.000Z","path":"navigation.speedOverGround","value":3.85}
//! ```
//!
//! An explicit null is published as the string `"null"` so that subscribers
//! can tell "the data point exists but has no value" apart from a missing
//! message. Integral numbers are written without a fractional part.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A published telemetry message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// "vessels.<identity>"
    pub context: String,

    /// RFC 3339 timestamp with millisecond precision
    pub time: String,

    /// Dotted SignalK path
    pub path: String,

    pub value: MessageValue,
}

/// The value of a published message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageValue {
    Number(f64),
    Null,
}

impl Serialize for MessageValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            MessageValue::Null => serializer.serialize_str("null"),
            MessageValue::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                serializer.serialize_i64(n as i64)
            }
            MessageValue::Number(n) => serializer.serialize_f64(n),
        }
    }
}

impl<'de> Deserialize<'de> for MessageValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(MessageValue::Number(n)),
            Repr::Text(s) if s == "null" => Ok(MessageValue::Null),
            Repr::Text(s) => Err(serde::de::Error::custom(format!(
                "expected a number or \"null\", found \"{}\"",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(value: MessageValue) -> Message {
        Message {
            context: "vessels.244123456".to_string(),
            time: "2024-01-17T10:30:00.000Z".to_string(),
            path: "environment.depth.belowTransducer".to_string(),
            value,
        }
    }

    #[test]
    fn test_field_order_and_number() {
        let json = serde_json::to_string(&message(MessageValue::Number(12.5))).unwrap();
        assert_eq!(
            json,
            r#"{"context":"vessels.244123456","time":"2024-01-17T10:30:00.000Z","path":"environment.depth.belowTransducer","value":12.5}"#
        );
    }

    #[test]
    fn test_null_is_a_string() {
        let json = serde_json::to_value(message(MessageValue::Null)).unwrap();
        assert_eq!(json["value"], serde_json::json!("null"));
    }

    #[test]
    fn test_integral_numbers_have_no_fraction() {
        let json = serde_json::to_value(message(MessageValue::Number(3.0))).unwrap();
        assert_eq!(json["value"].to_string(), "3");

        let json = serde_json::to_value(message(MessageValue::Number(-0.0))).unwrap();
        assert_eq!(json["value"].to_string(), "0");

        let json = serde_json::to_value(message(MessageValue::Number(1e300))).unwrap();
        assert!(json["value"].is_f64());
    }

    #[test]
    fn test_decode_rejects_other_strings() {
        let json = r#"{"context":"c","time":"t","path":"p","value":"high"}"#;
        assert!(serde_json::from_str::<Message>(json).is_err());

        let json = r#"{"context":"c","time":"t","path":"p","value":"null"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.value, MessageValue::Null);
    }
}
