//! Message codec for the SignalK stream and the MQTT payloads.
//!
//! SignalK uses JSON messages over WebSocket text frames; MQTT payloads are
//! the JSON encoding of a [`Message`]. This module provides encoding and
//! decoding utilities for both.

use crate::messages::{ClientMessage, ServerMessage};
use crate::mqtt::Message;
use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("Failed to serialize message: {0}")]
    SerializeError(#[from] serde_json::Error),
}

/// Encode a client message to JSON string for WebSocket transmission.
pub fn encode_client_message(msg: &ClientMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::from)
}

/// Decode a server message from JSON string received over WebSocket.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, CodecError> {
    serde_json::from_str(text).map_err(CodecError::from)
}

/// Encode a message as an MQTT payload (JSON text).
///
/// The encoding is deterministic: the same message always yields the same bytes.
pub fn encode_message(msg: &Message) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::from)
}

/// Decode an MQTT payload back into a message.
pub fn decode_message(payload: &[u8]) -> Result<Message, CodecError> {
    serde_json::from_slice(payload).map_err(CodecError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SubscribeRequest;
    use crate::mqtt::MessageValue;

    #[test]
    fn test_encode_subscribe() {
        let msg = ClientMessage::Subscribe(SubscribeRequest::self_all(1000));
        let json = encode_client_message(&msg).unwrap();

        assert!(json.contains("\"context\":\"vessels.self\""));
        assert!(json.contains("\"period\":1000"));
    }

    #[test]
    fn test_decode_delta() {
        let json = r#"{"context":"vessels.self","updates":[{"values":[{"path":"navigation.position","value":{"latitude":60.1,"longitude":24.9}}]}]}"#;
        match decode_server_message(json).unwrap() {
            ServerMessage::Delta(delta) => {
                assert_eq!(delta.updates[0].values[0].value["latitude"], 60.1);
            }
            other => panic!("Expected Delta, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(
            decode_server_message("{not json"),
            Err(CodecError::SerializeError(_))
        ));
    }

    #[test]
    fn test_encode_message_is_deterministic() {
        let msg = Message {
            context: "vessels.244123456".to_string(),
            time: "2024-01-17T10:30:00.000Z".to_string(),
            path: "navigation.attitude.roll".to_string(),
            value: MessageValue::Number(0.0523),
        };

        let first = encode_message(&msg).unwrap();
        let second = encode_message(&msg).unwrap();
        assert_eq!(first, second);
        assert_eq!(decode_message(first.as_bytes()).unwrap(), msg);
    }
}
