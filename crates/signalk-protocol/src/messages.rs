//! Protocol message types for WebSocket communication.
//!
//! This module defines the message types exchanged with a SignalK server
//! when consuming its stream as a client:
//! - Server → Client: Hello, Delta
//! - Client → Server: Subscribe, Unsubscribe
//!
//! Messages are serialized as JSON over WebSocket text frames.

use serde::{Deserialize, Serialize};
use signalk_core::Delta;

/// Subscription request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub context: String,
    pub subscribe: Vec<Subscription>,
}

impl SubscribeRequest {
    /// Subscribe to `path` in `context`, sampled once per `period_ms`.
    pub fn fixed(context: &str, path: &str, period_ms: u64) -> Self {
        Self {
            context: context.to_string(),
            subscribe: vec![Subscription {
                path: path.to_string(),
                period: Some(period_ms),
                format: Some(SubscriptionFormat::Delta),
                policy: Some(SubscriptionPolicy::Fixed),
                min_period: None,
            }],
        }
    }

    /// Subscribe to every path of the self vessel.
    pub fn self_all(period_ms: u64) -> Self {
        Self::fixed("vessels.self", "*", period_ms)
    }
}

/// A single subscription specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<SubscriptionFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<SubscriptionPolicy>,
    #[serde(rename = "minPeriod", skip_serializing_if = "Option::is_none")]
    pub min_period: Option<u64>,
}

/// Subscription format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionFormat {
    Delta,
    Full,
}

/// Subscription policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPolicy {
    Instant,
    Ideal,
    Fixed,
}

/// Unsubscribe request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub context: String,
    pub unsubscribe: Vec<UnsubscribeSpec>,
}

impl UnsubscribeRequest {
    /// Drop every subscription on the connection.
    pub fn all() -> Self {
        Self {
            context: "*".to_string(),
            unsubscribe: vec![UnsubscribeSpec {
                path: "*".to_string(),
            }],
        }
    }
}

/// Unsubscribe specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeSpec {
    pub path: String,
}

// ============================================================================
// Hello Message (Server → Client on connect)
// ============================================================================

/// Hello message sent by the server immediately on WebSocket connection.
///
/// # Example
/// ```json
/// {
///   "name": "signalk-server",
///   "version": "1.7.0",
///   "self": "vessels.urn:mrn:signalk:uuid:c0d79334-4e25-4245-8892-54e8ccc8021d",
///   "roles": ["main"],
///   "timestamp": "2024-01-17T10:30:00.000Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    /// Server name identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// SignalK protocol version supported.
    pub version: String,

    /// The "self" context identifier for this vessel.
    #[serde(rename = "self")]
    pub self_urn: String,

    /// Server roles (e.g., ["main"], ["main", "master"]).
    #[serde(default)]
    pub roles: Vec<String>,

    /// Server timestamp in ISO 8601 format, if the server has a time source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

// ============================================================================
// Unified Message Enums
// ============================================================================

/// Messages that can be received from the server.
///
/// Uses untagged deserialization - the message type is determined by
/// examining which fields are present. Anything unrecognized lands in
/// `Other` so that a newer server cannot break the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Delta update with new data.
    Delta(Delta),

    /// Hello message sent on connection.
    Hello(HelloMessage),

    /// Any other message (request responses, server events).
    Other(serde_json::Value),
}

/// Messages that can be sent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Subscribe to data paths.
    Subscribe(SubscribeRequest),

    /// Unsubscribe from data paths.
    Unsubscribe(UnsubscribeRequest),
}
