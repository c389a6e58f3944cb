//! Broker connection state machine.
//!
//! The connection driver reports what happens on the wire as [`LinkEvent`]s.
//! The publisher folds them into a [`ConnectionState`] on a single task, so
//! there is exactly one writer of the state and publish decisions always see
//! a consistent value.

/// State of the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Offline,
    Errored(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Compute the state after an event.
    ///
    /// Returns None when the event does not change the state (including
    /// delivery events, which carry no state information).
    pub fn next(&self, event: &LinkEvent) -> Option<ConnectionState> {
        let next = match event {
            LinkEvent::Connecting => ConnectionState::Connecting,
            LinkEvent::Connected => ConnectionState::Connected,
            LinkEvent::Disconnected => ConnectionState::Disconnected,
            LinkEvent::Reconnecting => ConnectionState::Reconnecting,
            LinkEvent::Offline => ConnectionState::Offline,
            LinkEvent::Error(reason) => ConnectionState::Errored(reason.clone()),
            LinkEvent::Sent(_) | LinkEvent::Acked(_) => return None,
        };
        (next != *self).then_some(next)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Offline => write!(f, "offline"),
            ConnectionState::Errored(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// Something that happened on the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// First connection attempt started.
    Connecting,
    /// Broker accepted the connection (CONNACK).
    Connected,
    /// The connection was closed.
    Disconnected,
    /// A reconnect attempt started.
    Reconnecting,
    /// The client gave up on the current connection and is waiting to retry.
    Offline,
    /// Connection-level failure (network, TLS, authentication).
    Error(String),
    /// A publish left the client with this packet id (0 for QoS 0).
    Sent(u16),
    /// The broker acknowledged this packet id (PUBACK).
    Acked(u16),
}
