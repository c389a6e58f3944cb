//! Connection lifecycle observer.
//!
//! Turns connection state transitions into human readable status strings
//! for the host. Observing never affects publishing.

use std::sync::{Arc, Mutex};

use signalk_core::BrokerUrl;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::state::ConnectionState;

/// Receives status strings, e.g. the host's plugin status line.
pub trait StatusSink: Send + Sync {
    fn set_status(&self, status: &str);
}

/// Logs every status and remembers the latest one.
#[derive(Debug, Default)]
pub struct TracingStatus {
    last: Mutex<String>,
}

impl TracingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent status, empty before the first one.
    pub fn last(&self) -> String {
        self.last.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl StatusSink for TracingStatus {
    fn set_status(&self, status: &str) {
        info!("Status: {}", status);
        if let Ok(mut last) = self.last.lock() {
            *last = status.to_string();
        }
    }
}

/// Status string for a connection state.
pub fn status_for(state: &ConnectionState, url: &BrokerUrl) -> String {
    match state {
        ConnectionState::Connecting => format!("Connecting to {}", url),
        ConnectionState::Connected => format!("Connected to {}", url),
        ConnectionState::Disconnected => format!("Disconnected from {}", url),
        ConnectionState::Reconnecting => format!("Reconnect started to {}", url),
        ConnectionState::Offline => format!("offline {}", url),
        ConnectionState::Errored(reason) => format!("Error {}", reason),
    }
}

/// Report every state transition to `sink` until the publisher goes away.
pub async fn observe(
    mut transitions: broadcast::Receiver<ConnectionState>,
    url: BrokerUrl,
    sink: Arc<dyn StatusSink>,
) {
    loop {
        match transitions.recv().await {
            Ok(state) => sink.set_status(&status_for(&state, &url)),
            Err(RecvError::Lagged(missed)) => debug!("Missed {} connection state changes", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collecting(Mutex<Vec<String>>);

    impl StatusSink for Collecting {
        fn set_status(&self, status: &str) {
            self.0.lock().unwrap().push(status.to_string());
        }
    }

    fn url() -> BrokerUrl {
        BrokerUrl::parse("mqtt://broker.example.com").unwrap()
    }

    #[test]
    fn test_status_strings() {
        let url = url();
        assert_eq!(
            status_for(&ConnectionState::Connected, &url),
            "Connected to mqtt://broker.example.com"
        );
        assert_eq!(
            status_for(&ConnectionState::Reconnecting, &url),
            "Reconnect started to mqtt://broker.example.com"
        );
        assert_eq!(
            status_for(&ConnectionState::Offline, &url),
            "offline mqtt://broker.example.com"
        );
        assert_eq!(
            status_for(&ConnectionState::Errored("connection refused".to_string()), &url),
            "Error connection refused"
        );
    }

    #[test]
    fn test_tracing_status_keeps_last() {
        let sink = TracingStatus::new();
        assert_eq!(sink.last(), "");
        sink.set_status("Initializing");
        sink.set_status("Done initializing");
        assert_eq!(sink.last(), "Done initializing");
    }

    #[tokio::test]
    async fn test_observe_reports_transitions() {
        let (tx, rx) = broadcast::channel(8);
        let sink = Arc::new(Collecting::default());
        let task = tokio::spawn(observe(rx, url(), sink.clone()));

        tx.send(ConnectionState::Connecting).unwrap();
        tx.send(ConnectionState::Connected).unwrap();
        drop(tx);
        task.await.unwrap();

        let seen = sink.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "Connecting to mqtt://broker.example.com".to_string(),
                "Connected to mqtt://broker.example.com".to_string(),
            ]
        );
    }
}
