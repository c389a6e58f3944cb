//! SignalK stream subscriber.
//!
//! Connects with `subscribe=none` so the server sends nothing until asked,
//! then subscribes to the filter's context and paths with a fixed period.
//! Deltas for the self vessel become [`SubscriptionEvent::Batch`]es.
//!
//! When the connection fails the error is reported as
//! [`SubscriptionEvent::Error`] and the connection is retried after one
//! period.

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use signalk_core::{Delta, PathPattern, RawUpdate, SubscriptionEvent, SubscriptionFilter};
use signalk_mqtt::Subscriber;
use signalk_protocol::{
    decode_server_message, encode_client_message, ClientMessage, CodecError, ServerMessage,
    SubscribeRequest, UnsubscribeRequest,
};

/// Stream endpoint of a SignalK server on the local host.
pub const DEFAULT_STREAM_URL: &str = "ws://localhost:3000/signalk/v1/stream";

/// Errors that end one stream connection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid path pattern '{0}'")]
    Pattern(String),

    #[error("Connection closed by server")]
    Closed,
}

/// How a stream connection ended without error.
enum StreamEnd {
    /// Nobody listens for events anymore.
    Detached,
}

/// [`Subscriber`] reading a SignalK server's WebSocket stream.
#[derive(Debug, Clone)]
pub struct StreamSubscriber {
    url: String,
}

impl StreamSubscriber {
    /// `url` is the stream endpoint, e.g. [`DEFAULT_STREAM_URL`].
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The endpoint with `subscribe=none` added to the query.
    pub fn stream_url(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}subscribe=none", self.url, separator)
    }
}

impl Default for StreamSubscriber {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_URL)
    }
}

impl Subscriber for StreamSubscriber {
    fn spawn(
        self: Box<Self>,
        filter: SubscriptionFilter,
        events: mpsc::Sender<SubscriptionEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(run(self.stream_url(), filter, events))
    }
}

async fn run(url: String, filter: SubscriptionFilter, events: mpsc::Sender<SubscriptionEvent>) {
    let pattern = match PathPattern::new(&filter.paths) {
        Ok(pattern) => pattern,
        Err(_) => {
            let e = ClientError::Pattern(filter.paths.clone());
            error!("{}", e);
            let _ = events.send(SubscriptionEvent::Error(e.to_string())).await;
            return;
        }
    };

    loop {
        match stream(&url, &filter, &pattern, &events).await {
            Ok(StreamEnd::Detached) => break,
            Err(e) => {
                error!("Subscription stream {} failed: {}", url, e);
                if events.send(SubscriptionEvent::Error(e.to_string())).await.is_err() {
                    break;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(filter.period) => {}
            _ = events.closed() => break,
        }
        info!("Reconnecting to {}", url);
    }

    debug!("Subscription stream {} stopped", url);
}

/// Run one connection until it fails or the receiver goes away.
async fn stream(
    url: &str,
    filter: &SubscriptionFilter,
    pattern: &PathPattern,
    events: &mpsc::Sender<SubscriptionEvent>,
) -> Result<StreamEnd, ClientError> {
    let (ws_stream, _) = connect_async(url).await?;
    info!("Connected to {}", url);
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let subscribe = ClientMessage::Subscribe(SubscribeRequest::fixed(
        &filter.context,
        &filter.paths,
        filter.period_ms(),
    ));
    ws_tx.send(Message::Text(encode_client_message(&subscribe)?)).await?;
    debug!("Subscribed to {} {} every {:?}", filter.context, filter.paths, filter.period);

    let mut self_context: Option<String> = None;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match decode_server_message(&text) {
                            Ok(ServerMessage::Hello(hello)) => {
                                debug!("Server {} self is {}", hello.name.as_deref().unwrap_or("?"), hello.self_urn);
                                self_context = Some(hello.self_urn);
                            }
                            Ok(ServerMessage::Delta(delta)) => {
                                if !is_self(&delta, self_context.as_deref()) {
                                    continue;
                                }
                                let batch = select_updates(&delta, pattern);
                                if batch.is_empty() {
                                    continue;
                                }
                                if events.send(SubscriptionEvent::Batch(batch)).await.is_err() {
                                    return Ok(StreamEnd::Detached);
                                }
                            }
                            Ok(ServerMessage::Other(_)) => {}
                            Err(e) => warn!("Ignoring message from {}: {}", url, e),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_tx.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(ClientError::Closed);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    _ => {}
                }
            }

            _ = events.closed() => {
                let unsubscribe = ClientMessage::Unsubscribe(UnsubscribeRequest::all());
                if let Ok(text) = encode_client_message(&unsubscribe) {
                    let _ = ws_tx.send(Message::Text(text)).await;
                }
                let _ = ws_tx.close().await;
                return Ok(StreamEnd::Detached);
            }
        }
    }
}

/// Whether a delta is about the self vessel.
///
/// A delta without context is the self vessel's, as is "vessels.self" and
/// the context the server announced in its hello.
fn is_self(delta: &Delta, self_context: Option<&str>) -> bool {
    match delta.context.as_deref() {
        None | Some("vessels.self") => true,
        Some(context) => self_context == Some(context),
    }
}

/// Raw updates of a delta whose path matches `pattern`.
fn select_updates(delta: &Delta, pattern: &PathPattern) -> Vec<RawUpdate> {
    delta
        .raw_updates(Utc::now())
        .into_iter()
        .filter(|update| pattern.matches(&update.path))
        .collect()
}
