//! # signalk-client
//!
//! Subscription input for the MQTT publisher: connects to a SignalK server's
//! WebSocket stream, subscribes to the self vessel with a fixed period and
//! delivers every self delta as a batch.

pub mod stream;

pub use stream::{ClientError, StreamSubscriber, DEFAULT_STREAM_URL};
