//! # signalk-protocol
//!
//! SignalK protocol message types and codec.
//!
//! This crate defines the WebSocket messages used to consume a SignalK
//! server stream and the flat JSON record published to MQTT.

pub mod codec;
pub mod messages;
pub mod mqtt;

pub use codec::*;
pub use messages::*;
pub use mqtt::{Message, MessageValue};
