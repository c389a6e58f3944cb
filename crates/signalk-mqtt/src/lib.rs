//! # signalk-mqtt
//!
//! Publishes the self vessel's SignalK values to an MQTT broker.
//!
//! Values arrive in periodic batches from a [`Subscriber`]. Each batch is
//! screened ([`filter`]), turned into messages ([`craft`]), addressed
//! ([`topic`]) and handed to the [`publisher`], which stores every message
//! on disk until the broker acknowledges it. While the broker is unreachable
//! messages accumulate in the store and are replayed in order once the
//! connection is back.
//!
//! A [`Session`] wires these parts together and owns the running tasks.

pub mod craft;
pub mod filter;
pub mod link;
pub mod observer;
pub mod pipeline;
pub mod publisher;
pub mod session;
pub mod state;
pub mod store;
pub mod subscriber;
pub mod topic;

pub use craft::MessageCrafter;
pub use link::{BrokerLink, LinkError, MqttLink};
pub use observer::{StatusSink, TracingStatus};
pub use pipeline::Pipeline;
pub use publisher::{
    spawn_publisher, DurablePublisher, PublishOutcome, PublisherCommand, PublisherError,
    PublisherHandle, SpawnedPublisher,
};
pub use session::{Session, SessionConfig, SessionError};
pub use state::{ConnectionState, LinkEvent};
pub use store::{FileOutgoingStore, MemoryOutgoingStore, OutgoingMessage, OutgoingStore, StoreError};
pub use subscriber::{ChannelSubscriber, Subscriber};
pub use topic::{PublishTarget, TopicRouter};
