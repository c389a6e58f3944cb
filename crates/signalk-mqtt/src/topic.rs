//! Topic routing.
//!
//! Two addressing modes, each enabled by its own flag:
//! - delta: every message goes to `vessels.<id>/signalk/delta`
//! - key: each path gets its own topic, `vessels.<id>/signalk/keys/<a>/<b>/<c>`
//!
//! Messages are always retained and sent at QoS 1.

use signalk_core::{Identity, Path, PublisherOptions};
use signalk_protocol::Message;

use crate::store::OutgoingMessage;

/// Retain flag used for every publication.
pub const RETAIN: bool = true;

/// QoS used for every publication.
pub const QOS: u8 = 1;

/// Where and how one message is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub topic: String,
    pub retain: bool,
    pub qos: u8,
}

impl PublishTarget {
    fn new(topic: String) -> Self {
        Self {
            topic,
            retain: RETAIN,
            qos: QOS,
        }
    }

    /// Attach an encoded payload, producing the record handed to the publisher.
    pub fn with_payload(&self, payload: &str) -> OutgoingMessage {
        OutgoingMessage {
            topic: self.topic.clone(),
            payload: payload.to_string(),
            qos: self.qos,
            retain: self.retain,
        }
    }
}

/// Computes publish targets from the enabled addressing modes.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    root: String,
    as_delta: bool,
    as_key: bool,
}

impl TopicRouter {
    pub fn new(identity: &Identity, as_delta: bool, as_key: bool) -> Self {
        Self {
            root: identity.context(),
            as_delta,
            as_key,
        }
    }

    pub fn from_options(identity: &Identity, options: &PublisherOptions) -> Self {
        Self::new(identity, options.message_as_delta, options.message_as_key)
    }

    /// `vessels.<id>/signalk/delta`
    pub fn delta_topic(&self) -> String {
        format!("{}/signalk/delta", self.root)
    }

    /// `vessels.<id>/signalk/keys/<path with '/' separators>`
    pub fn key_topic(&self, path: &str) -> String {
        format!("{}/signalk/keys/{}", self.root, Path::new(path).to_topic_levels())
    }

    /// One target per enabled mode, delta first.
    pub fn route(&self, message: &Message) -> Vec<PublishTarget> {
        let mut targets = Vec::with_capacity(2);
        if self.as_delta {
            targets.push(PublishTarget::new(self.delta_topic()));
        }
        if self.as_key {
            targets.push(PublishTarget::new(self.key_topic(&message.path)));
        }
        targets
    }

    pub fn is_silent(&self) -> bool {
        !self.as_delta && !self.as_key
    }
}
