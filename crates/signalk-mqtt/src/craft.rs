//! Message crafting.

use chrono::SecondsFormat;
use signalk_core::{Entry, EntryValue, Identity};
use signalk_protocol::{Message, MessageValue};

/// Wraps entries into messages for one vessel.
#[derive(Debug, Clone)]
pub struct MessageCrafter {
    context: String,
}

impl MessageCrafter {
    pub fn new(identity: &Identity) -> Self {
        Self {
            context: identity.context(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Build the message for an entry. Pure: the same entry always yields
    /// an equal message.
    pub fn craft(&self, entry: &Entry) -> Message {
        Message {
            context: self.context.clone(),
            time: entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            path: entry.path.clone(),
            value: match entry.value {
                EntryValue::Number(n) => MessageValue::Number(n),
                EntryValue::Null => MessageValue::Null,
            },
        }
    }
}
