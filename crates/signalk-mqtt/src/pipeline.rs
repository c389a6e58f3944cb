//! Batch transformation.
//!
//! A subscription batch goes through screening, crafting, routing and
//! encoding, in that order, and comes out as the records handed to the
//! publisher. Input order is preserved; for one value the delta record comes
//! before the key record.

use signalk_core::{Identity, PublisherOptions, RawUpdate};
use signalk_protocol::encode_message;
use tracing::{debug, warn};

use crate::craft::MessageCrafter;
use crate::filter;
use crate::store::OutgoingMessage;
use crate::topic::TopicRouter;

/// Stateless batch transformer for one vessel and one set of addressing modes.
#[derive(Debug, Clone)]
pub struct Pipeline {
    crafter: MessageCrafter,
    router: TopicRouter,
}

impl Pipeline {
    pub fn new(crafter: MessageCrafter, router: TopicRouter) -> Self {
        Self { crafter, router }
    }

    pub fn from_options(identity: &Identity, options: &PublisherOptions) -> Self {
        Self::new(
            MessageCrafter::new(identity),
            TopicRouter::from_options(identity, options),
        )
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Transform a batch into outgoing records.
    pub fn transform(&self, batch: &[RawUpdate]) -> Vec<OutgoingMessage> {
        let mut out = Vec::new();

        for update in batch {
            for entry in filter::entries(update) {
                let message = self.crafter.craft(&entry);
                let payload = match encode_message(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Failed to encode '{}': {}", entry.path, e);
                        continue;
                    }
                };
                out.extend(
                    self.router
                        .route(&message)
                        .iter()
                        .map(|target| target.with_payload(&payload)),
                );
            }
        }

        debug!("Batch of {} updates produced {} messages", batch.len(), out.len());
        out
    }
}
