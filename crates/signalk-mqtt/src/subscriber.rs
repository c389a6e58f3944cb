//! Subscription input.
//!
//! A [`Subscriber`] produces batches of the self vessel's values once per
//! period. On stop the session closes the event channel and gives the task a
//! moment to end on its own before aborting it.

use signalk_core::{SubscriptionEvent, SubscriptionFilter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Source of subscription batches.
pub trait Subscriber: Send {
    /// Start delivering events matching `filter` into `events`.
    ///
    /// The task should end when `events` is closed.
    fn spawn(
        self: Box<Self>,
        filter: SubscriptionFilter,
        events: mpsc::Sender<SubscriptionEvent>,
    ) -> JoinHandle<()>;
}

/// Subscriber fed through a channel, for hosts that already receive values
/// and for tests.
pub struct ChannelSubscriber {
    rx: mpsc::Receiver<SubscriptionEvent>,
}

impl ChannelSubscriber {
    /// Returns the feeding side and the subscriber.
    pub fn new(capacity: usize) -> (mpsc::Sender<SubscriptionEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

impl Subscriber for ChannelSubscriber {
    fn spawn(
        self: Box<Self>,
        filter: SubscriptionFilter,
        events: mpsc::Sender<SubscriptionEvent>,
    ) -> JoinHandle<()> {
        let mut rx = self.rx;
        tokio::spawn(async move {
            debug!(
                "Channel subscription for {} {} every {:?}",
                filter.context, filter.paths, filter.period
            );
            loop {
                let event = tokio::select! {
                    event = rx.recv() => event,
                    _ = events.closed() => break,
                };
                let Some(event) = event else { break };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalk_core::RawUpdate;
    use std::time::Duration;

    #[tokio::test]
    async fn test_channel_subscriber_forwards() {
        let (feed, subscriber) = ChannelSubscriber::new(4);
        let (tx, mut rx) = mpsc::channel(4);
        let task = Box::new(subscriber).spawn(SubscriptionFilter::self_all(Duration::from_secs(1)), tx);

        let batch = vec![RawUpdate::new("navigation.speedOverGround", 3.5, chrono::Utc::now())];
        feed.send(SubscriptionEvent::Batch(batch.clone())).await.unwrap();
        feed.send(SubscriptionEvent::Error("lost".to_string())).await.unwrap();
        drop(feed);

        assert_eq!(rx.recv().await, Some(SubscriptionEvent::Batch(batch)));
        assert_eq!(rx.recv().await, Some(SubscriptionEvent::Error("lost".to_string())));
        task.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_channel_subscriber_ends_when_events_close() {
        let (_feed, subscriber) = ChannelSubscriber::new(4);
        let (tx, mut rx) = mpsc::channel(4);
        let task = Box::new(subscriber).spawn(SubscriptionFilter::self_all(Duration::from_secs(1)), tx);

        rx.close();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
