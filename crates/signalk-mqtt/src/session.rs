//! Publisher session.
//!
//! A [`Session`] owns everything one running publisher needs: the outgoing
//! store, the broker link and the tasks moving data between them.
//!
//! ```text
//! Subscriber ──batch──▶ pipeline task ──Publish──▶ publisher task ──▶ broker link
//!                                                      ▲      │
//!                           connection driver ──Link───┘      └──state──▶ observer
//! ```
//!
//! Starting validates the options and opens the store before any task is
//! spawned, so a failed start leaves nothing behind. Dropping a session
//! aborts its tasks; [`Session::stop`] shuts them down in order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use signalk_core::config::RECONNECT_INTERVAL;
use signalk_core::{
    BrokerUrl, ConfigError, Identity, IdentitySource, PublisherOptions, SubscriptionEvent,
    SubscriptionFilter, VesselInfo,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::link::{drive_connection, BrokerLink, MqttLink};
use crate::observer::{observe, StatusSink};
use crate::pipeline::Pipeline;
use crate::publisher::{spawn_publisher, DurablePublisher, PublisherHandle, SpawnedPublisher};
use crate::state::ConnectionState;
use crate::store::{FileOutgoingStore, OutgoingStore, StoreError};
use crate::subscriber::Subscriber;

/// Buffer between the pipeline, the connection driver and the publisher.
const COMMAND_CAPACITY: usize = 1024;

/// Buffer of subscription events waiting for the pipeline.
const EVENT_CAPACITY: usize = 16;

/// Time the connection driver gets to flush a clean disconnect.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Time the subscription gets to unsubscribe once its channel is closed.
const UNSUBSCRIBE_GRACE: Duration = Duration::from_secs(2);

/// Subdirectory of the data directory holding the outgoing store.
pub const OUTGOING_DIR: &str = "outgoing";

/// Errors that prevent a session from starting.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open outgoing store: {0}")]
    Store(#[from] StoreError),
}

/// Everything needed to start a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub options: PublisherOptions,
    pub vessel: VesselInfo,
    /// Plugin data directory; the outgoing store lives below it.
    pub data_dir: PathBuf,
}

/// A running publisher.
pub struct Session {
    identity: Identity,
    status: Arc<dyn StatusSink>,
    publisher: Option<PublisherHandle>,
    states: Option<watch::Receiver<ConnectionState>>,
    shutdown: watch::Sender<bool>,
    /// Tells the pipeline to stop accepting subscription events.
    detach: Option<oneshot::Sender<()>>,
    subscription: Option<JoinHandle<()>>,
    pipeline: Option<JoinHandle<()>>,
    publisher_task: Option<JoinHandle<()>>,
    driver: Option<JoinHandle<()>>,
    observer: Option<JoinHandle<()>>,
}

impl Session {
    /// Start publishing to the configured broker.
    ///
    /// With `sendToRemote` disabled the session is idle: nothing is
    /// subscribed and no connection is made.
    pub fn start(
        config: SessionConfig,
        subscriber: Box<dyn Subscriber>,
        status: Arc<dyn StatusSink>,
    ) -> Result<Session, SessionError> {
        status.set_status("Initializing");
        let identity = resolve_identity(&config.vessel);
        let options = config.options;

        for warning in options.validate() {
            warn!("{}", warning);
        }

        if !options.send_to_remote {
            info!("Sending to remote is disabled");
            status.set_status("Done initializing");
            return Ok(Session::idle(identity, status));
        }

        let url = options.broker_url()?;
        let store = FileOutgoingStore::open(config.data_dir.join(OUTGOING_DIR))?;
        let (link, eventloop) = MqttLink::connect(&url, &identity, &options);

        let mut session = Session::launch(
            identity,
            &options,
            url.clone(),
            DurablePublisher::new(store, link),
            subscriber,
            status,
        );

        if let Some(handle) = session.publisher.clone() {
            session.driver = Some(tokio::spawn(drive_connection(
                eventloop,
                url,
                handle,
                session.shutdown.subscribe(),
                RECONNECT_INTERVAL,
            )));
        }

        Ok(session)
    }

    /// Start a session around an already built publisher.
    ///
    /// No connection driver is spawned; link events are reported through
    /// [`Session::publisher`].
    pub fn launch<S, L>(
        identity: Identity,
        options: &PublisherOptions,
        url: BrokerUrl,
        publisher: DurablePublisher<S, L>,
        subscriber: Box<dyn Subscriber>,
        status: Arc<dyn StatusSink>,
    ) -> Session
    where
        S: OutgoingStore + 'static,
        L: BrokerLink + 'static,
    {
        let SpawnedPublisher {
            handle,
            state: states,
            transitions,
            task: publisher_task,
        } = spawn_publisher(publisher, COMMAND_CAPACITY);
        let observer = tokio::spawn(observe(transitions, url, status.clone()));

        let pipeline = Pipeline::from_options(&identity, options);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (detach, detached) = oneshot::channel();
        let pipeline = tokio::spawn(run_pipeline(pipeline, events_rx, handle.clone(), detached));
        let subscription =
            subscriber.spawn(SubscriptionFilter::self_all(options.send_period()), events_tx);

        info!("Publishing as {}", identity.context());
        status.set_status("Done initializing");

        let (shutdown, _) = watch::channel(false);
        Session {
            identity,
            status,
            publisher: Some(handle),
            states: Some(states),
            shutdown,
            detach: Some(detach),
            subscription: Some(subscription),
            pipeline: Some(pipeline),
            publisher_task: Some(publisher_task),
            driver: None,
            observer: Some(observer),
        }
    }

    fn idle(identity: Identity, status: Arc<dyn StatusSink>) -> Session {
        let (shutdown, _) = watch::channel(false);
        Session {
            identity,
            status,
            publisher: None,
            states: None,
            shutdown,
            detach: None,
            subscription: None,
            pipeline: None,
            publisher_task: None,
            driver: None,
            observer: None,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Whether this session publishes at all.
    pub fn is_publishing(&self) -> bool {
        self.publisher.is_some()
    }

    pub fn publisher(&self) -> Option<&PublisherHandle> {
        self.publisher.as_ref()
    }

    /// Current connection state, None for an idle session.
    pub fn state(&self) -> Option<ConnectionState> {
        self.states.as_ref().map(|states| states.borrow().clone())
    }

    /// Receiver for connection state changes.
    pub fn watch_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.states.clone()
    }

    /// Stop the subscription, deliver what the pipeline still holds to the
    /// publisher, disconnect and wait for every task.
    ///
    /// Returns the number of messages left in the outgoing store.
    pub async fn stop(mut self) -> usize {
        // Closing the event channel lets the subscriber unsubscribe
        if let Some(detach) = self.detach.take() {
            let _ = detach.send(());
        }
        if let Some(mut subscription) = self.subscription.take() {
            if tokio::time::timeout(UNSUBSCRIBE_GRACE, &mut subscription).await.is_err() {
                debug!("Subscription did not end in {:?}", UNSUBSCRIBE_GRACE);
                subscription.abort();
                let _ = subscription.await;
            }
        }

        // Ends once the buffered batches are processed
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.await;
        }

        let was_connected = self.state().is_some_and(|s| s.is_connected());

        let mut pending = 0;
        if let Some(publisher) = self.publisher.take() {
            match publisher.shutdown().await {
                Ok(left) => pending = left,
                Err(e) => debug!("Stopping publisher: {}", e),
            }
        }
        if let Some(task) = self.publisher_task.take() {
            let _ = task.await;
        }

        if let Some(mut driver) = self.driver.take() {
            if was_connected {
                if tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
                    debug!("Disconnect not confirmed in {:?}", DISCONNECT_GRACE);
                }
            }
            if !driver.is_finished() {
                let _ = self.shutdown.send(true);
                let _ = driver.await;
            }
        }

        if let Some(observer) = self.observer.take() {
            let _ = observer.await;
        }

        if pending > 0 {
            info!("{} undelivered messages kept for the next start", pending);
        }
        self.status.set_status("Stopped");
        pending
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in [
            self.subscription.take(),
            self.pipeline.take(),
            self.publisher_task.take(),
            self.driver.take(),
            self.observer.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

fn resolve_identity(vessel: &VesselInfo) -> Identity {
    let identity = Identity::resolve(vessel);
    if identity.source() == IdentitySource::Generated {
        warn!(
            "No MMSI or uuid configured, using generated identity {} which changes on restart",
            identity
        );
    }
    identity
}

/// Turn subscription events into publishes until the channel is empty and
/// closed. After `detach` fires no new events are accepted, buffered ones
/// are still published.
async fn run_pipeline(
    pipeline: Pipeline,
    mut events: mpsc::Receiver<SubscriptionEvent>,
    publisher: PublisherHandle,
    mut detach: oneshot::Receiver<()>,
) {
    let mut detached = false;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = &mut detach, if !detached => {
                detached = true;
                events.close();
                continue;
            }
        };
        let Some(event) = event else { break };

        match event {
            SubscriptionEvent::Batch(batch) => {
                for message in pipeline.transform(&batch) {
                    if publisher.publish(message).await.is_err() {
                        warn!("Publisher stopped, dropping the rest of the batch");
                        return;
                    }
                }
            }
            SubscriptionEvent::Error(reason) => {
                error!("Subscription error: {}", reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::TracingStatus;
    use crate::subscriber::ChannelSubscriber;

    #[tokio::test]
    async fn test_disabled_session_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let status = Arc::new(TracingStatus::new());
        let (_feed, subscriber) = ChannelSubscriber::new(1);

        let session = Session::start(
            SessionConfig {
                options: PublisherOptions::default(),
                vessel: VesselInfo::default(),
                data_dir: dir.path().to_path_buf(),
            },
            Box::new(subscriber),
            status.clone(),
        )
        .unwrap();

        assert!(!session.is_publishing());
        assert_eq!(session.state(), None);
        assert_eq!(status.last(), "Done initializing");
        // No store is created
        assert!(!dir.path().join(OUTGOING_DIR).exists());

        assert_eq!(session.stop().await, 0);
        assert_eq!(status.last(), "Stopped");
    }

    #[tokio::test]
    async fn test_stop_closes_subscription_channel() {
        struct ClosingSubscriber(Arc<std::sync::atomic::AtomicBool>);

        impl Subscriber for ClosingSubscriber {
            fn spawn(
                self: Box<Self>,
                _filter: SubscriptionFilter,
                events: mpsc::Sender<SubscriptionEvent>,
            ) -> JoinHandle<()> {
                tokio::spawn(async move {
                    events.closed().await;
                    self.0.store(true, std::sync::atomic::Ordering::SeqCst);
                })
            }
        }

        struct NullLink;

        impl BrokerLink for NullLink {
            fn send(
                &mut self,
                _message: &crate::store::OutgoingMessage,
            ) -> Result<(), crate::link::LinkError> {
                Ok(())
            }

            fn close(&mut self) -> Result<(), crate::link::LinkError> {
                Ok(())
            }
        }

        let options = PublisherOptions {
            send_to_remote: true,
            ..Default::default()
        };
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let session = Session::launch(
            Identity::resolve(&VesselInfo::default()),
            &options,
            options.broker_url().unwrap(),
            DurablePublisher::new(crate::store::MemoryOutgoingStore::new(), NullLink),
            Box::new(ClosingSubscriber(closed.clone())),
            Arc::new(TracingStatus::new()),
        );

        tokio::time::timeout(Duration::from_secs(1), session.stop())
            .await
            .expect("subscription should end without waiting for the grace period");
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let (_feed, subscriber) = ChannelSubscriber::new(1);

        let result = Session::start(
            SessionConfig {
                options: PublisherOptions {
                    send_to_remote: true,
                    remote_host: "http://broker.example.com".to_string(),
                    ..Default::default()
                },
                vessel: VesselInfo::default(),
                data_dir: dir.path().to_path_buf(),
            },
            Box::new(subscriber),
            Arc::new(TracingStatus::new()),
        );

        assert!(matches!(result, Err(SessionError::Config(_))));
        assert!(!dir.path().join(OUTGOING_DIR).exists());
    }
}
