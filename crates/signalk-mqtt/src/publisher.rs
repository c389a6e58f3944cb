//! Durable publisher.
//!
//! The publisher owns the outgoing store, the broker link and the connection
//! state. Every message is stored first; while connected it is handed to the
//! link right away, otherwise it waits in the backlog. When the connection
//! comes back the backlog is replayed in store order before anything newer,
//! so per-path ordering survives outages. A stored record is deleted only
//! when the broker acknowledges it, which makes delivery at-least-once across
//! restarts.
//!
//! [`DurablePublisher`] is synchronous and single-owner. [`spawn_publisher`]
//! runs it on its own task and serializes publishes and link events through
//! one channel. State changes go out on a watch channel (latest value) and a
//! broadcast channel (every transition).

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::link::BrokerLink;
use crate::state::{ConnectionState, LinkEvent};
use crate::store::{OutgoingMessage, OutgoingStore};

/// Result of handing a message to the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored and handed to the broker connection.
    Accepted(u64),
    /// Stored, waiting for the connection.
    Queued(u64),
    /// Could not be stored.
    Rejected(String),
}

/// Publisher core: store-backed delivery with in-flight tracking.
pub struct DurablePublisher<S, L> {
    store: S,
    link: L,
    state: ConnectionState,
    /// Stored keys not yet handed to the link, in arrival order.
    backlog: VecDeque<u64>,
    /// Keys handed to the link and not yet acknowledged.
    in_flight: HashSet<u64>,
    /// Keys handed to the link whose packet id is not known yet.
    awaiting_packet_id: VecDeque<u64>,
    /// Keys per packet id, oldest first. A packet id holds more than one key
    /// while the client is resolving a packet id collision.
    packet_keys: HashMap<u16, VecDeque<u64>>,
    /// Packet ids outstanding at the last reconnect, with how many
    /// retransmissions of each are still expected.
    retransmits: HashMap<u16, usize>,
}

impl<S: OutgoingStore, L: BrokerLink> DurablePublisher<S, L> {
    /// Create a publisher. Records already in the store are queued for replay.
    pub fn new(store: S, link: L) -> Self {
        let backlog: VecDeque<u64> = store.keys().into_iter().collect();
        if !backlog.is_empty() {
            info!("{} stored messages waiting for delivery", backlog.len());
        }

        Self {
            store,
            link,
            state: ConnectionState::Disconnected,
            backlog,
            in_flight: HashSet::new(),
            awaiting_packet_id: VecDeque::new(),
            packet_keys: HashMap::new(),
            retransmits: HashMap::new(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Messages stored but not yet handed to the link.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Messages handed to the link and not yet acknowledged.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Store a message and send it if the connection is up.
    pub fn publish(&mut self, message: OutgoingMessage) -> PublishOutcome {
        let key = match self.store.put(&message) {
            Ok(key) => key,
            Err(e) => {
                warn!("Failed to store message for {}: {}", message.topic, e);
                return PublishOutcome::Rejected(e.to_string());
            }
        };

        let connected = self.state.is_connected();
        if connected && self.backlog.is_empty() {
            return match self.link.send(&message) {
                Ok(()) => {
                    self.mark_in_flight(key);
                    PublishOutcome::Accepted(key)
                }
                Err(e) => {
                    debug!("Queueing message for {}: {}", message.topic, e);
                    self.backlog.push_back(key);
                    PublishOutcome::Queued(key)
                }
            };
        }

        // Older messages go first
        self.backlog.push_back(key);
        if connected {
            self.drain();
        }
        if self.in_flight.contains(&key) {
            PublishOutcome::Accepted(key)
        } else {
            PublishOutcome::Queued(key)
        }
    }

    /// Apply a link event. Returns the new state on a state transition.
    pub fn handle(&mut self, event: LinkEvent) -> Option<ConnectionState> {
        match event {
            LinkEvent::Sent(packet_id) => self.on_sent(packet_id),
            LinkEvent::Acked(packet_id) => self.on_acked(packet_id),
            LinkEvent::Connected => self.expect_retransmits(),
            _ => {}
        }

        let transition = self.state.next(&event);
        if let Some(next) = &transition {
            self.state = next.clone();
        }

        // Capacity may have freed up, or the connection just came back
        if self.state.is_connected()
            && matches!(
                event,
                LinkEvent::Connected | LinkEvent::Sent(_) | LinkEvent::Acked(_)
            )
        {
            let sent = self.drain();
            if sent > 0 && event == LinkEvent::Connected {
                info!("Replayed {} stored messages", sent);
            }
        }

        transition
    }

    /// Close the broker link. Unacknowledged messages stay in the store.
    pub fn close(&mut self) {
        if let Err(e) = self.link.close() {
            debug!("Closing broker link: {}", e);
        }
    }

    /// Hand backlog records to the link until it refuses. Returns the number sent.
    fn drain(&mut self) -> usize {
        let mut sent = 0;
        while let Some(&key) = self.backlog.front() {
            let message = match self.store.get(key) {
                Ok(Some(message)) => message,
                Ok(None) => {
                    self.backlog.pop_front();
                    continue;
                }
                Err(e) => {
                    warn!("Dropping unreadable stored message: {}", e);
                    if let Err(e) = self.store.remove(key) {
                        warn!("Failed to remove stored message {}: {}", key, e);
                    }
                    self.backlog.pop_front();
                    continue;
                }
            };

            match self.link.send(&message) {
                Ok(()) => {
                    self.backlog.pop_front();
                    self.mark_in_flight(key);
                    sent += 1;
                }
                Err(e) => {
                    debug!("Link not accepting messages ({} waiting): {}", self.backlog.len(), e);
                    break;
                }
            }
        }
        sent
    }

    fn mark_in_flight(&mut self, key: u64) {
        self.in_flight.insert(key);
        self.awaiting_packet_id.push_back(key);
    }

    /// The client resends every unacknowledged publish with its old packet
    /// id after a reconnect.
    fn expect_retransmits(&mut self) {
        self.retransmits = self
            .packet_keys
            .iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(&packet_id, keys)| (packet_id, keys.len()))
            .collect();
    }

    fn on_sent(&mut self, packet_id: u16) {
        if packet_id != 0 {
            if let Some(remaining) = self.retransmits.get_mut(&packet_id) {
                *remaining -= 1;
                if *remaining == 0 {
                    self.retransmits.remove(&packet_id);
                }
                return;
            }
        }
        let Some(key) = self.awaiting_packet_id.pop_front() else {
            debug!("Publish {} was not sent by this publisher", packet_id);
            return;
        };
        if packet_id == 0 {
            // QoS 0 is never acknowledged
            self.complete(key);
        } else {
            self.packet_keys.entry(packet_id).or_default().push_back(key);
        }
    }

    fn on_acked(&mut self, packet_id: u16) {
        let Some(keys) = self.packet_keys.get_mut(&packet_id) else {
            return;
        };
        let key = keys.pop_front();
        if keys.is_empty() {
            self.packet_keys.remove(&packet_id);
        }
        if let Some(key) = key {
            self.complete(key);
        }
    }

    fn complete(&mut self, key: u64) {
        self.in_flight.remove(&key);
        if let Err(e) = self.store.remove(key) {
            warn!("Failed to remove delivered message {}: {}", key, e);
        }
    }
}

// ============================================================================
// Publisher Task
// ============================================================================

/// Errors returned by [`PublisherHandle`].
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("Publisher task has stopped")]
    Closed,
}

/// Commands processed by the publisher task, in order.
#[derive(Debug)]
pub enum PublisherCommand {
    Publish(OutgoingMessage),
    Link(LinkEvent),
    /// Close the link and stop; replies with the number of undelivered messages.
    Shutdown(oneshot::Sender<usize>),
}

/// Cloneable handle to a running publisher task.
#[derive(Debug, Clone)]
pub struct PublisherHandle {
    tx: mpsc::Sender<PublisherCommand>,
}

impl PublisherHandle {
    /// Handle over a command channel whose receiving side is driven elsewhere.
    pub fn new(tx: mpsc::Sender<PublisherCommand>) -> Self {
        Self { tx }
    }

    /// Queue a message. Returns once the task has accepted the command,
    /// never waits for the broker.
    pub async fn publish(&self, message: OutgoingMessage) -> Result<(), PublisherError> {
        self.tx
            .send(PublisherCommand::Publish(message))
            .await
            .map_err(|_| PublisherError::Closed)
    }

    /// Report a link event.
    pub async fn link_event(&self, event: LinkEvent) -> Result<(), PublisherError> {
        self.tx
            .send(PublisherCommand::Link(event))
            .await
            .map_err(|_| PublisherError::Closed)
    }

    /// Stop the task after everything queued before this call is processed.
    ///
    /// Returns the number of messages left in the store.
    pub async fn shutdown(&self) -> Result<usize, PublisherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PublisherCommand::Shutdown(reply))
            .await
            .map_err(|_| PublisherError::Closed)?;
        rx.await.map_err(|_| PublisherError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Capacity of the state transition channel.
const TRANSITION_CAPACITY: usize = 64;

/// A publisher running on its own task.
pub struct SpawnedPublisher {
    pub handle: PublisherHandle,
    /// Latest connection state.
    pub state: watch::Receiver<ConnectionState>,
    /// Every state transition, in order. Closed when the task ends.
    pub transitions: broadcast::Receiver<ConnectionState>,
    pub task: JoinHandle<()>,
}

/// Run a publisher on its own task.
pub fn spawn_publisher<S, L>(publisher: DurablePublisher<S, L>, capacity: usize) -> SpawnedPublisher
where
    S: OutgoingStore + 'static,
    L: BrokerLink + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let (state_tx, state) = watch::channel(publisher.state().clone());
    let (transition_tx, transitions) = broadcast::channel(TRANSITION_CAPACITY);
    let task = tokio::spawn(run_publisher(publisher, rx, state_tx, transition_tx));

    SpawnedPublisher {
        handle: PublisherHandle { tx },
        state,
        transitions,
        task,
    }
}

async fn run_publisher<S: OutgoingStore, L: BrokerLink>(
    mut publisher: DurablePublisher<S, L>,
    mut rx: mpsc::Receiver<PublisherCommand>,
    state_tx: watch::Sender<ConnectionState>,
    transition_tx: broadcast::Sender<ConnectionState>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            PublisherCommand::Publish(message) => match publisher.publish(message) {
                PublishOutcome::Accepted(_) => {}
                PublishOutcome::Queued(key) => {
                    debug!("Message {} queued ({} waiting)", key, publisher.backlog_len());
                }
                PublishOutcome::Rejected(reason) => {
                    warn!("Message rejected: {}", reason);
                }
            },
            PublisherCommand::Link(event) => {
                if let Some(state) = publisher.handle(event) {
                    state_tx.send_replace(state.clone());
                    // No receiver is fine
                    let _ = transition_tx.send(state);
                }
            }
            PublisherCommand::Shutdown(reply) => {
                publisher.close();
                let _ = reply.send(publisher.store().len());
                break;
            }
        }
    }
    debug!("Publisher task stopped");
}
