//! Notification Hub - Event Fan-out to Live Subscribers
//!
//! A single actor task owns the set of connected clients. Everything else
//! talks to it through a cloneable [`HubHandle`]:
//! - `register()` / `unregister(id)`
//! - `broadcast(message)` to every client
//! - `stats()` / `client_count()` via oneshot reply
//!
//! Delivery to a client never blocks the actor. Each client has a bounded
//! buffer; when it is full the new message is dropped for that client only.
//! A client whose receiver is gone is evicted on the next delivery attempt.

mod events;

pub use events::{HubEvent, STATUS_SUCCESS};

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Identifier assigned to a subscriber at registration.
pub type ClientId = u64;

/// Hub buffer sizes.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-client outbound buffer
    pub client_buffer: usize,
    /// Handle -> actor command channel
    pub command_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_buffer: crate::config::defaults::HUB_CLIENT_BUFFER,
            command_buffer: crate::config::defaults::HUB_COMMAND_BUFFER,
        }
    }
}

/// The hub actor has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("notification hub is not running")]
pub struct HubClosed;

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub clients: usize,
    pub broadcasts: u64,
    pub delivered: u64,
    /// Messages dropped because a client's buffer was full
    pub dropped: u64,
    /// Clients removed because their receiver was gone
    pub evicted: u64,
}

enum Command {
    Register {
        id: ClientId,
        tx: mpsc::Sender<Arc<str>>,
    },
    Unregister {
        id: ClientId,
    },
    Broadcast {
        message: Arc<str>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Receiving side of one registered client.
#[derive(Debug)]
pub struct Subscription {
    pub id: ClientId,
    rx: mpsc::Receiver<Arc<str>>,
}

impl Subscription {
    /// Next message, or `None` once the client was unregistered.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for tests and polling consumers.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.rx.try_recv().ok()
    }
}

/// Cloneable handle to the hub actor.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
    client_buffer: usize,
}

impl HubHandle {
    /// Register a new client with a fresh bounded buffer.
    pub async fn register(&self) -> Result<Subscription, HubClosed> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.client_buffer.max(1));

        self.tx
            .send(Command::Register { id, tx })
            .await
            .map_err(|_| HubClosed)?;

        Ok(Subscription { id, rx })
    }

    /// Remove a client and close its buffer. Unknown ids are ignored.
    pub async fn unregister(&self, id: ClientId) {
        if self.tx.send(Command::Unregister { id }).await.is_err() {
            debug!(client_id = id, "Unregister after hub stopped");
        }
    }

    /// Send `message` to every registered client.
    pub async fn broadcast(&self, message: impl Into<Arc<str>>) -> Result<(), HubClosed> {
        self.tx
            .send(Command::Broadcast {
                message: message.into(),
            })
            .await
            .map_err(|_| HubClosed)
    }

    /// Serialize and broadcast an event. Failures are logged, never returned.
    pub async fn publish(&self, event: &HubEvent) {
        let message = match serde_json::to_string(event) {
            Ok(m) => m,
            Err(e) => {
                warn!(event = event.name(), error = %e, "Failed to serialize hub event");
                return;
            }
        };

        if self.broadcast(message).await.is_err() {
            warn!(event = event.name(), "Hub stopped, event not delivered");
        }
    }

    pub async fn stats(&self) -> Result<HubStats, HubClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Stats { reply })
            .await
            .map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }

    pub async fn client_count(&self) -> Result<usize, HubClosed> {
        self.stats().await.map(|s| s.clients)
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Hub actor; owns the client set exclusively.
pub struct NotificationHub {
    rx: mpsc::Receiver<Command>,
    clients: HashMap<ClientId, mpsc::Sender<Arc<str>>>,
    stats: HubStats,
}

impl NotificationHub {
    /// Create the actor and its handle. The actor does nothing until `run`.
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));

        let hub = Self {
            rx,
            clients: HashMap::new(),
            stats: HubStats::default(),
        };
        let handle = HubHandle {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
            client_buffer: config.client_buffer,
        };

        (hub, handle)
    }

    /// Process commands until every handle has been dropped.
    pub async fn run(mut self) {
        info!("NotificationHub starting");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Register { id, tx } => {
                    self.clients.insert(id, tx);
                    debug!(client_id = id, clients = self.clients.len(), "Client registered");
                }
                Command::Unregister { id } => {
                    // Dropping the sender closes the client's buffer.
                    if self.clients.remove(&id).is_some() {
                        debug!(client_id = id, clients = self.clients.len(), "Client unregistered");
                    }
                }
                Command::Broadcast { message } => self.fan_out(&message),
                Command::Stats { reply } => {
                    let mut stats = self.stats;
                    stats.clients = self.clients.len();
                    let _ = reply.send(stats);
                }
            }
        }

        info!(clients = self.clients.len(), "NotificationHub stopped");
    }

    fn fan_out(&mut self, message: &Arc<str>) {
        self.stats.broadcasts += 1;
        let mut gone = Vec::new();

        for (&id, tx) in &self.clients {
            match tx.try_send(Arc::clone(message)) {
                Ok(()) => self.stats.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.stats.dropped += 1;
                    warn!(client_id = id, "Client buffer full, message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(id),
            }
        }

        for id in gone {
            self.clients.remove(&id);
            self.stats.evicted += 1;
            debug!(client_id = id, "Evicted disconnected client");
        }
    }
}
