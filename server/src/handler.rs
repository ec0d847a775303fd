//! Connection accept loop
//!
//! [`ConnectionHandler::handle`] awaits the listener for as long as the
//! server is running. Every accepted transport is wrapped into a
//! [`Connection`], its events are relayed to the server event channel, and
//! only then is the new client announced.

use crate::connection::{Connection, ConnectionEvent, ConnectionFactory, ConnectionId};
use crate::error::{AcceptError, ServerError};
use crate::transport::Listener;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};

/// Events published by the server to its host
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected(Arc<Connection>),
    ClientDisconnected {
        id: ConnectionId,
        peer_addr: SocketAddr,
    },
    PacketReceived {
        id: ConnectionId,
        payload: Vec<u8>,
    },
}

/// Cooperative stop condition shared between a server and its accept loop
///
/// Backed by a watch channel so the accept loop can wait for the stop
/// alongside a pending accept.
#[derive(Debug)]
pub struct RunState {
    running: watch::Sender<bool>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            running: watch::channel(false).0,
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Moves to running; returns false if it already was
    pub fn try_start(&self) -> bool {
        self.running.send_if_modified(|running| !std::mem::replace(running, true))
    }

    /// Moves to stopped; returns false if it already was
    pub fn try_stop(&self) -> bool {
        self.running.send_if_modified(|running| std::mem::replace(running, false))
    }

    /// Completes once the state is stopped
    pub async fn stopped(&self) {
        let mut running = self.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

type Registry = Mutex<HashMap<ConnectionId, Arc<Connection>>>;

/// Accepts clients and publishes their lifecycle as [`ServerEvent`]s
pub struct ConnectionHandler {
    factory: ConnectionFactory,
    events: mpsc::UnboundedSender<ServerEvent>,
    connections: Arc<Registry>,
    publish_packets: bool,
}

impl ConnectionHandler {
    pub fn new(events: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            factory: ConnectionFactory::new(),
            events,
            connections: Arc::new(Mutex::new(HashMap::new())),
            publish_packets: true,
        }
    }

    /// Whether received payloads are published as `PacketReceived`
    ///
    /// Every connection is read either way so a client hanging up is
    /// always noticed; when disabled the payloads are dropped.
    pub fn with_packet_events(mut self, enabled: bool) -> Self {
        self.publish_packets = enabled;
        self
    }

    /// Runs the accept loop until the run state is cleared
    ///
    /// Clients lost during their own accept are logged and skipped. Any
    /// other accept failure ends the loop without retry: the listener is
    /// stopped, the run state cleared and the failure returned.
    ///
    /// Must be polled inside a tokio runtime; each connection gets a reader
    /// task on it.
    pub async fn handle<L: Listener>(
        &self,
        state: &RunState,
        listener: &L,
    ) -> Result<(), ServerError> {
        debug!("Accept loop started");

        while state.is_running() {
            let accepted = tokio::select! {
                biased;
                _ = state.stopped() => break,
                accepted = listener.accept() => accepted,
            };

            let stream = match accepted {
                Ok(stream) => stream,
                Err(AcceptError::Stopped) => break,
                Err(AcceptError::Client(e)) => {
                    warn!("Dropped client during accept: {}", e);
                    continue;
                }
                Err(e) if !state.is_running() => {
                    debug!("Accept interrupted by shutdown: {}", e);
                    break;
                }
                Err(e) => {
                    error!("Accept loop failed: {}", e);
                    listener.stop();
                    state.try_stop();
                    return Err(e.into());
                }
            };

            self.on_accepted(self.factory.create(stream));
        }

        debug!("Accept loop finished");
        Ok(())
    }

    /// Live connections, in no particular order
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        lock(&self.connections).values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Disconnects every live connection
    pub fn disconnect_all(&self) {
        for connection in self.connections() {
            if let Err(e) = connection.disconnect() {
                warn!("Failed to close connection {}: {}", connection.id(), e);
            }
        }
    }

    fn on_accepted(&self, connection: Connection) {
        let connection = Arc::new(connection);
        info!(
            "Client {} connected from {}",
            connection.id(),
            connection.peer_addr()
        );

        // Subscribe before announcing so no event of this client is lost
        let events = self.events.clone();
        let registry: Weak<Registry> = Arc::downgrade(&self.connections);
        let publish_packets = self.publish_packets;
        connection.subscribe(move |event| {
            let relayed = match event {
                ConnectionEvent::Disconnected { id, peer_addr } => {
                    if let Some(registry) = registry.upgrade() {
                        lock(&registry).remove(&id);
                    }
                    ServerEvent::ClientDisconnected { id, peer_addr }
                }
                ConnectionEvent::PacketReceived { id, payload } if publish_packets => {
                    ServerEvent::PacketReceived { id, payload }
                }
                ConnectionEvent::PacketReceived { .. } => return,
            };
            publish(&events, relayed);
        });
        lock(&self.connections).insert(connection.id(), Arc::clone(&connection));

        publish(
            &self.events,
            ServerEvent::ClientConnected(Arc::clone(&connection)),
        );

        tokio::spawn(async move {
            if let Err(e) = connection.pump().await {
                warn!("Connection {} closed with error: {}", connection.id(), e);
            }
        });
    }
}

fn publish(events: &mpsc::UnboundedSender<ServerEvent>, event: ServerEvent) {
    if let Err(e) = events.send(event) {
        warn!("Dropping server event, receiver is gone: {:?}", e.0);
    }
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
