//! Server lifecycle: listener ownership and the background accept loop

use crate::connection::Connection;
use crate::error::ServerError;
use crate::handler::{ConnectionHandler, RunState, ServerEvent};
use crate::transport::{Listener, TcpTransportListener};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::runtime::Builder;
use tokio::sync::mpsc;

/// Server options not tied to a particular listener
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Publish received payloads as `PacketReceived`. Connections are read
    /// either way so hang-ups are always reported.
    pub publish_packets: bool,
    /// Name of the accept loop thread
    pub thread_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            publish_packets: true,
            thread_name: "accept-loop".to_string(),
        }
    }
}

/// Owns a listener and runs its accept loop on a dedicated thread
///
/// The thread drives a current-thread tokio runtime that hosts the accept
/// loop and one reader task per connection. Events for accepted clients
/// arrive on the receiver returned by the constructors. `start` and `stop`
/// are both idempotent.
pub struct Server<L: Listener = TcpTransportListener> {
    state: Arc<RunState>,
    listener: Arc<L>,
    handler: Arc<ConnectionHandler>,
    thread_name: String,
    worker: Option<JoinHandle<Result<(), ServerError>>>,
}

impl Server<TcpTransportListener> {
    /// Creates a TCP server for `addr` without binding it yet
    pub fn bind(
        addr: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), ServerError> {
        let socket_addr: SocketAddr = addr.parse().map_err(|source| ServerError::InvalidAddress {
            address: addr.to_string(),
            source,
        })?;

        Ok(Self::new(TcpTransportListener::new(socket_addr)))
    }
}

impl<L: Listener> Server<L> {
    pub fn new(listener: L) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        Self::with_config(listener, ServerConfig::default())
    }

    pub fn with_config(
        listener: L,
        config: ServerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handler = ConnectionHandler::new(events_tx).with_packet_events(config.publish_packets);

        let server = Server {
            state: Arc::new(RunState::new()),
            listener: Arc::new(listener),
            handler: Arc::new(handler),
            thread_name: config.thread_name,
            worker: None,
        };

        (server, events_rx)
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Address the listener is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Starts listening and launches the accept loop
    ///
    /// Returns as soon as the accept thread is spawned. Does nothing when
    /// the server is already running.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if !self.state.try_start() {
            return Ok(());
        }

        // An accept loop that failed on its own is still waiting to be joined
        if let Err(e) = self.join_worker() {
            warn!("Previous accept loop ended with error: {}", e);
        }

        if let Err(e) = self.listener.start() {
            self.state.try_stop();
            return Err(e.into());
        }

        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.state.try_stop();
                self.listener.stop();
                return Err(e.into());
            }
        };

        let state = Arc::clone(&self.state);
        let listener = Arc::clone(&self.listener);
        let handler = Arc::clone(&self.handler);

        let spawned = std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || runtime.block_on(handler.handle(&state, listener.as_ref())));

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                info!("Server started");
                Ok(())
            }
            Err(e) => {
                self.state.try_stop();
                self.listener.stop();
                Err(e.into())
            }
        }
    }

    /// Stops listening and waits for the accept loop to finish
    ///
    /// Returns the error that ended the accept loop, if it failed on its
    /// own before the stop; that loop already stopped the listener. Reader
    /// tasks end with the accept thread, connections stay registered until
    /// disconnected.
    pub fn stop(&mut self) -> Result<(), ServerError> {
        if !self.state.try_stop() {
            return self.join_worker();
        }

        self.listener.stop();
        let result = self.join_worker();
        info!("Server stopped");
        result
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.handler.connections()
    }

    pub fn connection_count(&self) -> usize {
        self.handler.connection_count()
    }

    /// Disconnects every client accepted so far
    pub fn disconnect_all(&self) {
        self.handler.disconnect_all();
    }

    fn join_worker(&mut self) -> Result<(), ServerError> {
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| ServerError::AcceptLoopPanicked)?,
            None => Ok(()),
        }
    }
}

impl<L: Listener> Drop for Server<L> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Accept loop ended with error: {}", e);
        }
    }
}
