//! # Connection Server Library
//!
//! TCP accept loop for a game host. The server owns a listening socket,
//! accepts clients on a dedicated background thread and publishes their
//! lifecycle as events the host drains from its own loop.
//!
//! ## Module Organization
//!
//! ### Transport Module (`transport`)
//! The listener and client socket capabilities the rest of the crate is
//! written against, plus their TCP implementations on `tokio::net`. The TCP
//! listener can be stopped while an accept is pending on it.
//!
//! ### Connection Module (`connection`)
//! One accepted client session:
//! - Unique identifier and remote endpoint
//! - Subscribable disconnect and packet notifications
//! - One-shot teardown that closes the socket exactly once
//!
//! ### Handler Module (`handler`)
//! The accept loop itself. For every accepted socket it creates a
//! connection, relays the connection's notifications, and only then
//! announces the new client.
//!
//! ### Network Module (`network`)
//! Server lifecycle. `start` binds and launches the accept thread, `stop`
//! closes the listener and joins it. Both are idempotent.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, ServerEvent};
//!
//! fn main() -> Result<(), server::ServerError> {
//!     let (mut server, mut events) = Server::bind("127.0.0.1:8080")?;
//!     server.start()?;
//!
//!     while let Some(event) = events.blocking_recv() {
//!         match event {
//!             ServerEvent::ClientConnected(connection) => {
//!                 println!("{} joined", connection.peer_addr());
//!             }
//!             ServerEvent::PacketReceived { id, payload } => {
//!                 println!("{} sent {} bytes", id, payload.len());
//!             }
//!             ServerEvent::ClientDisconnected { id, .. } => {
//!                 println!("{} left", id);
//!                 break;
//!             }
//!         }
//!     }
//!
//!     server.stop()
//! }
//! ```
//!
//! ## Threading
//!
//! `start` spawns one OS thread that owns a current-thread tokio runtime.
//! The accept loop and one reader task per connection run on it, so the
//! caller of `start` never blocks and needs no runtime of its own. The run
//! flag is a watch channel the accept loop selects on next to the pending
//! accept.

pub mod connection;
pub mod error;
pub mod handler;
pub mod network;
pub mod transport;

pub use connection::{Connection, ConnectionEvent, ConnectionFactory, ConnectionId};
pub use error::{AcceptError, ServerError};
pub use handler::{ConnectionHandler, RunState, ServerEvent};
pub use network::{Server, ServerConfig};
pub use transport::{Listener, TcpTransport, TcpTransportListener, Transport};
