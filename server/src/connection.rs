//! Accepted client sessions
//!
//! A [`Connection`] exclusively owns the transport of one accepted client.
//! Interested parties subscribe to its [`ConnectionEvent`]s; the accept loop
//! uses this to relay them as server-wide events.

use crate::transport::Transport;
use log::{debug, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Size of the buffer a single packet read fills
pub const READ_BUFFER_SIZE: usize = 2048;

pub type ConnectionId = Uuid;

/// Notifications emitted by a single connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Disconnected {
        id: ConnectionId,
        peer_addr: SocketAddr,
    },
    PacketReceived {
        id: ConnectionId,
        payload: Vec<u8>,
    },
}

type Subscriber = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// One identified client session over an accepted transport
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    transport: Box<dyn Transport>,
    closed: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Connection {
    fn new(id: ConnectionId, transport: Box<dyn Transport>) -> Self {
        Self {
            id,
            peer_addr: transport.peer_addr(),
            transport,
            closed: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn remote_address(&self) -> String {
        self.peer_addr.ip().to_string()
    }

    pub fn remote_port(&self) -> u16 {
        self.peer_addr.port()
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Registers a callback for every subsequent event of this connection
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(subscriber));
    }

    /// Tears the session down
    ///
    /// The first call notifies subscribers and then closes the transport.
    /// A disconnected connection stays disconnected; further calls do nothing.
    pub fn disconnect(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Connection {} from {} disconnecting", self.id, self.peer_addr);
        self.emit(ConnectionEvent::Disconnected {
            id: self.id,
            peer_addr: self.peer_addr,
        });
        self.transport.close()
    }

    /// Performs one read from the transport
    ///
    /// A non-empty read is published as a `PacketReceived` event and
    /// returned. End of stream disconnects the session. Returns `Ok(None)`
    /// once the connection is closed.
    pub async fn read_packet(&self) -> io::Result<Option<Vec<u8>>> {
        if !self.is_connected() {
            return Ok(None);
        }

        let mut buffer = [0u8; READ_BUFFER_SIZE];
        loop {
            match self.transport.read(&mut buffer).await {
                Ok(0) => {
                    self.disconnect()?;
                    return Ok(None);
                }
                Ok(len) => {
                    let payload = buffer[..len].to_vec();
                    self.emit(ConnectionEvent::PacketReceived {
                        id: self.id,
                        payload: payload.clone(),
                    });
                    return Ok(Some(payload));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Reads fail once the transport was closed elsewhere
                Err(_) if !self.is_connected() => return Ok(None),
                Err(e) => {
                    warn!("Read from {} failed: {}", self.peer_addr, e);
                    self.disconnect()?;
                    return Err(e);
                }
            }
        }
    }

    /// Reads packets until the connection closes
    pub async fn pump(&self) -> io::Result<()> {
        while self.read_packet().await?.is_some() {}
        Ok(())
    }

    fn emit(&self, event: ConnectionEvent) {
        // Snapshot so a subscriber may call back into this connection
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for subscriber in subscribers {
            subscriber(event.clone());
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Wraps accepted transports into identified connections
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionFactory;

impl ConnectionFactory {
    pub fn new() -> Self {
        Self
    }

    /// Creates a connection with a freshly generated identifier
    pub fn create<T: Transport>(&self, transport: T) -> Connection {
        let connection = Connection::new(Uuid::new_v4(), Box::new(transport));
        debug!(
            "Created connection {} for {}",
            connection.id, connection.peer_addr
        );
        connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;

    /// In-memory transport replaying scripted reads
    struct ScriptedTransport {
        peer_addr: SocketAddr,
        reads: Mutex<VecDeque<io::Result<Vec<u8>>>>,
        closes: Arc<AtomicU32>,
    }

    impl ScriptedTransport {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> (Self, Arc<AtomicU32>) {
            let closes = Arc::new(AtomicU32::new(0));
            let transport = Self {
                peer_addr: "10.0.0.7:5050".parse().unwrap(),
                reads: Mutex::new(reads.into()),
                closes: Arc::clone(&closes),
            };
            (transport, closes)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn peer_addr(&self) -> SocketAddr {
            self.peer_addr
        }

        async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            let next = self.reads.lock().unwrap().pop_front();
            match next {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }

        fn close(&self) -> io::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn recording(connection: &Connection) -> Arc<Mutex<Vec<ConnectionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        connection.subscribe(move |event| sink.lock().unwrap().push(event));
        events
    }

    #[test]
    fn test_factory_preserves_remote_endpoint() {
        let (transport, _) = ScriptedTransport::new(vec![]);
        let connection = ConnectionFactory::new().create(transport);

        assert_eq!(connection.remote_address(), "10.0.0.7");
        assert_eq!(connection.remote_port(), 5050);
        assert_eq!(
            connection.peer_addr(),
            "10.0.0.7:5050".parse::<SocketAddr>().unwrap()
        );
        assert!(connection.is_connected());
    }

    #[test]
    fn test_factory_assigns_unique_ids() {
        let factory = ConnectionFactory::new();
        let (first, _) = ScriptedTransport::new(vec![]);
        let (second, _) = ScriptedTransport::new(vec![]);

        assert_ne!(factory.create(first).id(), factory.create(second).id());
    }

    #[test]
    fn test_disconnect_notifies_then_closes_once() {
        let (transport, closes) = ScriptedTransport::new(vec![]);
        let connection = ConnectionFactory::new().create(transport);
        let events = recording(&connection);

        connection.disconnect().unwrap();
        connection.disconnect().unwrap();

        assert!(!connection.is_connected());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec![ConnectionEvent::Disconnected {
                id: connection.id(),
                peer_addr: connection.peer_addr(),
            }]
        );
    }

    #[test]
    fn test_disconnect_without_subscribers() {
        let (transport, closes) = ScriptedTransport::new(vec![]);
        let connection = ConnectionFactory::new().create(transport);

        connection.disconnect().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_packet_publishes_payload() {
        let (transport, _) = ScriptedTransport::new(vec![Ok(b"hello".to_vec())]);
        let connection = ConnectionFactory::new().create(transport);
        let events = recording(&connection);

        let payload = connection.read_packet().await.unwrap();

        assert_eq!(payload, Some(b"hello".to_vec()));
        assert_eq!(
            *events.lock().unwrap(),
            vec![ConnectionEvent::PacketReceived {
                id: connection.id(),
                payload: b"hello".to_vec(),
            }]
        );
    }

    #[tokio::test]
    async fn test_pump_reads_until_end_of_stream() {
        let (transport, closes) = ScriptedTransport::new(vec![
            Ok(b"one".to_vec()),
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Ok(b"two".to_vec()),
        ]);
        let connection = ConnectionFactory::new().create(transport);
        let events = recording(&connection);

        connection.pump().await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ConnectionEvent::PacketReceived { payload, .. } if payload == b"one"));
        assert!(matches!(&events[1], ConnectionEvent::PacketReceived { payload, .. } if payload == b"two"));
        assert!(matches!(events[2], ConnectionEvent::Disconnected { .. }));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(connection.read_packet().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_error_disconnects_and_propagates() {
        let (transport, closes) = ScriptedTransport::new(vec![Err(io::Error::from(
            io::ErrorKind::ConnectionReset,
        ))]);
        let connection = ConnectionFactory::new().create(transport);

        let result = connection.read_packet().await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionReset);
        assert!(!connection.is_connected());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscriber_may_disconnect_from_callback() {
        let (transport, closes) = ScriptedTransport::new(vec![Ok(b"quit".to_vec())]);
        let connection = Arc::new(ConnectionFactory::new().create(transport));

        let weak = Arc::downgrade(&connection);
        connection.subscribe(move |event| {
            if let ConnectionEvent::PacketReceived { .. } = event {
                if let Some(connection) = weak.upgrade() {
                    connection.disconnect().unwrap();
                }
            }
        });

        connection.read_packet().await.unwrap();

        assert!(!connection.is_connected());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
