//! Socket abstractions used by the accept loop
//!
//! The accept loop and connections only see the [`Listener`] and
//! [`Transport`] traits. The TCP implementations below are the production
//! ones; tests substitute in-memory fakes.

use crate::error::AcceptError;
use async_trait::async_trait;
use log::{debug, info};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// A connected, bidirectional client socket
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn peer_addr(&self) -> SocketAddr;

    /// Waits for data; `Ok(0)` means the peer closed the stream
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Closes the socket. Pending reads return.
    fn close(&self) -> io::Result<()>;
}

/// A listening socket that hands out connected transports
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    type Stream: Transport;

    fn start(&self) -> io::Result<()>;

    /// Stops listening. A pending `accept` returns `AcceptError::Stopped`.
    fn stop(&self);

    /// Waits until a client connects or the listener stops
    async fn accept(&self) -> Result<Self::Stream, AcceptError>;

    /// Bound address while started
    fn local_addr(&self) -> Option<SocketAddr>;
}

enum Socket {
    /// Bound by `start`, not yet attached to a runtime
    Bound(std::net::TcpListener),
    /// Attached to the runtime of the first `accept`
    Registered(Arc<TcpListener>),
}

/// TCP listener whose accept can be interrupted by `stop`
///
/// `start` binds synchronously so address errors reach the caller. The
/// socket is handed to tokio on the first `accept`, which must therefore run
/// inside a runtime.
pub struct TcpTransportListener {
    addr: SocketAddr,
    socket: Mutex<Option<Socket>>,
    closed: watch::Sender<bool>,
}

impl TcpTransportListener {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            socket: Mutex::new(None),
            closed: watch::channel(true).0,
        }
    }

    fn socket(&self) -> MutexGuard<'_, Option<Socket>> {
        self.socket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn registered(&self) -> Result<Arc<TcpListener>, AcceptError> {
        let mut socket = self.socket();
        let listener = match socket.take() {
            None => return Err(AcceptError::Stopped),
            Some(Socket::Registered(listener)) => listener,
            Some(Socket::Bound(listener)) => Arc::new(TcpListener::from_std(listener)?),
        };
        *socket = Some(Socket::Registered(Arc::clone(&listener)));
        Ok(listener)
    }
}

#[async_trait]
impl Listener for TcpTransportListener {
    type Stream = TcpTransport;

    fn start(&self) -> io::Result<()> {
        let mut socket = self.socket();
        if socket.is_some() {
            return Ok(());
        }

        let listener = std::net::TcpListener::bind(self.addr)?;
        listener.set_nonblocking(true)?;
        info!("Server listening on {}", listener.local_addr()?);
        *socket = Some(Socket::Bound(listener));
        self.closed.send_replace(false);
        Ok(())
    }

    fn stop(&self) {
        self.closed.send_replace(true);
        if self.socket().take().is_some() {
            debug!("Closed listener for {}", self.addr);
        }
    }

    async fn accept(&self) -> Result<TcpTransport, AcceptError> {
        // Subscribe first so a stop after the socket lookup is still seen
        let mut closed = self.closed.subscribe();
        let listener = self.registered()?;

        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(AcceptError::Stopped),
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted.map_err(|e| match e.kind() {
                    io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::NotConnected => AcceptError::Client(e),
                    _ => AcceptError::Io(e),
                })?;

                TcpTransport::new(stream).map_err(|e| {
                    debug!("Setting up client {} failed: {}", peer_addr, e);
                    AcceptError::Client(e)
                })
            }
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match self.socket().as_ref()? {
            Socket::Bound(listener) => listener.local_addr().ok(),
            Socket::Registered(listener) => listener.local_addr().ok(),
        }
    }
}

/// Accepted TCP client socket
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    // Second handle on the same socket; shutting it down wakes pending reads
    closer: std::net::TcpStream,
    peer_addr: SocketAddr,
}

impl TcpTransport {
    /// Must be called inside a runtime
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;

        let stream = stream.into_std()?;
        let closer = stream.try_clone()?;
        let stream = TcpStream::from_std(stream)?;

        Ok(Self {
            stream,
            closer,
            peer_addr,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            self.stream.readable().await?;
            match self.stream.try_read(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                result => return result,
            }
        }
    }

    fn close(&self) -> io::Result<()> {
        match self.closer.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}
