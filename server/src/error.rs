use std::io;
use std::net::AddrParseError;
use thiserror::Error;

/// Failure of a single accept call
#[derive(Debug, Error)]
pub enum AcceptError {
    /// The listener was stopped while (or before) waiting for a client.
    /// The accept loop treats this as its termination signal.
    #[error("listener stopped")]
    Stopped,

    /// The accepted client went away before it could be set up. Only that
    /// client is lost; the listener keeps working.
    #[error("client dropped during accept: {0}")]
    Client(#[source] io::Error),

    #[error("accept failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddrParseError,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Accept(#[from] AcceptError),

    #[error("accept loop panicked")]
    AcceptLoopPanicked,
}
