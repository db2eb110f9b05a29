use exchange_protocol::CodecError;
use thiserror::Error;

/// Failures of the byte transport underneath the client.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("ZMQ error: {0}")]
    Zmq(#[from] zmq::Error),

    /// The peer end of the transport is gone.
    #[error("Transport disconnected")]
    Disconnected,

    /// The outbound queue is full; the frame was not queued.
    #[error("Outbound queue is full")]
    Backpressure,

    /// Empty frames are reserved for interrupting the receive loop.
    #[error("Refusing to send an empty frame")]
    EmptyFrame,
}

/// Errors surfaced by the trader client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid server address: {0:?}")]
    InvalidAddress(String),

    /// The transport to the gateway could not be set up.
    #[error("Failed to connect to {address}: {source}")]
    Connection {
        address: String,
        #[source]
        source: zmq::Error,
    },

    /// The transport failed while the client was still logically connected.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Not logged in")]
    NotLoggedIn,

    /// A request policy refused to forward the call.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Client is closed")]
    Closed,

    #[error("Receive loop panicked")]
    ReceiverPanicked,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
