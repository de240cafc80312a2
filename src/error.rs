//! Error types for rpcwire.

use thiserror::Error;

/// Main error type for all rpcwire operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (malformed frame, unknown frame type, oversized frame).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport could not bind the listening address.
    #[error("could not bind on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The transport could not reach the given address.
    #[error("could not dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Operation attempted on a connection that is no longer alive.
    #[error("{0} on inactive connection")]
    InactiveConnection(&'static str),

    /// The connection went down before a response arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Application-level error returned by the peer's request handler.
    #[error("remote error: {0}")]
    Remote(String),

    /// A positional request argument was absent from the payload.
    #[error("missing argument at position {0}")]
    MissingArgument(usize),

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// `Server::listen` called while the server is already accepting.
    #[error("server already listening on {0}")]
    AlreadyListening(String),

    /// `Server::close` called on a server that is not accepting.
    #[error("server is not listening")]
    NotListening,

    /// The connection's read loop was already started.
    #[error("connection already started")]
    AlreadyStarted,
}

impl RpcError {
    /// Whether this error is an application error sent by the peer.
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote(_))
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
