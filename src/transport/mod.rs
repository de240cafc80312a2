//! Transport module - where byte streams come from.
//!
//! A [`Transport`] turns an address into a connected stream (`dial`) or into
//! a [`Listener`] that yields streams (`listen`). Addresses are opaque strings
//! passed through unchanged. Connections and servers are generic over the
//! transport, so the protocol engine never touches sockets directly.
//!
//! Provides:
//! - [`TcpTransport`] - TCP with `TCP_NODELAY`
//! - [`UnixTransport`] - Unix domain sockets (Unix only)
//! - [`MemoryTransport`] - in-process streams, for tests and embedding

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

mod memory;
mod tcp;
#[cfg(unix)]
mod unix;

pub use memory::{MemoryListener, MemoryTransport};
pub use tcp::TcpTransport;
#[cfg(unix)]
pub use unix::{generate_socket_path, UnixSocketListener, UnixTransport};

/// Provider of duplex byte streams.
pub trait Transport: Send + Sync + 'static {
    /// Connected stream type.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;
    /// Listener type returned by [`listen`](Self::listen).
    type Listener: Listener<Stream = Self::Stream>;

    /// Connect to `addr`, returning the stream and the peer's address.
    fn dial(&self, addr: &str) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send;

    /// Bind `addr` and return a listener for it.
    fn listen(&self, addr: &str) -> impl Future<Output = io::Result<Self::Listener>> + Send;
}

/// Source of accepted streams.
pub trait Listener: Send + 'static {
    /// Accepted stream type.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Wait for the next inbound stream and the peer's address.
    ///
    /// Must be cancel safe: the accept loop drops a pending call on shutdown.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send;

    /// Address actually bound, e.g. with the real port after binding port 0.
    fn local_addr(&self) -> io::Result<String>;
}
