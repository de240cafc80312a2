//! In-process transport.
//!
//! Listeners register under a name in a registry shared by every clone of a
//! [`MemoryTransport`]. Dialing a registered name creates a
//! `tokio::io::duplex` pair and hands one end to the listener. Nothing
//! touches the network, which makes this the transport of choice for tests.
//!
//! Separate `MemoryTransport::new()` values have separate registries, so
//! parallel tests do not see each other's listeners.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;

use super::{Listener, Transport};

/// Default capacity of each direction of an in-memory stream.
pub const DEFAULT_MEMORY_BUFFER: usize = 64 * 1024;

/// Pending dials queued on a listener before `dial` waits.
const ACCEPT_BACKLOG: usize = 32;

type Backlog = mpsc::Sender<(DuplexStream, String)>;

#[derive(Default)]
struct Registry {
    listeners: Mutex<HashMap<String, Backlog>>,
    next_peer: AtomicU64,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Backlog>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Streams between tasks of one process.
#[derive(Clone)]
pub struct MemoryTransport {
    registry: Arc<Registry>,
    buffer_size: usize,
}

impl MemoryTransport {
    /// Create a transport with its own, empty registry.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_MEMORY_BUFFER)
    }

    /// Create a transport whose streams buffer `size` bytes per direction.
    pub fn with_buffer_size(size: usize) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            buffer_size: size.max(1),
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    type Stream = DuplexStream;
    type Listener = MemoryListener;

    async fn dial(&self, addr: &str) -> io::Result<(DuplexStream, String)> {
        let backlog = self.registry.lock().get(addr).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no memory listener at {}", addr),
            )
        })?;

        let (local, remote) = duplex(self.buffer_size);
        let peer = format!("memory-peer-{}", self.registry.next_peer.fetch_add(1, Ordering::Relaxed));

        backlog.send((remote, peer)).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("memory listener at {} is gone", addr),
            )
        })?;

        Ok((local, addr.to_string()))
    }

    async fn listen(&self, addr: &str) -> io::Result<MemoryListener> {
        let mut listeners = self.registry.lock();
        if listeners.contains_key(addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("memory address {} already in use", addr),
            ));
        }

        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        listeners.insert(addr.to_string(), tx);

        Ok(MemoryListener {
            addr: addr.to_string(),
            incoming: rx,
            registry: self.registry.clone(),
        })
    }
}

/// Listener half of a [`MemoryTransport`] address.
///
/// Dropping it frees the address.
pub struct MemoryListener {
    addr: String,
    incoming: mpsc::Receiver<(DuplexStream, String)>,
    registry: Arc<Registry>,
}

impl Listener for MemoryListener {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> io::Result<(DuplexStream, String)> {
        self.incoming.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "memory listener unregistered")
        })
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.addr.clone())
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_dial_and_accept() {
        let transport = MemoryTransport::new();
        let mut listener = transport.listen("svc").await.unwrap();

        let (mut client, peer) = transport.dial("svc").await.unwrap();
        let (mut server, server_peer) = listener.accept().await.unwrap();

        assert_eq!(peer, "svc");
        assert!(server_peer.starts_with("memory-peer-"));

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_dial_unknown_address() {
        let transport = MemoryTransport::new();
        let err = transport.dial("nowhere").await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_address_in_use_until_dropped() {
        let transport = MemoryTransport::new();
        let listener = transport.listen("svc").await.unwrap();

        let err = transport.listen("svc").await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);

        drop(listener);
        assert!(transport.listen("svc").await.is_ok());
    }

    #[tokio::test]
    async fn test_registries_are_isolated() {
        let first = MemoryTransport::new();
        let second = MemoryTransport::new();
        let _listener = first.listen("svc").await.unwrap();

        assert!(second.dial("svc").await.is_err());
        assert!(first.clone().dial("svc").await.is_ok());
    }
}
