//! Unix domain socket transport.
//!
//! Addresses are filesystem paths. Binding removes a stale socket file left
//! at the path, and dropping the listener removes the file again.
//!
//! # Example
//!
//! ```ignore
//! use rpcwire::transport::{generate_socket_path, UnixTransport};
//! use rpcwire::{ConnectionConfig, Server};
//!
//! let path = generate_socket_path();
//! let server = Server::new(UnixTransport, ConnectionConfig::default());
//! server.listen(&path).await?;
//! ```

use std::io;
use std::path::Path;

use tokio::net::{UnixListener, UnixStream};

use super::{Listener, Transport};

/// Generate a unique socket path for this process.
///
/// Format: `/tmp/rpcwire-{pid}-{random}.sock`
pub fn generate_socket_path() -> String {
    format!("/tmp/rpcwire-{}-{:x}.sock", std::process::id(), rand_u64())
}

/// Simple random u64 using system time, process ID and a counter.
fn rand_u64() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid ^ count.rotate_left(32)
}

/// Streams over Unix domain sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixTransport;

impl Transport for UnixTransport {
    type Stream = UnixStream;
    type Listener = UnixSocketListener;

    async fn dial(&self, addr: &str) -> io::Result<(UnixStream, String)> {
        let stream = UnixStream::connect(addr).await?;
        Ok((stream, addr.to_string()))
    }

    async fn listen(&self, addr: &str) -> io::Result<UnixSocketListener> {
        UnixSocketListener::bind(addr)
    }
}

/// Unix socket listener that owns its socket file.
#[derive(Debug)]
pub struct UnixSocketListener {
    listener: UnixListener,
    path: String,
}

impl UnixSocketListener {
    /// Bind to a socket path, removing any existing socket file first.
    pub fn bind(path: &str) -> io::Result<Self> {
        if Path::new(path).exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    /// Get the socket path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Listener for UnixSocketListener {
    type Stream = UnixStream;

    async fn accept(&mut self) -> io::Result<(UnixStream, String)> {
        let (stream, _addr) = self.listener.accept().await?;
        // Clients are usually unnamed; report the path they connected to
        Ok((stream, self.path.clone()))
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.path.clone())
    }
}

impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
