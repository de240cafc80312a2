//! Listening endpoint.
//!
//! [`Server::listen`] binds through the transport and spawns an accept loop.
//! Each accepted stream becomes a [`Connection`]; the connection handler set
//! with [`Server::on_connection`] runs on it before its read loop starts, so
//! request and event handlers are in place before the first frame is read.
//!
//! Accepted connections are independent of the server: [`Server::close`]
//! stops accepting but leaves established connections running.
//!
//! # Example
//!
//! ```ignore
//! use rpcwire::{Connection, Server};
//! use rpcwire::handler::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.method("ADD", |(a, b): (i64, i64)| async move { Ok::<_, String>(a + b) });
//!
//! let server = Server::tcp();
//! server.on_connection(move |conn: &Connection| {
//!     registry.install(conn);
//!     Ok(())
//! });
//! server.listen("127.0.0.1:7000").await?;
//! ```

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{Result, RpcError};
use crate::handler::ConnectionHandler;
use crate::transport::{Listener, TcpTransport, Transport};
use crate::writer::shutdown_signalled;

type HandlerCell = Arc<RwLock<Option<Arc<dyn ConnectionHandler>>>>;

/// A running accept loop.
struct Accepting {
    addr: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Accepts connections over a [`Transport`].
pub struct Server<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    handler: HandlerCell,
    accepting: Mutex<Option<Accepting>>,
}

impl Server<TcpTransport> {
    /// TCP server with default settings.
    pub fn tcp() -> Self {
        Self::new(TcpTransport, ConnectionConfig::default())
    }
}

impl<T: Transport> Server<T> {
    /// Create a server. Every accepted connection gets a clone of `config`.
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        Self {
            transport,
            config,
            handler: Arc::new(RwLock::new(None)),
            accepting: Mutex::new(None),
        }
    }

    fn accepting(&self) -> MutexGuard<'_, Option<Accepting>> {
        self.accepting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the handler run on every newly accepted connection.
    ///
    /// Applies to connections accepted after the call.
    pub fn on_connection<H: ConnectionHandler>(&self, handler: H) {
        *self
            .handler
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(handler));
    }

    /// Bind `addr` and start accepting in the background.
    ///
    /// Returns once the address is bound.
    ///
    /// # Errors
    ///
    /// [`RpcError::AlreadyListening`] if this server is already accepting, or
    /// [`RpcError::Bind`] if the transport cannot bind `addr`.
    pub async fn listen(&self, addr: &str) -> Result<()> {
        if let Some(bound) = self.listening_on() {
            return Err(RpcError::AlreadyListening(bound));
        }

        let listener = self
            .transport
            .listen(addr)
            .await
            .map_err(|source| RpcError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let bound = listener.local_addr().unwrap_or_else(|_| addr.to_string());

        let mut accepting = self.accepting();
        if let Some(current) = accepting.as_ref().filter(|a| !a.task.is_finished()) {
            return Err(RpcError::AlreadyListening(current.addr.clone()));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            self.handler.clone(),
            shutdown_rx,
        ));
        tracing::info!(addr = %bound, "listening");

        *accepting = Some(Accepting {
            addr: bound,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Stop accepting and wait for the accept loop to exit.
    ///
    /// Connections accepted earlier keep running.
    ///
    /// # Errors
    ///
    /// [`RpcError::NotListening`] if the server is not accepting.
    pub async fn close(&self) -> Result<()> {
        let accepting = self.accepting().take().ok_or(RpcError::NotListening)?;

        accepting.shutdown.send_replace(true);
        if let Err(e) = accepting.task.await {
            tracing::error!(addr = %accepting.addr, error = %e, "accept loop panicked");
        }
        Ok(())
    }

    /// Address the server is bound to, if it is accepting.
    pub fn local_addr(&self) -> Option<String> {
        self.listening_on()
    }

    /// Whether the accept loop is running.
    pub fn is_listening(&self) -> bool {
        self.listening_on().is_some()
    }

    fn listening_on(&self) -> Option<String> {
        self.accepting()
            .as_ref()
            .filter(|a| !a.task.is_finished())
            .map(|a| a.addr.clone())
    }
}

async fn accept_loop<L: Listener>(
    mut listener: L,
    config: ConnectionConfig,
    handler: HandlerCell,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed, stopping listener");
                    break;
                }
            },
            _ = shutdown_signalled(&mut shutdown) => break,
        };
        tracing::debug!(peer = %peer, "accepted connection");

        let conn = Connection::new(stream, peer, config.clone());
        let setup = handler
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        if let Some(setup) = setup {
            if let Err(e) = setup.on_connection(&conn) {
                tracing::error!(peer = conn.peer_addr(), error = %e, "connection setup failed");
                let _ = conn.close().await;
                continue;
            }
        }

        if let Err(e) = conn.start() {
            tracing::error!(peer = conn.peer_addr(), error = %e, "could not start connection");
        }
    }

    drop(listener);
    tracing::info!("listener shut down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn memory_server() -> (Server<MemoryTransport>, MemoryTransport) {
        let transport = MemoryTransport::new();
        (
            Server::new(transport.clone(), ConnectionConfig::default()),
            transport,
        )
    }

    #[tokio::test]
    async fn test_listen_twice() {
        let (server, _) = memory_server();
        server.listen("svc").await.unwrap();

        let second = server.listen("svc").await;
        assert!(matches!(second, Err(RpcError::AlreadyListening(addr)) if addr == "svc"));
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_when_idle() {
        let (server, _) = memory_server();
        assert!(matches!(server.close().await, Err(RpcError::NotListening)));

        server.listen("svc").await.unwrap();
        server.close().await.unwrap();
        assert!(matches!(server.close().await, Err(RpcError::NotListening)));
    }

    #[tokio::test]
    async fn test_close_frees_address() {
        let (server, transport) = memory_server();
        server.listen("svc").await.unwrap();
        assert_eq!(server.local_addr().as_deref(), Some("svc"));

        server.close().await.unwrap();
        assert!(!server.is_listening());
        assert!(transport.dial("svc").await.is_err());

        server.listen("svc").await.unwrap();
        assert!(server.is_listening());
    }

    #[tokio::test]
    async fn test_bind_error() {
        let (server, transport) = memory_server();
        let _taken = transport.listen("svc").await.unwrap();

        let result = server.listen("svc").await;
        assert!(matches!(result, Err(RpcError::Bind { .. })));
        assert!(!server.is_listening());
    }

    #[tokio::test]
    async fn test_tcp_local_addr() {
        let server = Server::tcp();
        server.listen("127.0.0.1:0").await.unwrap();

        let addr = server.local_addr().unwrap();
        assert!(addr.starts_with("127.0.0.1:"));
        assert!(!addr.ends_with(":0"));
        server.close().await.unwrap();
    }
}
