//! Symmetric connection: either side may send requests and events and answer
//! the peer's requests.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────── Connection ────────────────┐
//! send_request ──► │ PendingTable ◄── resolve ─┐                │
//! send_event ────► │ WriterHandle ─► Writer Task ─► write half  │
//!                  │                           │                │
//!                  │ HandlerSlots ◄── dispatch ── Read Loop ◄── read half
//!                  └────────────────────────────────────────────┘
//! ```
//!
//! `send_request` registers a pending entry under a fresh correlation id
//! before the request frame is queued, so a response can never arrive for an
//! id that is not yet known. The read loop is the only reader of the stream
//! and the writer task the only writer.
//!
//! # Example
//!
//! ```ignore
//! use rpcwire::Connection;
//!
//! let conn = Connection::connect_tcp("127.0.0.1:7000").await?;
//! let sum: i64 = conn.send_request("ADD", (5, 2)).await?.get_result().await?;
//! conn.send_event("ARRIVED", "joe").await?;
//! conn.close().await?;
//! ```

mod read_loop;
mod slots;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::error::{Result, RpcError};
use crate::future::{self, ResponseFuture};
use crate::handler::{ConnectionHandler, EventHandler, RequestHandler};
use crate::pending::PendingTable;
use crate::protocol::{EncodeArgs, Frame};
use crate::transport::{TcpTransport, Transport};
use crate::writer::{shutdown_signalled, spawn_writer_task, OutboundFrame, WriterHandle};

pub use read_loop::NO_REQUEST_HANDLER;
use slots::HandlerSlots;

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

enum ReadState {
    /// Read half waiting for `start`.
    Ready(BoxReader),
    Running(JoinHandle<()>),
    Finished,
}

struct ConnInner {
    alive: AtomicBool,
    next_id: AtomicU64,
    pending: PendingTable,
    handlers: HandlerSlots,
    writer: WriterHandle,
    writer_task: Mutex<Option<JoinHandle<Result<()>>>>,
    read_state: Mutex<ReadState>,
    shutdown: watch::Sender<bool>,
    peer: String,
    config: ConnectionConfig,
}

impl ConnInner {
    /// Mark the session dead, fail every outstanding request and tell both
    /// tasks to stop. Safe to call more than once.
    fn shut_down(&self) {
        self.alive.store(false, Ordering::Release);
        let failed = self.pending.close_all();
        if failed > 0 {
            tracing::debug!(peer = %self.peer, failed, "failed outstanding requests");
        }
        self.shutdown.send_replace(true);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One live duplex session over a byte stream.
///
/// `Connection` is a cheap handle; clones refer to the same session. The
/// session stays up until [`close`](Self::close) is called or the stream
/// fails, even if every handle is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    /// Wrap `stream` in a connection.
    ///
    /// The writer task starts right away, so requests and events can be sent
    /// immediately. Inbound frames are not read until [`start`](Self::start)
    /// is called, which leaves room to install handlers first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(stream: S, peer: impl Into<String>, config: ConnectionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let peer = peer.into();

        let inner = Arc::new_cyclic(|weak: &Weak<ConnInner>| {
            let weak = weak.clone();
            let (writer, writer_task) =
                spawn_writer_task(write_half, &config.writer, shutdown_rx, move |e: &RpcError| {
                    if let Some(inner) = weak.upgrade() {
                        tracing::error!(peer = %inner.peer, error = %e, "connection write failed");
                        inner.shut_down();
                    }
                });

            ConnInner {
                alive: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                pending: PendingTable::new(),
                handlers: HandlerSlots::default(),
                writer,
                writer_task: Mutex::new(Some(writer_task)),
                read_state: Mutex::new(ReadState::Ready(Box::new(read_half))),
                shutdown,
                peer,
                config,
            }
        });

        Self { inner }
    }

    /// Dial `addr` over `transport`, run `setup` on the new connection, then
    /// start its read loop.
    ///
    /// If `setup` fails the connection is closed and the error returned.
    pub async fn dial<T, H>(
        transport: &T,
        addr: &str,
        config: ConnectionConfig,
        setup: H,
    ) -> Result<Self>
    where
        T: Transport,
        H: ConnectionHandler,
    {
        let (stream, peer) = transport.dial(addr).await.map_err(|source| RpcError::Dial {
            addr: addr.to_string(),
            source,
        })?;
        tracing::debug!(addr, peer = %peer, "dialed");

        let conn = Connection::new(stream, peer, config);
        if let Err(e) = setup.on_connection(&conn) {
            let _ = conn.close().await;
            return Err(e);
        }
        conn.start()?;
        Ok(conn)
    }

    /// Dial a TCP address with default settings and no handlers installed.
    pub async fn connect_tcp(addr: &str) -> Result<Self> {
        Self::dial(
            &TcpTransport,
            addr,
            ConnectionConfig::default(),
            |_: &Connection| -> Result<()> { Ok(()) },
        )
        .await
    }

    /// Start the read loop.
    ///
    /// # Errors
    ///
    /// [`RpcError::AlreadyStarted`] if the loop was started before, or
    /// [`RpcError::InactiveConnection`] if the connection is closed.
    pub fn start(&self) -> Result<()> {
        if !self.is_alive() {
            return Err(RpcError::InactiveConnection("start"));
        }

        let mut state = lock(&self.inner.read_state);
        match std::mem::replace(&mut *state, ReadState::Finished) {
            ReadState::Ready(reader) => {
                let task = tokio::spawn(read_loop::run(
                    self.inner.clone(),
                    reader,
                    self.inner.shutdown.subscribe(),
                ));
                *state = ReadState::Running(task);
                Ok(())
            }
            other => {
                *state = other;
                Err(RpcError::AlreadyStarted)
            }
        }
    }

    /// Send a request and return a future for its result.
    ///
    /// `args` is a tuple of arguments, each encoded independently in order.
    /// Returns as soon as the frame is queued; the result is collected with
    /// [`ResponseFuture::get_result`].
    ///
    /// ```ignore
    /// let future = conn.send_request("ADD", (5, 2)).await?;
    /// let sum: i64 = future.get_result().await?;
    /// ```
    pub async fn send_request<A: EncodeArgs>(&self, method: &str, args: A) -> Result<ResponseFuture> {
        let inner = &self.inner;
        if !self.is_alive() {
            return Err(RpcError::InactiveConnection("send request"));
        }

        let codec = inner.config.codec;
        let mut payload = Vec::new();
        args.encode_args(&codec, &mut payload)?;

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = OutboundFrame::encode(&Frame::request(method, id, payload))?;

        let (completer, future) = future::channel(id, codec);
        inner.pending.register(id, completer)?;

        if let Err(e) = inner.writer.send(frame).await {
            inner.pending.remove(id);
            return Err(e);
        }

        tracing::trace!(peer = %inner.peer, method, id, "request sent");
        Ok(future)
    }

    /// Send a one-way event.
    ///
    /// Delivery is not confirmed; if the connection drops the event is lost.
    pub async fn send_event<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> Result<()> {
        if !self.is_alive() {
            return Err(RpcError::InactiveConnection("send event"));
        }

        let payload = self.inner.config.codec.encode(data)?;
        self.inner
            .writer
            .send_frame(&Frame::event(name, payload))
            .await
    }

    /// Install the request handler, replacing any previous one.
    pub fn on_request<H: RequestHandler>(&self, handler: H) {
        self.inner.handlers.set_request(Arc::new(handler));
    }

    /// Install the event handler, replacing any previous one.
    pub fn on_event<H: EventHandler>(&self, handler: H) {
        self.inner.handlers.set_event(Arc::new(handler));
    }

    /// Close the connection.
    ///
    /// New sends are rejected at once. Frames already queued are still
    /// written, then the stream is shut down. Returns after the read loop has
    /// exited, except when called from a handler running on that loop, in
    /// which case the loop stops once the handler returns. Outstanding
    /// requests fail with [`RpcError::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// [`RpcError::InactiveConnection`] if the connection is already closed.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.alive.swap(false, Ordering::AcqRel) {
            return Err(RpcError::InactiveConnection("close"));
        }
        inner.shutdown.send_replace(true);

        let state = std::mem::replace(&mut *lock(&inner.read_state), ReadState::Finished);
        if let ReadState::Running(task) = state {
            if read_loop::is_current(inner) {
                tracing::debug!(peer = %inner.peer, "close called from the read loop");
            } else if let Err(e) = task.await {
                tracing::error!(peer = %inner.peer, error = %e, "read loop panicked");
            }
        }
        inner.pending.close_all();

        let writer_task = lock(&inner.writer_task).take();
        if let Some(task) = writer_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(peer = %inner.peer, error = %e, "writer stopped with error"),
                Err(e) => tracing::error!(peer = %inner.peer, error = %e, "writer task panicked"),
            }
        }

        tracing::info!(peer = %inner.peer, "connection closed");
        Ok(())
    }

    /// Wait until the connection has shut down, by [`close`](Self::close) or
    /// because the stream ended.
    pub async fn wait_for_shutdown(&self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        shutdown_signalled(&mut shutdown).await;
    }

    /// Whether the connection still accepts sends.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Peer address as reported by the transport.
    #[inline]
    pub fn peer_addr(&self) -> &str {
        &self.inner.peer
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Whether outbound frames are queued up to the backpressure limit.
    pub fn is_backpressure_active(&self) -> bool {
        self.inner.writer.is_backpressure_active()
    }

    /// Number of outbound frames queued but not yet written.
    pub fn pending_frames(&self) -> usize {
        self.inner.writer.pending_count()
    }

    /// Configuration this connection was built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.inner.peer)
            .field("alive", &self.is_alive())
            .field("pending", &self.pending_requests())
            .finish()
    }
}
