//! The connection's read loop.
//!
//! One task per connection reads the stream, splits it into frames and
//! dispatches each frame before reading the next. Responses resolve pending
//! futures; requests and events are handed to the installed handlers and
//! awaited in arrival order.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::sync::watch;

use super::{BoxReader, ConnInner};
use crate::error::Result;
use crate::handler::{Event, Request, Response};
use crate::protocol::{Frame, FrameBuffer, FrameType};
use crate::writer::shutdown_signalled;

/// Error sent back for requests arriving while no request handler is set.
pub const NO_REQUEST_HANDLER: &str = "no request handler installed";

tokio::task_local! {
    static READ_LOOP_OWNER: usize;
}

fn owner_key(inner: &Arc<ConnInner>) -> usize {
    Arc::as_ptr(inner) as usize
}

/// Whether the caller is running on `inner`'s own read loop.
pub(super) fn is_current(inner: &Arc<ConnInner>) -> bool {
    READ_LOOP_OWNER
        .try_with(|owner| *owner == owner_key(inner))
        .unwrap_or(false)
}

/// Runs the connection's teardown when the read loop ends, including by a
/// panicking handler unwinding the task.
struct Teardown<'a>(&'a ConnInner);

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(peer = %self.0.peer, "handler panicked, closing connection");
        }
        self.0.shut_down();
    }
}

/// Body of the read loop task.
///
/// However the loop ends, the connection is marked dead, every outstanding
/// request fails with `ConnectionClosed`, and the writer is told to stop.
pub(super) async fn run(
    inner: Arc<ConnInner>,
    mut reader: BoxReader,
    mut shutdown: watch::Receiver<bool>,
) {
    let _teardown = Teardown(&inner);
    tracing::debug!(peer = %inner.peer, "read loop started");

    let result = READ_LOOP_OWNER
        .scope(owner_key(&inner), serve(&inner, &mut reader, &mut shutdown))
        .await;

    match result {
        Ok(()) => tracing::debug!(peer = %inner.peer, "read loop finished"),
        Err(e) => tracing::error!(peer = %inner.peer, error = %e, "connection read failed"),
    }
}

async fn serve(
    inner: &ConnInner,
    reader: &mut BoxReader,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut frames = FrameBuffer::with_max_frame_size(inner.config.max_frame_size);
    let mut buf = vec![0u8; inner.config.read_buffer_size];

    loop {
        let n = tokio::select! {
            read = reader.read(&mut buf) => read?,
            _ = shutdown_signalled(shutdown) => return Ok(()),
        };

        if n == 0 {
            if !frames.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended inside a frame ({} bytes buffered)", frames.len()),
                )
                .into());
            }
            tracing::info!(peer = %inner.peer, "peer closed the connection");
            return Ok(());
        }

        for frame in frames.push(&buf[..n])? {
            if *shutdown.borrow() {
                return Ok(());
            }
            inner.dispatch(frame).await;
        }
    }
}

impl ConnInner {
    async fn dispatch(&self, mut frame: Frame) {
        tracing::trace!(
            peer = %self.peer,
            frame_type = ?frame.frame_type,
            method = %frame.method,
            id = frame.id,
            "frame received"
        );

        let codec = self.config.codec;
        match frame.frame_type {
            FrameType::Response => self.resolve(frame),
            FrameType::Request => {
                let payload = frame.take_payload();
                let response = Response::new(frame.id, self.writer.clone(), codec);
                let request = Request::new(frame.method, frame.id, payload, codec);
                self.handle_request(request, response).await;
            }
            FrameType::Event => {
                let payload = frame.take_payload();
                let event = Event::new(frame.method, payload, codec);
                self.handle_event(event).await;
            }
        }
    }

    fn resolve(&self, mut frame: Frame) {
        let Some(completer) = self.pending.take(frame.id) else {
            tracing::warn!(peer = %self.peer, id = frame.id, "response for unknown request, ignoring");
            return;
        };

        if frame.is_error() {
            completer.fail(frame.error);
        } else {
            completer.complete(frame.take_payload());
        }
    }

    async fn handle_request(&self, request: Request, response: Response) {
        let id = request.id();

        let Some(handler) = self.handlers.request() else {
            tracing::warn!(peer = %self.peer, method = request.method(), id, "no request handler installed");
            if let Err(e) = response.send_error(NO_REQUEST_HANDLER).await {
                tracing::debug!(id, error = %e, "could not answer request");
            }
            return;
        };

        let method = request.method().to_string();
        if let Err(e) = handler.call(request, response).await {
            tracing::error!(peer = %self.peer, method = %method, id, error = %e, "request handler failed");
        }
    }

    async fn handle_event(&self, event: Event) {
        match self.handlers.event() {
            Some(handler) => handler.call(event).await,
            None => {
                tracing::warn!(peer = %self.peer, event = event.name(), "no event handler installed, dropping event");
            }
        }
    }
}
