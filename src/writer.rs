//! Dedicated writer task for a connection's outbound frames.
//!
//! Every sender (requests, events, responses from handlers) encodes its frame
//! into one complete buffer and hands it to a single writer task over an mpsc
//! channel. Only that task touches the write half of the stream, so frames
//! never interleave.
//!
//! # Architecture
//!
//! ```text
//! send_request ─┐
//! send_event   ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Stream
//! Response     ─┘
//! ```
//!
//! Frames that are ready together are written with one vectored write and a
//! single flush. The task flushes before it waits for more work, so nothing is
//! left sitting in a buffer.
//!
//! On shutdown the task writes what is already queued, but gives up after the
//! drain timeout so a peer that stopped reading cannot hold `close` forever.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};
use crate::protocol::Frame;

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for queued frames to be written once shutdown starts.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A fully encoded frame ready to be written.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    bytes: Bytes,
}

impl OutboundFrame {
    /// Encode a frame for sending.
    pub fn encode(frame: &Frame) -> Result<Self> {
        Ok(Self {
            bytes: Bytes::from(frame.encode()?),
        })
    }

    /// Encoded size of this frame.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
    /// How long writes may still take after shutdown is signalled.
    pub drain_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable; every [`Response`](crate::handler::Response)
/// carries one.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::Sender<OutboundFrame>,
    /// Pending frame count (for backpressure).
    pending: Arc<AtomicUsize>,
    /// Maximum pending frames.
    max_pending: usize,
    /// Backpressure timeout.
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Send a frame to the writer task.
    ///
    /// Waits while backpressure is active, timing out after the configured
    /// duration. Fails with [`RpcError::ConnectionClosed`] once the writer
    /// task has stopped.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        let current = self.pending.load(Ordering::Acquire);
        if current >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        // Increment pending count BEFORE sending
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            RpcError::ConnectionClosed
        })
    }

    /// Encode and send a frame.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send(OutboundFrame::encode(frame)?).await
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(RpcError::BackpressureTimeout);
            }

            if self.tx.is_closed() {
                return Err(RpcError::ConnectionClosed);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Try to send a frame without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity. Usable
    /// from synchronous code such as `Drop`.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        let current = self.pending.load(Ordering::Acquire);
        if current >= self.max_pending {
            return Err(RpcError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => RpcError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => RpcError::ConnectionClosed,
            }
        })
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends when every handle is dropped, when a write fails, or when
/// `shutdown` turns `true`. On shutdown it writes whatever is already queued,
/// within the drain timeout, then shuts the stream's write side down.
///
/// `on_failure` runs if a write fails before shutdown was signalled.
pub fn spawn_writer_task<W, F>(
    writer: W,
    config: &WriterConfig,
    shutdown: watch::Receiver<bool>,
    on_failure: F,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
    F: FnOnce(&RpcError) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(writer_loop(
        rx,
        writer,
        pending,
        shutdown,
        config.drain_timeout,
        on_failure,
    ));

    (handle, task)
}

async fn writer_loop<W, F>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
    drain_timeout: Duration,
    on_failure: F,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    F: FnOnce(&RpcError),
{
    let result = run_writer(&mut rx, &mut writer, &pending, &mut shutdown, drain_timeout).await;
    rx.close();

    if let Err(e) = &result {
        if !*shutdown.borrow() {
            on_failure(e);
        }
    }

    let _ = tokio::time::timeout(drain_timeout, writer.shutdown()).await;
    result
}

async fn run_writer<W>(
    rx: &mut mpsc::Receiver<OutboundFrame>,
    writer: &mut W,
    pending: &AtomicUsize,
    shutdown: &mut watch::Receiver<bool>,
    drain_timeout: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            frame = rx.recv() => match frame {
                Some(f) => f,
                // Every handle dropped
                None => return Ok(()),
            },
            _ = shutdown_signalled(shutdown) => {
                let mut batch = Vec::new();
                while let Ok(frame) = rx.try_recv() {
                    batch.push(frame);
                }
                let batch_size = batch.len();
                let result = tokio::time::timeout(drain_timeout, write_batch(writer, &batch))
                    .await
                    .unwrap_or_else(|_| Err(stalled_write()));
                pending.fetch_sub(batch_size, Ordering::Release);
                return result;
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let result = tokio::select! {
            result = write_batch(writer, &batch) => result,
            _ = drain_expired(shutdown, drain_timeout) => Err(stalled_write()),
        };
        pending.fetch_sub(batch_size, Ordering::Release);
        result?;
    }
}

/// Resolves `drain_timeout` after shutdown is signalled.
async fn drain_expired(shutdown: &mut watch::Receiver<bool>, drain_timeout: Duration) {
    shutdown_signalled(shutdown).await;
    tokio::time::sleep(drain_timeout).await;
}

fn stalled_write() -> RpcError {
    RpcError::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        "peer stopped reading, unwritten frames dropped",
    ))
}

/// Resolves once `shutdown` turns `true` or its sender is gone.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// Write a batch of frames with vectored writes, then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut frame_start = 0;

    for frame in batch {
        let frame_end = frame_start + frame.size();
        if skip_bytes < frame_end {
            let offset = skip_bytes.saturating_sub(frame_start);
            slices.push(IoSlice::new(&frame.bytes[offset..]));
        }
        frame_start = frame_end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncReadExt};
    use tokio::sync::oneshot;

    /// Writer whose every write fails.
    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn event(n: u32) -> OutboundFrame {
        OutboundFrame::encode(&Frame::event("tick", n.to_be_bytes().to_vec())).unwrap()
    }

    fn spawn_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>, watch::Sender<bool>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) =
            spawn_writer_task(writer, &WriterConfig::default(), shutdown_rx, |_: &RpcError| {});
        (handle, task, shutdown_tx)
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
        assert_eq!(config.drain_timeout, DEFAULT_DRAIN_TIMEOUT);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task, _shutdown) = spawn_default(client);

        let frame = event(7);
        let size = frame.size();
        handle.send(frame).await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(n, size);

        let frames = FrameBuffer::new().push(&buf[..n]).unwrap();
        assert_eq!(frames[0].payload, 7u32.to_be_bytes().to_vec());
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _task, shutdown) = spawn_default(client);

        for i in 0..100u32 {
            handle.send(event(i)).await.unwrap();
        }
        shutdown.send_replace(true);

        let mut data = Vec::new();
        server.read_to_end(&mut data).await.unwrap();

        let frames = FrameBuffer::new().push(&data).unwrap();
        assert_eq!(frames.len(), 100);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.payload, (i as u32).to_be_bytes().to_vec());
        }
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(AtomicUsize::new(100));

        let handle = WriterHandle::new(tx, pending, 100, Duration::from_secs(1));

        let result = handle.try_send(event(1));
        assert!(matches!(result, Err(RpcError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_send_after_writer_stopped() {
        let (client, _server) = duplex(4096);
        let (handle, task, shutdown) = spawn_default(client);

        shutdown.send_replace(true);
        task.await.unwrap().unwrap();

        let result = handle.send(event(1)).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_stream() {
        let (client, mut server) = duplex(4096);
        let (_handle, task, shutdown) = spawn_default(client);

        shutdown.send_replace(true);
        task.await.unwrap().unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_on_stalled_peer() {
        // The far end is kept open but never read
        let (client, _server) = duplex(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = WriterConfig {
            drain_timeout: Duration::from_millis(50),
            ..WriterConfig::default()
        };
        let (handle, task) = spawn_writer_task(client, &config, shutdown_rx, |_: &RpcError| {});

        for _ in 0..4 {
            let frame = OutboundFrame::encode(&Frame::event("fill", vec![0u8; 256])).unwrap();
            handle.send(frame).await.unwrap();
        }
        shutdown_tx.send_replace(true);

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("writer still blocked after shutdown")
            .unwrap();
        assert!(matches!(result, Err(RpcError::Io(e)) if e.kind() == std::io::ErrorKind::TimedOut));
    }

    #[tokio::test]
    async fn test_write_failure_reported() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (failed_tx, failed_rx) = oneshot::channel();
        let (handle, task) = spawn_writer_task(
            BrokenWriter,
            &WriterConfig::default(),
            shutdown_rx,
            move |e: &RpcError| {
                let _ = failed_tx.send(e.to_string());
            },
        );

        handle.send(event(1)).await.unwrap();

        assert!(task.await.unwrap().is_err());
        assert!(failed_rx.await.unwrap().contains("pipe"));
        drop(shutdown_tx);
    }

    #[tokio::test]
    async fn test_failure_after_shutdown_not_reported() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (failed_tx, failed_rx) = oneshot::channel::<()>();
        let (handle, task) = spawn_writer_task(
            BrokenWriter,
            &WriterConfig::default(),
            shutdown_rx,
            move |_: &RpcError| {
                let _ = failed_tx.send(());
            },
        );

        shutdown_tx.send_replace(true);
        let _ = handle.try_send(event(1));

        let _ = task.await.unwrap();
        // Callback dropped without running
        assert!(failed_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task, _shutdown) = spawn_default(client);

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_build_remaining_slices() {
        let batch = vec![
            OutboundFrame {
                bytes: Bytes::from_static(b"hello"),
            },
            OutboundFrame {
                bytes: Bytes::from_static(b"world!"),
            },
        ];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);

        let slices = build_remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b"lo");

        let slices = build_remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"world!");

        let slices = build_remaining_slices(&batch, 11);
        assert!(slices.is_empty());
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());

        let batch: Vec<_> = (0..5).map(event).collect();
        let expected: usize = batch.iter().map(OutboundFrame::size).sum();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), expected);
    }
}
