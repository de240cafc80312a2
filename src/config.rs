//! Connection configuration.
//!
//! A [`ConnectionConfig`] is built once and handed to every [`Connection`]
//! and [`Server`]; each accepted connection gets its own clone.
//!
//! ```
//! use std::time::Duration;
//! use rpcwire::ConnectionConfig;
//! use rpcwire::codec::MsgPackCodec;
//!
//! let config = ConnectionConfig::new()
//!     .codec(MsgPackCodec::positional())
//!     .max_frame_size(1024 * 1024)
//!     .backpressure_timeout(Duration::from_secs(1));
//! assert_eq!(config.max_frame_size, 1024 * 1024);
//! ```
//!
//! [`Connection`]: crate::Connection
//! [`Server`]: crate::Server

use std::time::Duration;

use crate::codec::MsgPackCodec;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::writer::WriterConfig;

/// Default size of the read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Settings shared by every connection built from it.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Codec for arguments, results and event data.
    pub codec: MsgPackCodec,
    /// Writer task settings.
    pub writer: WriterConfig,
    /// Largest encoded frame accepted from the peer.
    pub max_frame_size: usize,
    /// Bytes requested from the stream per read.
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            codec: MsgPackCodec::new(),
            writer: WriterConfig::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value codec.
    pub fn codec(mut self, codec: MsgPackCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the writer task settings.
    pub fn writer(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }

    /// Set the largest accepted frame size.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set maximum pending outbound frames before backpressure.
    pub fn max_pending_frames(mut self, max: usize) -> Self {
        self.writer.max_pending_frames = max;
        self
    }

    /// Set channel capacity of the outbound queue.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer.channel_capacity = capacity.max(1);
        self
    }

    /// Set how long a sender waits for backpressure to clear.
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer.backpressure_timeout = timeout;
        self
    }

    /// Set how long queued frames may take to write once the connection
    /// shuts down. Frames still unwritten after that are dropped.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.writer.drain_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert!(config.codec.struct_map());
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.writer.max_pending_frames, 1024);
    }

    #[test]
    fn test_setters() {
        let config = ConnectionConfig::new()
            .codec(MsgPackCodec::positional())
            .read_buffer_size(0)
            .max_pending_frames(8)
            .channel_capacity(4)
            .backpressure_timeout(Duration::from_millis(50))
            .drain_timeout(Duration::from_millis(20));

        assert!(!config.codec.struct_map());
        assert_eq!(config.read_buffer_size, 1);
        assert_eq!(config.writer.max_pending_frames, 8);
        assert_eq!(config.writer.channel_capacity, 4);
        assert_eq!(config.writer.backpressure_timeout, Duration::from_millis(50));
        assert_eq!(config.writer.drain_timeout, Duration::from_millis(20));
    }
}
