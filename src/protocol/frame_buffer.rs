//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` to collect socket reads. After each push the buffer
//! is scanned for complete frames; a frame that is still arriving stays
//! buffered until the rest of it shows up.
//!
//! # Example
//!
//! ```
//! use rpcwire::protocol::{Frame, FrameBuffer};
//!
//! let bytes = Frame::event("ARRIVED", vec![0xc0]).encode().unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[3..]).unwrap();
//!
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].method, "ARRIVED");
//! ```

use bytes::BytesMut;

use super::scan::value_len;
use super::Frame;
use crate::error::Result;

/// Default maximum encoded frame size (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Maximum allowed encoded frame size.
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 64MB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom max frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns the frames in stream order. If data is fragmented, the partial
    /// frame is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if the stream is not valid MsgPack, a frame exceeds
    /// `max_frame_size`, or a complete value is not a valid frame. Any error
    /// leaves the stream unusable.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();

        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match value_len(&self.buffer, self.max_frame_size)? {
            None => Ok(None),
            Some(len) => {
                let bytes = self.buffer.split_to(len);
                Frame::decode(&bytes).map(Some)
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
