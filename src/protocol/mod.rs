//! Protocol module - frame envelope, stream framing and argument lists.
//!
//! This module implements the wire protocol:
//! - MsgPack frame envelope with omitted empty fields
//! - Frame buffer for splitting a byte stream into frames
//! - Positional argument encoding for request payloads

mod args;
mod frame;
mod frame_buffer;
mod scan;

pub use args::{ArgsDecoder, DecodeArgs, EncodeArgs};
pub use frame::{Frame, FrameType, UNKNOWN_ERROR};
pub use frame_buffer::{FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
pub use scan::value_len;
