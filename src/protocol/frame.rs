//! Frame envelope.
//!
//! Every frame is a single MsgPack map with one-letter keys. Empty fields are
//! left out entirely; only `t` is always written:
//!
//! ```text
//! { "t": 1|2|3,        frame type (request, response, event)
//!   "m": "ADD",        method or event name
//!   "i": 42,           correlation id
//!   "e": "boom",       error string (responses only)
//!   "p": <bin> }       payload
//! ```
//!
//! # Example
//!
//! ```
//! use rpcwire::protocol::{Frame, FrameType};
//!
//! let frame = Frame::request("ADD", 7, vec![0x05, 0x02]);
//! let bytes = frame.encode().unwrap();
//! let decoded = Frame::decode(&bytes).unwrap();
//!
//! assert_eq!(decoded.frame_type, FrameType::Request);
//! assert_eq!(decoded.id, 7);
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RpcError};

/// Error text sent when a request fails with an empty message.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Kind of a frame, written as a small integer under key `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FrameType {
    /// Call expecting a response with the same id.
    Request = 1,
    /// Result or error for an earlier request.
    Response = 2,
    /// One-way notification.
    Event = 3,
}

impl From<FrameType> for u8 {
    fn from(frame_type: FrameType) -> u8 {
        frame_type as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameType::Request),
            2 => Ok(FrameType::Response),
            3 => Ok(FrameType::Event),
            other => Err(format!("unknown frame type {}", other)),
        }
    }
}

fn is_zero(id: &u64) -> bool {
    *id == 0
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame kind; always present on the wire.
    #[serde(rename = "t")]
    pub frame_type: FrameType,
    /// Method name (requests) or event name (events).
    #[serde(rename = "m", default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Correlation id shared by a request and its response.
    #[serde(rename = "i", default, skip_serializing_if = "is_zero")]
    pub id: u64,
    /// Application error carried by a failed response.
    #[serde(rename = "e", default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Encoded arguments, result or event data.
    #[serde(
        rename = "p",
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "serde_bytes"
    )]
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a request frame.
    pub fn request(method: impl Into<String>, id: u64, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Request,
            method: method.into(),
            id,
            error: String::new(),
            payload,
        }
    }

    /// Build a successful response frame.
    pub fn response(id: u64, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Response,
            method: String::new(),
            id,
            error: String::new(),
            payload,
        }
    }

    /// Build a failed response frame. No result payload is carried.
    ///
    /// An empty `message` is replaced by [`UNKNOWN_ERROR`], since an empty
    /// error field is omitted on the wire and would read as a success.
    pub fn error_response(id: u64, message: impl Into<String>) -> Self {
        let mut error = message.into();
        if error.is_empty() {
            error = UNKNOWN_ERROR.to_string();
        }
        Self {
            frame_type: FrameType::Response,
            method: String::new(),
            id,
            error,
            payload: Vec::new(),
        }
    }

    /// Build an event frame.
    pub fn event(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Event,
            method: name.into(),
            id: 0,
            error: String::new(),
            payload,
        }
    }

    /// Whether this is a response carrying an application error.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.frame_type == FrameType::Response && !self.error.is_empty()
    }

    /// Take the payload out as `Bytes` without copying.
    #[inline]
    pub fn take_payload(&mut self) -> Bytes {
        Bytes::from(std::mem::take(&mut self.payload))
    }

    /// Encode the frame.
    ///
    /// The envelope is always a map regardless of the codec's struct layout,
    /// since omitted fields only make sense with keys.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode exactly one frame from `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| RpcError::Protocol(format!("invalid frame: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let frame = Frame::request("INTTEST", 99, vec![0x05, 0x02]);
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();

        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_empty_fields_omitted() {
        let frame = Frame::response(0, Vec::new());
        let bytes = frame.encode().unwrap();

        // { "t": 2 }
        assert_eq!(bytes, vec![0x81, 0xa1, b't', 0x02]);
    }

    #[test]
    fn test_event_has_no_id() {
        let frame = Frame::event("ARRIVED", vec![0xa3, b'j', b'o', b'e']);
        let bytes = frame.encode().unwrap();

        // t, m, p
        assert_eq!(bytes[0], 0x83);
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.id, 0);
        assert_eq!(decoded.method, "ARRIVED");
    }

    #[test]
    fn test_error_response_drops_payload() {
        let frame = Frame::error_response(3, "division by zero");
        assert!(frame.is_error());
        assert!(frame.payload.is_empty());

        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.error, "division by zero");
        assert!(decoded.is_error());
    }

    #[test]
    fn test_empty_error_message_replaced() {
        let frame = Frame::error_response(4, "");
        assert_eq!(frame.error, UNKNOWN_ERROR);

        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert!(decoded.is_error());
    }

    #[test]
    fn test_payload_is_binary() {
        let frame = Frame::event("x", vec![1, 2, 3]);
        let bytes = frame.encode().unwrap();

        // ... "p" followed by bin8 of length 3
        let tail = &bytes[bytes.len() - 7..];
        assert_eq!(tail, &[0xa1, b'p', 0xc4, 0x03, 1, 2, 3]);
    }

    #[test]
    fn test_missing_type_rejected() {
        // { "m": "x" }
        let bytes = [0x81, 0xa1, b'm', 0xa1, b'x'];
        assert!(matches!(Frame::decode(&bytes), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_unknown_type_rejected() {
        // { "t": 9 }
        let bytes = [0x81, 0xa1, b't', 0x09];
        assert!(matches!(Frame::decode(&bytes), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        // { "t": 3, "z": 1 }
        let bytes = [0x82, 0xa1, b't', 0x03, 0xa1, b'z', 0x01];
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.frame_type, FrameType::Event);
    }

    #[test]
    fn test_take_payload() {
        let mut frame = Frame::response(1, vec![0xc0]);
        let payload = frame.take_payload();

        assert_eq!(&payload[..], &[0xc0]);
        assert!(frame.payload.is_empty());
    }
}
