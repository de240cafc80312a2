//! Codec module - serialization/deserialization for frames and payloads.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde`
//!
//! Every value on the wire (the frame envelope, each request argument, each
//! result and each event body) is an independent, self-describing MsgPack
//! value, so no schema has to be shared between peers.
//!
//! # Example
//!
//! ```
//! use rpcwire::codec::MsgPackCodec;
//!
//! let codec = MsgPackCodec::default();
//! let encoded = codec.encode(&"hello").unwrap();
//! let decoded: String = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
