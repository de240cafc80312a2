//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written as maps (`to_vec_named`) by default so peers written
//! against other MessagePack libraries can read them by field name. The
//! positional array form is available through [`MsgPackCodec::positional`].
//!
//! # Example
//!
//! ```
//! use rpcwire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Person {
//!     name: String,
//!     age: u32,
//! }
//!
//! let codec = MsgPackCodec::new();
//! let joe = Person { name: "joe".to_string(), age: 30 };
//! let encoded = codec.encode(&joe).unwrap();
//! let decoded: Person = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded, joe);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// MessagePack codec for frames and values.
///
/// This is a plain value: build one, put it in a
/// [`ConnectionConfig`](crate::ConnectionConfig), and every connection built
/// from that config uses it. There is no process-wide codec state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgPackCodec {
    struct_map: bool,
}

impl MsgPackCodec {
    /// Codec that writes structs as maps keyed by field name.
    pub const fn new() -> Self {
        Self { struct_map: true }
    }

    /// Codec that writes structs as positional arrays.
    ///
    /// Smaller on the wire, but both ends must agree on field order.
    pub const fn positional() -> Self {
        Self { struct_map: false }
    }

    /// Whether structs are written as maps.
    #[inline]
    pub fn struct_map(&self) -> bool {
        self.struct_map
    }

    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf, value)?;
        Ok(buf)
    }

    /// Append the encoding of `value` to `buf`.
    ///
    /// Used to concatenate independently encoded request arguments.
    pub fn encode_into<T: Serialize + ?Sized>(&self, buf: &mut Vec<u8>, value: &T) -> Result<()> {
        if self.struct_map {
            rmp_serde::encode::write_named(buf, value)?;
        } else {
            rmp_serde::encode::write(buf, value)?;
        }
        Ok(())
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// Both struct layouts are accepted regardless of `struct_map`.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl Default for MsgPackCodec {
    fn default() -> Self {
        Self::new()
    }
}
