//! Positional request arguments.
//!
//! A request payload is the concatenation of independently encoded arguments,
//! in declared order. Argument lists are tuples: the sender encodes a tuple
//! with [`EncodeArgs`], and the receiver names the tuple type it expects and
//! decodes it with [`DecodeArgs`]. No runtime type inspection is involved.
//!
//! # Example
//!
//! ```
//! use rpcwire::codec::MsgPackCodec;
//! use rpcwire::protocol::{ArgsDecoder, DecodeArgs, EncodeArgs};
//!
//! let codec = MsgPackCodec::new();
//! let mut payload = Vec::new();
//! (5i64, "two").encode_args(&codec, &mut payload).unwrap();
//!
//! let mut decoder = ArgsDecoder::new(&payload, codec);
//! let (a, b): (i64, String) = DecodeArgs::decode_args(&mut decoder).unwrap();
//! assert_eq!((a, b.as_str()), (5, "two"));
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::scan::value_len;
use crate::codec::MsgPackCodec;
use crate::error::{Result, RpcError};

/// A list of call arguments that can be written into a request payload.
pub trait EncodeArgs {
    /// Append each argument, independently encoded, to `buf`.
    fn encode_args(&self, codec: &MsgPackCodec, buf: &mut Vec<u8>) -> Result<()>;
}

/// A list of call arguments that can be read back from a request payload.
pub trait DecodeArgs: Sized {
    /// Decode the arguments in order. Trailing extra arguments are ignored.
    fn decode_args(decoder: &mut ArgsDecoder<'_>) -> Result<Self>;
}

/// Reads arguments one at a time from a request payload.
pub struct ArgsDecoder<'a> {
    remaining: &'a [u8],
    position: usize,
    codec: MsgPackCodec,
}

impl<'a> ArgsDecoder<'a> {
    /// Create a decoder over a request payload.
    pub fn new(payload: &'a [u8], codec: MsgPackCodec) -> Self {
        Self {
            remaining: payload,
            position: 0,
            codec,
        }
    }

    /// Decode the next argument.
    ///
    /// # Errors
    ///
    /// [`RpcError::MissingArgument`] once the payload is exhausted, a protocol
    /// error if the payload ends in the middle of a value, or a decode error
    /// if the value does not fit `T`.
    pub fn next<T: DeserializeOwned>(&mut self) -> Result<T> {
        if self.remaining.is_empty() {
            return Err(RpcError::MissingArgument(self.position));
        }

        let len = value_len(self.remaining, usize::MAX)?.ok_or_else(|| {
            RpcError::Protocol(format!("truncated argument at position {}", self.position))
        })?;
        let (head, tail) = self.remaining.split_at(len);
        let value = self.codec.decode(head)?;

        self.remaining = tail;
        self.position += 1;
        Ok(value)
    }

    /// Whether every argument has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Number of arguments decoded so far.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl EncodeArgs for () {
    fn encode_args(&self, _codec: &MsgPackCodec, _buf: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

impl DecodeArgs for () {
    fn decode_args(_decoder: &mut ArgsDecoder<'_>) -> Result<Self> {
        Ok(())
    }
}

impl<T: EncodeArgs + ?Sized> EncodeArgs for &T {
    fn encode_args(&self, codec: &MsgPackCodec, buf: &mut Vec<u8>) -> Result<()> {
        (**self).encode_args(codec, buf)
    }
}

macro_rules! impl_args {
    ($($idx:tt $name:ident),+) => {
        impl<$($name: Serialize),+> EncodeArgs for ($($name,)+) {
            fn encode_args(&self, codec: &MsgPackCodec, buf: &mut Vec<u8>) -> Result<()> {
                $(codec.encode_into(buf, &self.$idx)?;)+
                Ok(())
            }
        }

        impl<$($name: DeserializeOwned),+> DecodeArgs for ($($name,)+) {
            fn decode_args(decoder: &mut ArgsDecoder<'_>) -> Result<Self> {
                Ok(($(decoder.next::<$name>()?,)+))
            }
        }
    };
}

impl_args!(0 A);
impl_args!(0 A, 1 B);
impl_args!(0 A, 1 B, 2 C);
impl_args!(0 A, 1 B, 2 C, 3 D);
impl_args!(0 A, 1 B, 2 C, 3 D, 4 E);
impl_args!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_args!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_args!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);
