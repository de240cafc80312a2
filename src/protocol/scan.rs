//! MsgPack value boundary scanning.
//!
//! MsgPack values are self-delimiting, so a stream of frames needs no length
//! prefix. To find where one value ends the scanner walks markers and length
//! fields without decoding or allocating anything. Nested containers are
//! handled with a counter of values still owed, not recursion.

use rmp::Marker;

use crate::error::{Result, RpcError};

/// How a marker is followed on the wire.
enum Shape {
    /// A fixed number of data bytes.
    Fixed(usize),
    /// A big-endian length field of the given width, then that many bytes.
    Sized(usize),
    /// Like `Sized`, plus one extension type byte.
    Ext(usize),
    /// A fixed number of nested values.
    Items(u64),
    /// A big-endian count field, then `count * per_item` nested values.
    SizedItems { width: usize, per_item: u64 },
}

fn shape(byte: u8) -> Result<Shape> {
    let shape = match Marker::from_u8(byte) {
        Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {
            Shape::Fixed(0)
        }
        Marker::U8 | Marker::I8 => Shape::Fixed(1),
        Marker::U16 | Marker::I16 => Shape::Fixed(2),
        Marker::U32 | Marker::I32 | Marker::F32 => Shape::Fixed(4),
        Marker::U64 | Marker::I64 | Marker::F64 => Shape::Fixed(8),
        Marker::FixStr(len) => Shape::Fixed(len as usize),
        Marker::Str8 | Marker::Bin8 => Shape::Sized(1),
        Marker::Str16 | Marker::Bin16 => Shape::Sized(2),
        Marker::Str32 | Marker::Bin32 => Shape::Sized(4),
        Marker::FixExt1 => Shape::Fixed(2),
        Marker::FixExt2 => Shape::Fixed(3),
        Marker::FixExt4 => Shape::Fixed(5),
        Marker::FixExt8 => Shape::Fixed(9),
        Marker::FixExt16 => Shape::Fixed(17),
        Marker::Ext8 => Shape::Ext(1),
        Marker::Ext16 => Shape::Ext(2),
        Marker::Ext32 => Shape::Ext(4),
        Marker::FixArray(len) => Shape::Items(len as u64),
        Marker::Array16 => Shape::SizedItems {
            width: 2,
            per_item: 1,
        },
        Marker::Array32 => Shape::SizedItems {
            width: 4,
            per_item: 1,
        },
        Marker::FixMap(len) => Shape::Items(2 * len as u64),
        Marker::Map16 => Shape::SizedItems {
            width: 2,
            per_item: 2,
        },
        Marker::Map32 => Shape::SizedItems {
            width: 4,
            per_item: 2,
        },
        Marker::Reserved => {
            return Err(RpcError::Protocol(format!(
                "invalid msgpack marker 0x{:02x}",
                byte
            )))
        }
    };
    Ok(shape)
}

fn read_be(buf: &[u8], pos: usize, width: usize) -> Option<u64> {
    let field = buf.get(pos..pos + width)?;
    Some(field.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Length in bytes of the first complete MsgPack value in `buf`.
///
/// Returns `Ok(None)` when `buf` holds only a prefix of a value, and an error
/// when the value is invalid or provably longer than `max_len`.
pub fn value_len(buf: &[u8], max_len: usize) -> Result<Option<usize>> {
    let mut pos = 0usize;
    let mut owed: u64 = 1;

    while owed > 0 {
        let Some(&byte) = buf.get(pos) else {
            return Ok(None);
        };
        pos += 1;
        owed -= 1;

        let skip = match shape(byte)? {
            Shape::Fixed(n) => n as u64,
            Shape::Sized(width) => {
                let Some(len) = read_be(buf, pos, width) else {
                    return Ok(None);
                };
                pos += width;
                len
            }
            Shape::Ext(width) => {
                let Some(len) = read_be(buf, pos, width) else {
                    return Ok(None);
                };
                pos += width;
                len + 1
            }
            Shape::Items(n) => {
                owed += n;
                0
            }
            Shape::SizedItems { width, per_item } => {
                let Some(count) = read_be(buf, pos, width) else {
                    return Ok(None);
                };
                pos += width;
                owed += count * per_item;
                0
            }
        };

        let end = (pos as u64).saturating_add(skip);
        // Every owed value takes at least one more byte.
        if end.saturating_add(owed) > max_len as u64 {
            return Err(RpcError::Protocol(format!(
                "msgpack value exceeds maximum size of {} bytes",
                max_len
            )));
        }
        pos = end as usize;
        if pos > buf.len() {
            return Ok(None);
        }
    }

    Ok(Some(pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;
    use std::collections::HashMap;

    fn encoded<T: serde::Serialize>(value: &T) -> Vec<u8> {
        MsgPackCodec::new().encode(value).unwrap()
    }

    #[test]
    fn test_scalars() {
        for bytes in [
            encoded(&1u8),
            encoded(&-1i8),
            encoded(&300u16),
            encoded(&-70000i32),
            encoded(&u64::MAX),
            encoded(&1.5f64),
            encoded(&()),
            encoded(&true),
        ] {
            assert_eq!(value_len(&bytes, usize::MAX).unwrap(), Some(bytes.len()));
        }
    }

    #[test]
    fn test_nested_containers() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), vec![vec![1u32, 2], vec![]]);
        map.insert("b".to_string(), vec![vec![70000u32]]);
        let bytes = encoded(&map);

        assert_eq!(value_len(&bytes, usize::MAX).unwrap(), Some(bytes.len()));
    }

    #[test]
    fn test_long_string_and_bin() {
        let s = "x".repeat(70_000);
        let bytes = encoded(&s);
        assert_eq!(value_len(&bytes, usize::MAX).unwrap(), Some(bytes.len()));

        let bin = encoded(&serde_bytes::ByteBuf::from(vec![7u8; 300]));
        assert_eq!(bin[0], 0xc5);
        assert_eq!(value_len(&bin, usize::MAX).unwrap(), Some(bin.len()));
    }

    #[test]
    fn test_stops_at_first_value() {
        let mut bytes = encoded(&"first");
        let first = bytes.len();
        bytes.extend(encoded(&"second"));

        assert_eq!(value_len(&bytes, usize::MAX).unwrap(), Some(first));
    }

    #[test]
    fn test_every_prefix_is_incomplete() {
        let bytes = encoded(&(1u32, "two".to_string(), vec![3.0f64; 4]));
        for cut in 0..bytes.len() {
            assert_eq!(value_len(&bytes[..cut], usize::MAX).unwrap(), None, "cut {}", cut);
        }
    }

    #[test]
    fn test_ext_values() {
        // fixext1: marker, type, 1 data byte
        assert_eq!(value_len(&[0xd4, 0x01, 0xff], usize::MAX).unwrap(), Some(3));
        // ext8 with 2 data bytes: marker, len, type, data
        assert_eq!(
            value_len(&[0xc7, 0x02, 0x05, 0xaa, 0xbb], usize::MAX).unwrap(),
            Some(5)
        );
    }

    #[test]
    fn test_reserved_marker() {
        assert!(matches!(value_len(&[0xc1], usize::MAX), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_oversized_declared_length() {
        // bin32 claiming 1 GiB
        let bytes = [0xc6, 0x40, 0x00, 0x00, 0x00];
        assert!(matches!(value_len(&bytes, 1024), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_oversized_declared_count() {
        // array32 claiming 4 billion elements
        let bytes = [0xdd, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(value_len(&bytes, 1 << 20), Err(RpcError::Protocol(_))));
    }
}
