//! Binary encoding of message fields.
//!
//! Integers and enumerated bytes are written verbatim in little-endian order.
//! Byte buffers and strings carry a 4-byte length prefix, block arrays a
//! 4-byte element count followed by each element's own encoding. Records
//! are the concatenation of their fields in declaration order.
//!
//! [`WireFormat::encoded_len`] mirrors [`WireFormat::encode`] without writing,
//! so the header can be sized before the body buffer is allocated.

use bytes::{Buf, BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// A value with a binary wire representation.
pub trait WireFormat: Sized {
    /// Exact number of bytes [`WireFormat::encode`] writes.
    fn encoded_len(&self) -> usize;

    /// Append the encoding to `buf`.
    ///
    /// Lengths and counts are written as `u32`; callers keep buffers below
    /// 4 GiB (the framer caps bodies far below that).
    fn encode<B: BufMut>(&self, buf: &mut B);

    /// Decode from the front of `buf`, advancing it past the consumed bytes.
    fn decode(buf: &mut &[u8]) -> Result<Self>;

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        Bytes::from(out)
    }

    /// Decode a complete body. Trailing bytes are ignored.
    fn from_slice(mut bytes: &[u8]) -> Result<Self> {
        Self::decode(&mut bytes)
    }
}

fn ensure(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(ProtocolError::Truncated { needed, remaining: buf.len() });
    }
    Ok(())
}

impl WireFormat for u8 {
    fn encoded_len(&self) -> usize {
        1
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(*self);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        ensure(buf, 1)?;
        Ok(buf.get_u8())
    }
}

impl WireFormat for u32 {
    fn encoded_len(&self) -> usize {
        4
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(*self);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        ensure(buf, 4)?;
        Ok(buf.get_u32_le())
    }
}

impl WireFormat for u64 {
    fn encoded_len(&self) -> usize {
        8
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(*self);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        ensure(buf, 8)?;
        Ok(buf.get_u64_le())
    }
}

impl WireFormat for Bytes {
    fn encoded_len(&self) -> usize {
        4 + self.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.len() as u32);
        buf.put_slice(self);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let len = u32::decode(buf)? as usize;
        ensure(buf, len)?;
        let whole: &[u8] = *buf;
        let (head, tail) = whole.split_at(len);
        *buf = tail;
        Ok(Bytes::copy_from_slice(head))
    }
}

impl WireFormat for String {
    fn encoded_len(&self) -> usize {
        4 + self.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.len() as u32);
        buf.put_slice(self.as_bytes());
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let len = u32::decode(buf)? as usize;
        ensure(buf, len)?;
        let whole: &[u8] = *buf;
        let (head, tail) = whole.split_at(len);
        let value = std::str::from_utf8(head).map_err(|_| ProtocolError::InvalidUtf8)?;
        *buf = tail;
        Ok(value.to_owned())
    }
}

/// Block array: `u32` element count, then each element.
impl<T: WireFormat> WireFormat for Vec<T> {
    fn encoded_len(&self) -> usize {
        4 + self.iter().map(WireFormat::encoded_len).sum::<usize>()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.len() as u32);
        for item in self {
            item.encode(buf);
        }
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let count = u32::decode(buf)? as usize;
        // Every element takes at least one byte, so a count beyond the
        // remaining input is a lie and must not drive the allocation.
        let mut items = Vec::with_capacity(count.min(buf.len()));
        for _ in 0..count {
            items.push(T::decode(buf)?);
        }
        Ok(items)
    }
}

/// Declare a record whose encoding is its fields in order.
macro_rules! wire_record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty ),*
        }

        impl $crate::codec::WireFormat for $name {
            fn encoded_len(&self) -> usize {
                0 $( + $crate::codec::WireFormat::encoded_len(&self.$field) )*
            }

            #[allow(unused_variables)]
            fn encode<B: ::bytes::BufMut>(&self, buf: &mut B) {
                $( $crate::codec::WireFormat::encode(&self.$field, buf); )*
            }

            #[allow(unused_variables)]
            fn decode(buf: &mut &[u8]) -> $crate::errors::Result<Self> {
                Ok(Self { $( $field: <$ty as $crate::codec::WireFormat>::decode(buf)? ),* })
            }
        }
    };
}

/// Declare a one-byte enumeration with named wire values.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident as $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value ),*
        }

        impl $name {
            /// Wire byte for this value.
            #[must_use]
            pub fn to_u8(self) -> u8 {
                self as u8
            }

            /// Parse a wire byte.
            #[must_use]
            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $( $value => Some(Self::$variant), )*
                    _ => None,
                }
            }
        }

        impl $crate::codec::WireFormat for $name {
            fn encoded_len(&self) -> usize {
                1
            }

            fn encode<B: ::bytes::BufMut>(&self, buf: &mut B) {
                buf.put_u8(self.to_u8());
            }

            fn decode(buf: &mut &[u8]) -> $crate::errors::Result<Self> {
                let value = <u8 as $crate::codec::WireFormat>::decode(buf)?;
                Self::from_u8(value)
                    .ok_or($crate::errors::ProtocolError::InvalidEnum { field: $field, value })
            }
        }
    };
}

pub(crate) use wire_enum;
pub(crate) use wire_record;

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn integers_are_little_endian() {
        let mut out = Vec::new();
        0x0102_0304u32.encode(&mut out);
        0x0a0b_0c0d_0e0f_1011u64.encode(&mut out);
        assert_eq!(out, hex!("04030201 11100f0e0d0c0b0a"));
    }

    #[test]
    fn buffers_carry_length_prefix() {
        let mut out = Vec::new();
        Bytes::from_static(b"ab").encode(&mut out);
        String::from("/x").encode(&mut out);
        assert_eq!(out, hex!("02000000 6162 02000000 2f78"));
    }

    #[test]
    fn block_array_carries_count_prefix() {
        let items: Vec<u32> = vec![1, 2];
        let bytes = items.to_bytes();
        assert_eq!(&bytes[..], hex!("02000000 01000000 02000000"));
        assert_eq!(items.encoded_len(), bytes.len());
    }

    #[test]
    fn truncated_integer() {
        let result = u32::from_slice(&[1, 2, 3]);
        assert_eq!(result, Err(ProtocolError::Truncated { needed: 4, remaining: 3 }));
    }

    #[test]
    fn length_prefix_beyond_input() {
        let result = Bytes::from_slice(&hex!("05000000 0102"));
        assert_eq!(result, Err(ProtocolError::Truncated { needed: 5, remaining: 2 }));
    }

    #[test]
    fn huge_count_does_not_allocate() {
        let result = Vec::<u64>::from_slice(&hex!("ffffffff 01"));
        assert_eq!(result, Err(ProtocolError::Truncated { needed: 8, remaining: 1 }));
    }

    #[test]
    fn invalid_utf8() {
        let result = String::from_slice(&hex!("02000000 c328"));
        assert_eq!(result, Err(ProtocolError::InvalidUtf8));
    }

    #[test]
    fn decode_advances_past_consumed_bytes() {
        let input = hex!("01000000 ff 0200");
        let mut buf = &input[..];
        let value = Bytes::decode(&mut buf).unwrap();
        assert_eq!(&value[..], [0xff]);
        assert_eq!(buf, [0x02, 0x00]);
    }

    proptest! {
        #[test]
        fn decode_never_panics(input in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = Vec::<String>::from_slice(&input);
            let _ = Vec::<Bytes>::from_slice(&input);
        }

        #[test]
        fn encoded_len_matches_encoding(items in proptest::collection::vec(".{0,16}", 0..8)) {
            let bytes = items.to_bytes();
            prop_assert_eq!(bytes.len(), items.encoded_len());
            prop_assert_eq!(Vec::<String>::from_slice(&bytes).unwrap(), items);
        }
    }
}
