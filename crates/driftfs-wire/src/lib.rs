//! Byte-level wire encoding for DriftFS messages.
//!
//! Everything on the wire is little-endian. Variable-length values (strings,
//! byte buffers, sequences, maps) carry a `u32` count prefix; options carry a
//! one-byte presence tag. Maps are encoded with their keys sorted so that a
//! given value always produces the same bytes.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("truncated input: need {need} more bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("{0} unconsumed bytes after decoding")]
    TrailingBytes(usize),
    #[error("invalid variant {value} for {type_name}")]
    InvalidVariant {
        type_name: &'static str,
        value: u64,
    },
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Serialize a value into the DriftFS wire format.
pub trait WireEncode {
    fn encode(&self, buf: &mut Vec<u8>);
}

/// Deserialize a value from the DriftFS wire format, advancing `pos`.
pub trait WireDecode: Sized {
    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, WireError>;
}

/// Encode a value into a fresh buffer.
pub fn to_bytes<T: WireEncode>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode(&mut buf);
    buf
}

/// Decode a value from a buffer, requiring that every byte is consumed.
pub fn from_bytes<T: WireDecode>(buf: &[u8]) -> Result<T, WireError> {
    let mut pos = 0;
    let value = T::decode(buf, &mut pos)?;
    if pos != buf.len() {
        return Err(WireError::TrailingBytes(buf.len() - pos));
    }
    Ok(value)
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], WireError> {
    let have = buf.len().saturating_sub(*pos);
    if have < n {
        return Err(WireError::Truncated { need: n - have, have });
    }
    let slice = &buf[*pos..*pos + n];
    *pos += n;
    Ok(slice)
}

// ---------------------------------------------------------------------------
// Integers and bool
// ---------------------------------------------------------------------------

macro_rules! impl_wire_int {
    ($ty:ty, $size:expr, $read:ident, $write:ident) => {
        impl WireEncode for $ty {
            fn encode(&self, buf: &mut Vec<u8>) {
                let mut tmp = [0u8; $size];
                LittleEndian::$write(&mut tmp, *self);
                buf.extend_from_slice(&tmp);
            }
        }

        impl WireDecode for $ty {
            fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, WireError> {
                Ok(LittleEndian::$read(take(buf, pos, $size)?))
            }
        }
    };
}

impl_wire_int!(u16, 2, read_u16, write_u16);
impl_wire_int!(u32, 4, read_u32, write_u32);
impl_wire_int!(u64, 8, read_u64, write_u64);
impl_wire_int!(i32, 4, read_i32, write_i32);
impl_wire_int!(i64, 8, read_i64, write_i64);

impl WireEncode for u8 {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(*self);
    }
}

impl WireDecode for u8 {
    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, WireError> {
        Ok(take(buf, pos, 1)?[0])
    }
}

impl WireEncode for bool {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(u8::from(*self));
    }
}

impl WireDecode for bool {
    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, WireError> {
        Ok(u8::decode(buf, pos)? != 0)
    }
}

// ---------------------------------------------------------------------------
// Strings and byte buffers
// ---------------------------------------------------------------------------

impl WireEncode for String {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).encode(buf);
        buf.extend_from_slice(self.as_bytes());
    }
}

impl WireDecode for String {
    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, WireError> {
        let len = u32::decode(buf, pos)? as usize;
        let bytes = take(buf, pos, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

// Vec<u8> is raw data, not an element sequence; keeping a dedicated impl
// avoids per-byte dispatch on chunk payloads.
impl WireEncode for Vec<u8> {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).encode(buf);
        buf.extend_from_slice(self);
    }
}

impl WireDecode for Vec<u8> {
    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, WireError> {
        let len = u32::decode(buf, pos)? as usize;
        Ok(take(buf, pos, len)?.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Sequences, options, maps
// ---------------------------------------------------------------------------

// `Vec<u8>` above is a dedicated raw-bytes impl, so the blanket `Vec<T>`
// impls below are gated on a marker trait rather than applying to every
// `T: WireEncode + WireDecode` — that keeps them from overlapping with the
// `Vec<u8>` impl (u8 never implements the marker) while still letting
// downstream crates opt a locally-defined type into sequence support
// without running afoul of the orphan rules (implementing a foreign trait
// for `Vec<ForeignType>` is disallowed; implementing a local marker trait
// for a local type is not).
pub trait WireSeqElem: WireEncode + WireDecode {}

impl<T: WireSeqElem> WireEncode for Vec<T> {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).encode(buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: WireSeqElem> WireDecode for Vec<T> {
    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, WireError> {
        let len = u32::decode(buf, pos)? as usize;
        let mut out = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            out.push(T::decode(buf, pos)?);
        }
        Ok(out)
    }
}

impl WireSeqElem for String {}

/// Opt a message type defined downstream into `Vec<T>` encoding.
#[macro_export]
macro_rules! wire_seq {
    ($elem:ty) => {
        impl $crate::WireSeqElem for $elem {}
    };
}

impl<T: WireEncode> WireEncode for Option<T> {
    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            None => buf.push(0),
            Some(value) => {
                buf.push(1);
                value.encode(buf);
            }
        }
    }
}

impl<T: WireDecode> WireDecode for Option<T> {
    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, WireError> {
        match u8::decode(buf, pos)? {
            0 => Ok(None),
            _ => Ok(Some(T::decode(buf, pos)?)),
        }
    }
}

impl<V: WireEncode> WireEncode for HashMap<String, V> {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).encode(buf);
        let mut keys: Vec<&String> = self.keys().collect();
        keys.sort();
        for key in keys {
            key.encode(buf);
            self[key].encode(buf);
        }
    }
}

impl<V: WireDecode> WireDecode for HashMap<String, V> {
    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, WireError> {
        let len = u32::decode(buf, pos)? as usize;
        let mut out = HashMap::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = String::decode(buf, pos)?;
            let value = V::decode(buf, pos)?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: WireEncode + WireDecode + std::fmt::Debug + PartialEq>(value: &T) -> T {
        let buf = to_bytes(value);
        from_bytes(&buf).unwrap()
    }

    #[test]
    fn test_ints() {
        assert_eq!(roundtrip(&0u8), 0);
        assert_eq!(roundtrip(&0xABu8), 0xAB);
        assert_eq!(roundtrip(&0x1234u16), 0x1234);
        assert_eq!(roundtrip(&0xDEADBEEFu32), 0xDEADBEEF);
        assert_eq!(roundtrip(&u64::MAX), u64::MAX);
        assert_eq!(roundtrip(&-7i32), -7);
        assert_eq!(roundtrip(&i64::MIN), i64::MIN);
    }

    #[test]
    fn test_little_endian_layout() {
        assert_eq!(to_bytes(&0x04030201u32), vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_bool() {
        assert!(roundtrip(&true));
        assert!(!roundtrip(&false));
    }

    #[test]
    fn test_string() {
        assert_eq!(roundtrip(&String::new()), "");
        assert_eq!(roundtrip(&"hello world".to_string()), "hello world");
        assert_eq!(roundtrip(&"\u{1F600} emoji".to_string()), "\u{1F600} emoji");
    }

    #[test]
    fn test_bytes() {
        assert_eq!(roundtrip(&Vec::<u8>::new()), Vec::<u8>::new());
        assert_eq!(roundtrip(&vec![1u8, 2, 3]), vec![1u8, 2, 3]);
        // Raw layout: u32 length prefix then the bytes themselves.
        assert_eq!(to_bytes(&vec![9u8, 8]), vec![2, 0, 0, 0, 9, 8]);
    }

    #[test]
    fn test_string_seq() {
        let v = vec!["a".to_string(), "bb".to_string()];
        assert_eq!(roundtrip(&v), v);
    }

    #[test]
    fn test_option() {
        assert_eq!(roundtrip(&None::<u32>), None);
        assert_eq!(roundtrip(&Some(17u32)), Some(17));
        assert_eq!(roundtrip(&Some("x".to_string())), Some("x".to_string()));
    }

    #[test]
    fn test_map() {
        let mut m = HashMap::new();
        m.insert("b".to_string(), 2u32);
        m.insert("a".to_string(), 1u32);
        assert_eq!(roundtrip(&m), m);
    }

    #[test]
    fn test_map_encoding_is_key_sorted() {
        let mut m = HashMap::new();
        m.insert("z".to_string(), 1u8);
        m.insert("a".to_string(), 2u8);
        let bytes = to_bytes(&m);
        let a_pos = bytes.iter().position(|&b| b == b'a').unwrap();
        let z_pos = bytes.iter().position(|&b| b == b'z').unwrap();
        assert!(a_pos < z_pos);
    }

    #[test]
    fn test_truncated() {
        let result = from_bytes::<u32>(&[1, 2]);
        assert!(matches!(
            result,
            Err(WireError::Truncated { need: 2, have: 2 })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut buf = to_bytes(&5u16);
        buf.push(0);
        assert!(from_bytes::<u16>(&buf).is_err());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut buf = to_bytes(&2u32);
        buf.extend_from_slice(&[0xFF, 0xFE]);
        assert!(matches!(
            from_bytes::<String>(&buf),
            Err(WireError::InvalidUtf8)
        ));
    }
}
