//! Consensus serialization.
//!
//! Every record that crosses the wire or the database carries an explicit
//! [`Encodable`]/[`Decodable`] pair: little-endian fixed-width integers,
//! compact-size varints for lengths, raw bytes for hashes. There is no
//! reflection; each composite type lists its fields in declared order.

use std::io::{self, Read, Write};

/// Maximum number of elements accepted when decoding a length-prefixed
/// collection. Caps allocation before the data is trusted.
pub const MAX_VEC_SIZE: usize = 4_000_000;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("non-minimal compact size encoding")]
    NonMinimalCompactSize,

    #[error("collection length {0} exceeds maximum {MAX_VEC_SIZE}")]
    OversizedCollection(u64),

    #[error("invalid utf-8 in encoded string")]
    InvalidString,

    #[error("parse failed: {0}")]
    ParseFailed(&'static str),

    #[error("data remaining after deserialization")]
    TrailingData,
}

/// Types that can write themselves in consensus format.
pub trait Encodable {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize>;
}

/// Types that can read themselves back from consensus format.
pub trait Decodable: Sized {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, Error>;
}

/// Serialize a value into a fresh byte vector.
pub fn serialize<T: Encodable>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    value
        .encode_to(&mut buf)
        .expect("in-memory writers do not fail");
    buf
}

/// Deserialize a value, requiring the input to be fully consumed.
pub fn deserialize<T: Decodable>(mut bytes: &[u8]) -> Result<T, Error> {
    let value = T::decode_from(&mut bytes)?;
    if !bytes.is_empty() {
        return Err(Error::TrailingData);
    }
    Ok(value)
}

/// Deserialize a value from the front of a slice, ignoring trailing bytes.
pub fn deserialize_partial<T: Decodable>(mut bytes: &[u8]) -> Result<T, Error> {
    T::decode_from(&mut bytes)
}

/// Number of bytes a value occupies when serialized.
pub fn serialized_size<T: Encodable>(value: &T) -> usize {
    serialize(value).len()
}

macro_rules! impl_int {
    ($ty:ty) => {
        impl Encodable for $ty {
            fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
                let bytes = self.to_le_bytes();
                w.write_all(&bytes)?;
                Ok(bytes.len())
            }
        }

        impl Decodable for $ty {
            fn decode_from<R: Read>(r: &mut R) -> Result<Self, Error> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                r.read_exact(&mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }
        }
    };
}

impl_int!(u8);
impl_int!(u16);
impl_int!(u32);
impl_int!(u64);
impl_int!(i8);
impl_int!(i32);
impl_int!(i64);

impl Encodable for bool {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        (*self as u8).encode_to(w)
    }
}

impl Decodable for bool {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        Ok(u8::decode_from(r)? != 0)
    }
}

/// Compact-size varint: the length prefix format shared by every
/// variable-length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactSize(pub u64);

impl Encodable for CompactSize {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        match self.0 {
            0..=0xfc => (self.0 as u8).encode_to(w),
            0xfd..=0xffff => {
                0xfdu8.encode_to(w)?;
                (self.0 as u16).encode_to(w)?;
                Ok(3)
            }
            0x1_0000..=0xffff_ffff => {
                0xfeu8.encode_to(w)?;
                (self.0 as u32).encode_to(w)?;
                Ok(5)
            }
            _ => {
                0xffu8.encode_to(w)?;
                self.0.encode_to(w)?;
                Ok(9)
            }
        }
    }
}

impl Decodable for CompactSize {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        let n = match u8::decode_from(r)? {
            0xfd => {
                let v = u16::decode_from(r)? as u64;
                if v < 0xfd {
                    return Err(Error::NonMinimalCompactSize);
                }
                v
            }
            0xfe => {
                let v = u32::decode_from(r)? as u64;
                if v <= 0xffff {
                    return Err(Error::NonMinimalCompactSize);
                }
                v
            }
            0xff => {
                let v = u64::decode_from(r)?;
                if v <= 0xffff_ffff {
                    return Err(Error::NonMinimalCompactSize);
                }
                v
            }
            b => b as u64,
        };
        Ok(CompactSize(n))
    }
}

impl Encodable for String {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = CompactSize(self.len() as u64).encode_to(w)?;
        w.write_all(self.as_bytes())?;
        len += self.len();
        Ok(len)
    }
}

impl Decodable for String {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        let bytes = Vec::<u8>::decode_from(r)?;
        String::from_utf8(bytes).map_err(|_| Error::InvalidString)
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = CompactSize(self.len() as u64).encode_to(w)?;
        for item in self {
            len += item.encode_to(w)?;
        }
        Ok(len)
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        let len = CompactSize::decode_from(r)?.0;
        if len as usize > MAX_VEC_SIZE {
            return Err(Error::OversizedCollection(len));
        }
        let mut out = Vec::with_capacity(std::cmp::min(len as usize, 1024));
        for _ in 0..len {
            out.push(T::decode_from(r)?);
        }
        Ok(out)
    }
}

impl<const N: usize> Encodable for [u8; N] {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        w.write_all(self)?;
        Ok(N)
    }
}

impl<const N: usize> Decodable for [u8; N] {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        let mut buf = [0u8; N];
        r.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl<A: Encodable, B: Encodable> Encodable for (A, B) {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        Ok(self.0.encode_to(w)? + self.1.encode_to(w)?)
    }
}

impl<A: Decodable, B: Decodable> Decodable for (A, B) {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        Ok((A::decode_from(r)?, B::decode_from(r)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_size_boundaries() {
        for n in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            let bytes = serialize(&CompactSize(n));
            let decoded: CompactSize = deserialize(&bytes).unwrap();
            assert_eq!(decoded.0, n);
        }
        assert_eq!(serialize(&CompactSize(0xfc)).len(), 1);
        assert_eq!(serialize(&CompactSize(0xfd)).len(), 3);
        assert_eq!(serialize(&CompactSize(0x1_0000)).len(), 5);
    }

    #[test]
    fn compact_size_rejects_non_minimal() {
        // 0xfd prefix carrying a value that fits a single byte.
        let bytes = [0xfdu8, 0x10, 0x00];
        assert!(matches!(
            deserialize::<CompactSize>(&bytes),
            Err(Error::NonMinimalCompactSize)
        ));
    }

    #[test]
    fn string_round_trip() {
        let s = "TOKEN/SUB#tag".to_string();
        let bytes = serialize(&s);
        assert_eq!(deserialize::<String>(&bytes).unwrap(), s);
    }

    #[test]
    fn trailing_data_rejected() {
        let mut bytes = serialize(&42u32);
        bytes.push(0);
        assert!(matches!(
            deserialize::<u32>(&bytes),
            Err(Error::TrailingData)
        ));
    }
}
