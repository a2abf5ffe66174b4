// subrav-codec: canonical binary encoding and validation for SubRAV receipts.
//
// To the extent possible under law, the payment-kit contributors have
// dedicated all copyright and related and neighboring rights to this
// software to the public domain worldwide.

//! The canonical encoding used to sign and persist SubRAVs.
//!
//! This mirrors the on-chain escrow contract's struct layout byte-for-byte:
//! fixed-width big-endian integers, fields in declaration order, and
//! length-prefixed byte strings (a `u16` length prefix, matching the
//! teacher's own `usize` impl which caps length-prefixed fields at
//! `u16::MAX`). There is exactly one encoding; unlike `strict_encoding` or
//! `lightning_encoding` this crate does not need pluggable strategies
//! because it only ever encodes one wire-critical type.

use std::io;

use crate::Error;

/// Canonical binary encoding, the exact byte string that gets signed.
pub trait CanonicalEncode {
    fn canonical_encode<W: io::Write>(&self, w: W) -> Result<usize, Error>;

    fn canonical_serialize(&self) -> Vec<u8> {
        let mut buf = vec![];
        self.canonical_encode(&mut buf)
            .expect("in-memory encoders can't fail");
        buf
    }
}

/// Canonical binary decoding, the inverse of [`CanonicalEncode`].
pub trait CanonicalDecode
where
    Self: Sized,
{
    fn canonical_decode<R: io::Read>(r: R) -> Result<Self, Error>;

    fn canonical_deserialize(data: &impl AsRef<[u8]>) -> Result<Self, Error> {
        let mut cursor = io::Cursor::new(data);
        let value = Self::canonical_decode(&mut cursor)?;
        if cursor.position() as usize == data.as_ref().len() {
            Ok(value)
        } else {
            Err(Error::DataNotEntirelyConsumed)
        }
    }
}

pub fn encode<T: CanonicalEncode>(value: &T) -> Vec<u8> {
    value.canonical_serialize()
}

pub fn decode<T: CanonicalDecode>(data: &impl AsRef<[u8]>) -> Result<T, Error> {
    T::canonical_deserialize(data)
}

macro_rules! impl_int_codec {
    ($ty:ty, $len:expr) => {
        impl CanonicalEncode for $ty {
            fn canonical_encode<W: io::Write>(&self, mut w: W) -> Result<usize, Error> {
                let bytes = self.to_be_bytes();
                w.write_all(&bytes)?;
                Ok(bytes.len())
            }
        }

        impl CanonicalDecode for $ty {
            fn canonical_decode<R: io::Read>(mut r: R) -> Result<Self, Error> {
                let mut buf = [0u8; $len];
                r.read_exact(&mut buf)?;
                Ok(<$ty>::from_be_bytes(buf))
            }
        }
    };
}

impl_int_codec!(u8, 1);
impl_int_codec!(u16, 2);
impl_int_codec!(u32, 4);
impl_int_codec!(u64, 8);

impl<const LEN: usize> CanonicalEncode for [u8; LEN] {
    fn canonical_encode<W: io::Write>(&self, mut w: W) -> Result<usize, Error> {
        w.write_all(self)?;
        Ok(LEN)
    }
}

impl<const LEN: usize> CanonicalDecode for [u8; LEN] {
    fn canonical_decode<R: io::Read>(mut r: R) -> Result<Self, Error> {
        let mut buf = [0u8; LEN];
        r.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Length-prefixed byte strings: a `u16` big-endian length followed by the
/// raw bytes. Used for `vmIdFragment` and for the detached signature bytes
/// carried alongside a `SignedSubRAV`.
impl CanonicalEncode for [u8] {
    fn canonical_encode<W: io::Write>(&self, mut w: W) -> Result<usize, Error> {
        if self.len() > u16::MAX as usize {
            return Err(Error::TooLargeData(self.len()));
        }
        let len = self.len() as u16;
        let mut written = len.canonical_encode(&mut w)?;
        w.write_all(self)?;
        written += self.len();
        Ok(written)
    }
}

impl CanonicalEncode for Vec<u8> {
    fn canonical_encode<W: io::Write>(&self, w: W) -> Result<usize, Error> {
        self.as_slice().canonical_encode(w)
    }
}

impl CanonicalDecode for Vec<u8> {
    fn canonical_decode<R: io::Read>(mut r: R) -> Result<Self, Error> {
        let len = u16::canonical_decode(&mut r)? as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl CanonicalEncode for String {
    fn canonical_encode<W: io::Write>(&self, w: W) -> Result<usize, Error> {
        self.as_bytes().canonical_encode(w)
    }
}

impl CanonicalDecode for String {
    fn canonical_decode<R: io::Read>(r: R) -> Result<Self, Error> {
        let bytes = Vec::<u8>::canonical_decode(r)?;
        String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_round_trips_big_endian() {
        let value: u64 = 0x0102_0304_0506_0708;
        let bytes = encode(&value);
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(decode::<u64>(&bytes).unwrap(), value);
    }

    #[test]
    fn string_is_length_prefixed() {
        let value = "account-key".to_string();
        let bytes = encode(&value);
        assert_eq!(&bytes[0..2], &[0, value.len() as u8]);
        assert_eq!(decode::<String>(&bytes).unwrap(), value);
    }

    #[test]
    fn rejects_trailing_garbage() {
        let mut bytes = encode(&7u64);
        bytes.push(0xff);
        assert!(matches!(decode::<u64>(&bytes), Err(Error::DataNotEntirelyConsumed)));
    }
}
