// subrav-codec: canonical binary encoding and validation for SubRAV receipts.

use std::fmt;
use std::io;
use std::str::FromStr;

use crate::codec::{CanonicalDecode, CanonicalEncode};
use crate::Error;

/// Uniquely identifies an on-chain escrow channel.
///
/// Encoded canonically as the 32 raw bytes (never the hex form); displayed
/// and parsed as `0x`-prefixed lowercase hex, the form spec §3 mandates for
/// wire/API surfaces.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub [u8; 32]);

impl ChannelId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ChannelId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Error returned when parsing a `0x`-prefixed hex `ChannelId` fails.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ParseChannelIdError {
    /// channel id must be exactly 66 characters (`0x` + 64 hex digits), got {0}
    WrongLength(usize),

    /// channel id must start with `0x`
    MissingPrefix,

    /// channel id contains a non-hex-digit character
    InvalidHex,
}

impl FromStr for ChannelId {
    type Err = ParseChannelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 66 {
            return Err(ParseChannelIdError::WrongLength(s.len()));
        }
        let hex = s.strip_prefix("0x").ok_or(ParseChannelIdError::MissingPrefix)?;
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| ParseChannelIdError::InvalidHex)?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| ParseChannelIdError::InvalidHex)?;
        }
        Ok(ChannelId(bytes))
    }
}

impl CanonicalEncode for ChannelId {
    fn canonical_encode<W: io::Write>(&self, w: W) -> Result<usize, Error> {
        self.0.canonical_encode(w)
    }
}

impl CanonicalDecode for ChannelId {
    fn canonical_decode<R: io::Read>(r: R) -> Result<Self, Error> {
        <[u8; 32]>::canonical_decode(r).map(ChannelId)
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use super::ChannelId;
    use serde_crate::{de, Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    impl Serialize for ChannelId {
        fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&self.to_string())
        }
    }

    impl<'de> Deserialize<'de> for ChannelId {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
            let s = String::deserialize(d)?;
            ChannelId::from_str(&s).map_err(de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = ChannelId([0x42; 32]);
        let s = id.to_string();
        assert_eq!(s.len(), 66);
        assert_eq!(s.parse::<ChannelId>().unwrap(), id);
    }

    #[test]
    fn canonical_bytes_are_raw_not_hex() {
        let id = ChannelId([0x11; 32]);
        assert_eq!(id.canonical_serialize(), vec![0x11u8; 32]);
    }
}
