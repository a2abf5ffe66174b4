// subrav-codec: canonical binary encoding and validation for SubRAV receipts.

use std::fmt;
use std::io;
use std::str::FromStr;

use primitive_types::U256;

use crate::codec::{CanonicalDecode, CanonicalEncode};
use crate::Error;

/// A chain amount, up to 256 bits, denominated in the asset's base units.
///
/// Encoded canonically as 32 raw big-endian bytes (matching a Solidity
/// `uint256` ABI word), never length-prefixed, so the encoding matches the
/// on-chain contract's struct layout byte-for-byte (spec §4.1).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(pub U256);

impl Amount {
    pub const ZERO: Amount = Amount(U256::zero());

    pub fn from_u64(value: u64) -> Self {
        Amount(U256::from(value))
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_dec_str(s)
            .map(Amount)
            .map_err(|e| format!("invalid decimal amount {s:?}: {e}"))
    }
}

impl CanonicalEncode for Amount {
    fn canonical_encode<W: io::Write>(&self, mut w: W) -> Result<usize, Error> {
        let mut buf = [0u8; 32];
        self.0.to_big_endian(&mut buf);
        w.write_all(&buf)?;
        Ok(32)
    }
}

impl CanonicalDecode for Amount {
    fn canonical_decode<R: io::Read>(mut r: R) -> Result<Self, Error> {
        let mut buf = [0u8; 32];
        r.read_exact(&mut buf)?;
        Ok(Amount(U256::from_big_endian(&buf)))
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use super::Amount;
    use serde_crate::{de, Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for Amount {
        fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&self.0.to_string())
        }
    }

    impl<'de> Deserialize<'de> for Amount {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
            let s = String::deserialize(d)?;
            s.parse().map_err(de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_canonical_bytes() {
        let amount = Amount::from_u64(10_000);
        let bytes = amount.canonical_serialize();
        assert_eq!(bytes.len(), 32);
        assert_eq!(Amount::canonical_deserialize(&bytes).unwrap(), amount);
    }

    #[test]
    fn decimal_string_round_trip() {
        let amount: Amount = "123456789012345678901234567890".parse().unwrap();
        assert_eq!(amount.to_string(), "123456789012345678901234567890");
    }
}
