// subrav-codec: canonical binary encoding and validation for SubRAV receipts.

use std::io;

use crate::amount::Amount;
use crate::channel_id::ChannelId;
use crate::codec::{CanonicalDecode, CanonicalEncode};
use crate::Error;

/// The only wire version this crate currently understands.
pub const CURRENT_VERSION: u8 = 1;

/// A Sub-Channel Receipt And Voucher: the payer's claim, at a point in time,
/// about how much of a sub-channel's escrow the payee may withdraw.
///
/// Fields are declared in the exact order they are canonically encoded; do
/// not reorder them without bumping [`CURRENT_VERSION`] and updating the
/// on-chain contract in lockstep (spec §4.1).
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde_crate::Serialize, serde_crate::Deserialize))]
#[cfg_attr(feature = "serde", serde(crate = "serde_crate"))]
pub struct SubRav {
    pub version: u8,
    pub chain_id: u64,
    pub channel_id: ChannelId,
    pub channel_epoch: u64,
    pub vm_id_fragment: String,
    pub accumulated_amount: Amount,
    pub nonce: u64,
}

impl CanonicalEncode for SubRav {
    fn canonical_encode<W: io::Write>(&self, mut w: W) -> Result<usize, Error> {
        let mut written = 0;
        written += self.version.canonical_encode(&mut w)?;
        written += self.chain_id.canonical_encode(&mut w)?;
        written += self.channel_id.canonical_encode(&mut w)?;
        written += self.channel_epoch.canonical_encode(&mut w)?;
        written += self.vm_id_fragment.canonical_encode(&mut w)?;
        written += self.accumulated_amount.canonical_encode(&mut w)?;
        written += self.nonce.canonical_encode(&mut w)?;
        Ok(written)
    }
}

impl CanonicalDecode for SubRav {
    fn canonical_decode<R: io::Read>(mut r: R) -> Result<Self, Error> {
        let version = u8::canonical_decode(&mut r)?;
        if version != CURRENT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(SubRav {
            version,
            chain_id: u64::canonical_decode(&mut r)?,
            channel_id: ChannelId::canonical_decode(&mut r)?,
            channel_epoch: u64::canonical_decode(&mut r)?,
            vm_id_fragment: String::canonical_decode(&mut r)?,
            accumulated_amount: Amount::canonical_decode(&mut r)?,
            nonce: u64::canonical_decode(&mut r)?,
        })
    }
}

/// A [`SubRav`] paired with the payer's detached signature over its
/// canonical encoding.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde_crate::Serialize, serde_crate::Deserialize))]
#[cfg_attr(feature = "serde", serde(crate = "serde_crate"))]
pub struct SignedSubRav {
    pub sub_rav: SubRav,
    #[cfg_attr(feature = "serde", serde(with = "crate::hex_bytes"))]
    pub signature: Vec<u8>,
}

impl CanonicalEncode for SignedSubRav {
    fn canonical_encode<W: io::Write>(&self, mut w: W) -> Result<usize, Error> {
        let mut written = self.sub_rav.canonical_encode(&mut w)?;
        written += self.signature.canonical_encode(&mut w)?;
        Ok(written)
    }
}

impl CanonicalDecode for SignedSubRav {
    fn canonical_decode<R: io::Read>(mut r: R) -> Result<Self, Error> {
        Ok(SignedSubRav {
            sub_rav: SubRav::canonical_decode(&mut r)?,
            signature: Vec::<u8>::canonical_decode(&mut r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SubRav {
        SubRav {
            version: CURRENT_VERSION,
            chain_id: 4,
            channel_id: ChannelId([0x35; 32]),
            channel_epoch: 0,
            vm_id_fragment: "account-key".to_string(),
            accumulated_amount: Amount::from_u64(10_000),
            nonce: 1,
        }
    }

    #[test]
    fn round_trips_through_canonical_bytes() {
        let rav = sample();
        let bytes = rav.canonical_serialize();
        assert_eq!(SubRav::canonical_deserialize(&bytes).unwrap(), rav);
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut rav = sample();
        rav.version = 2;
        let mut bytes = rav.canonical_serialize();
        bytes[0] = 2;
        assert!(matches!(
            SubRav::canonical_deserialize(&bytes),
            Err(Error::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn signed_sub_rav_round_trips() {
        let signed = SignedSubRav {
            sub_rav: sample(),
            signature: vec![0xaa; 65],
        };
        let bytes = signed.canonical_serialize();
        assert_eq!(SignedSubRav::canonical_deserialize(&bytes).unwrap(), signed);
    }
}
