// subrav-codec: canonical binary encoding and validation for SubRAV receipts.
//
// To the extent possible under law, the payment-kit contributors have
// dedicated all copyright and related and neighboring rights to this
// software to the public domain worldwide.

//! Canonical binary encoding, amounts, channel identifiers and structural
//! validation for SubRAV payment-channel receipts.
//!
//! This crate knows nothing about transport, storage or signing keys; it is
//! the one piece of the workspace every other crate depends on, the way the
//! teacher's `lnpbp` crate anchors its own sibling crates.

#[macro_use]
extern crate amplify_derive;

#[cfg(feature = "serde")]
extern crate serde_crate;

mod amount;
mod channel_id;
mod codec;
mod error;
mod subrav;
mod validate;

pub use amount::Amount;
pub use channel_id::{ChannelId, ParseChannelIdError};
pub use codec::{decode, encode, CanonicalDecode, CanonicalEncode};
pub use error::Error;
pub use subrav::{SignedSubRav, SubRav, CURRENT_VERSION};
pub use validate::{validate, validate_sequence, SequenceVerdict, StructuralError};

#[cfg(feature = "serde")]
pub(crate) mod hex_bytes {
    //! `serde_with`-style hex encoding for raw byte vectors (signatures),
    //! used where the JSON header surface needs a human-readable signature
    //! but the canonical wire form stays length-prefixed raw bytes.
    use amplify::hex::{FromHex, ToHex};
    use serde_crate::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&bytes.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        Vec::from_hex(&s).map_err(de::Error::custom)
    }
}
