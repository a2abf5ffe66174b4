// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

//! Signer/DIDResolver bridge (C2): a capability trait pair the protocol
//! treats as opaque collaborators, plus secp256k1-backed test doubles.

use std::collections::HashMap;

use async_trait::async_trait;
use secp256k1::hashes::sha256;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use subrav_codec::{CanonicalEncode, SignedSubRav, SubRav};

use crate::error::{AuthError, Error, Result};

/// `did#fragment` key identifier, as carried on a `SubRAV.vmIdFragment`.
pub fn extract_fragment(key_id: &str) -> Option<&str> {
    key_id.rsplit_once('#').map(|(_, fragment)| fragment)
}

/// Capability to produce a signature over arbitrary bytes under a named key.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, bytes: &[u8], key_id: &str) -> Result<Vec<u8>>;
}

/// One entry in a resolved DID document: the verification method's declared
/// type and its public key material.
#[derive(Clone, Debug)]
pub struct VerificationMethod {
    pub method_type: String,
    pub public_key: Vec<u8>,
}

/// A resolved DID document: `keyId fragment -> verification method`.
#[derive(Clone, Debug, Default)]
pub struct DidDocument {
    pub verification_methods: HashMap<String, VerificationMethod>,
}

/// Capability to resolve a DID to its document.
#[async_trait]
pub trait DidResolver: Send + Sync {
    async fn resolve(&self, did: &str) -> Result<DidDocument>;
}

const SECP256K1_METHOD_TYPE: &str = "EcdsaSecp256k1VerificationKey2019";

/// Signs `subRav` with `signer` under `key_id`, returning the paired
/// `{subRav, signature}`. The key id's fragment MUST equal
/// `subRav.vmIdFragment` (spec §4.2).
pub async fn sign(sub_rav: SubRav, signer: &dyn Signer, key_id: &str) -> Result<SignedSubRav> {
    let fragment = extract_fragment(key_id).ok_or(Error::Auth(AuthError::KeyFragmentMismatch))?;
    if fragment != sub_rav.vm_id_fragment {
        return Err(Error::Auth(AuthError::KeyFragmentMismatch));
    }
    let bytes = sub_rav.canonical_serialize();
    let signature = signer.sign(&bytes, key_id).await?;
    Ok(SignedSubRav { sub_rav, signature })
}

/// Verifies `signed` was produced by `expected_payer_did`'s key for
/// `signed.sub_rav.vmIdFragment` (spec §4.2).
pub async fn verify(signed: &SignedSubRav, resolver: &dyn DidResolver, expected_payer_did: &str) -> Result<()> {
    let document = resolver.resolve(expected_payer_did).await?;
    let fragment = &signed.sub_rav.vm_id_fragment;
    let method = document
        .verification_methods
        .get(fragment)
        .ok_or_else(|| Error::Auth(AuthError::MissingKey(fragment.clone())))?;
    if method.method_type != SECP256K1_METHOD_TYPE {
        return Err(Error::Auth(AuthError::UnsupportedAlgorithm));
    }

    let public_key =
        PublicKey::from_slice(&method.public_key).map_err(|_| Error::Auth(AuthError::InvalidSignature))?;
    let signature =
        secp256k1::ecdsa::Signature::from_compact(&signed.signature).map_err(|_| Error::Auth(AuthError::InvalidSignature))?;
    let bytes = signed.sub_rav.canonical_serialize();
    let digest = sha256::Hash::hash(&bytes);
    let message = Message::from_slice(digest.as_ref()).map_err(|_| Error::Auth(AuthError::InvalidSignature))?;

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| Error::Auth(AuthError::InvalidSignature))
}

/// An in-process `Signer`/`DIDResolver` pair over real secp256k1 keys, used
/// in tests in place of the opaque DID subsystem.
pub struct MockWallet {
    keys: HashMap<String, SecretKey>,
}

impl MockWallet {
    pub fn new() -> Self {
        MockWallet { keys: HashMap::new() }
    }

    /// Registers a new key under `key_id` (`did#fragment`) and returns its
    /// public key, for seeding a matching `StaticDidResolver`.
    pub fn add_key(&mut self, key_id: impl Into<String>, secret: SecretKey) -> PublicKey {
        let secp = Secp256k1::signing_only();
        let public = PublicKey::from_secret_key(&secp, &secret);
        self.keys.insert(key_id.into(), secret);
        public
    }
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Signer for MockWallet {
    async fn sign(&self, bytes: &[u8], key_id: &str) -> Result<Vec<u8>> {
        let secret = self
            .keys
            .get(key_id)
            .ok_or_else(|| Error::Auth(AuthError::MissingKey(key_id.to_string())))?;
        let secp = Secp256k1::signing_only();
        let digest = sha256::Hash::hash(bytes);
        let message =
            Message::from_slice(digest.as_ref()).map_err(|_| Error::Auth(AuthError::InvalidSignature))?;
        let signature = secp.sign_ecdsa(&message, secret);
        Ok(signature.serialize_compact().to_vec())
    }
}

/// A `DIDResolver` backed by an in-memory table of pre-resolved documents,
/// for tests.
#[derive(Clone, Default)]
pub struct StaticDidResolver {
    documents: HashMap<String, DidDocument>,
}

impl StaticDidResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, did: &str, fragment: &str, public_key: PublicKey) {
        let document = self.documents.entry(did.to_string()).or_default();
        document.verification_methods.insert(
            fragment.to_string(),
            VerificationMethod {
                method_type: SECP256K1_METHOD_TYPE.to_string(),
                public_key: public_key.serialize().to_vec(),
            },
        );
    }
}

#[async_trait]
impl DidResolver for StaticDidResolver {
    async fn resolve(&self, did: &str) -> Result<DidDocument> {
        self.documents
            .get(did)
            .cloned()
            .ok_or_else(|| Error::Auth(AuthError::MissingKey(did.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subrav_codec::{Amount, ChannelId, CURRENT_VERSION};

    fn sample_rav(fragment: &str) -> SubRav {
        SubRav {
            version: CURRENT_VERSION,
            chain_id: 4,
            channel_id: ChannelId([9; 32]),
            channel_epoch: 0,
            vm_id_fragment: fragment.to_string(),
            accumulated_amount: Amount::from_u64(10_000),
            nonce: 1,
        }
    }

    #[tokio::test]
    async fn sign_then_verify_round_trips() {
        let mut wallet = MockWallet::new();
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let did = "did:example:payer";
        let key_id = format!("{did}#account-key");
        let public = wallet.add_key(&key_id, secret);

        let mut resolver = StaticDidResolver::new();
        resolver.add_key(did, "account-key", public);

        let signed = sign(sample_rav("account-key"), &wallet, &key_id).await.unwrap();
        verify(&signed, &resolver, did).await.unwrap();
    }

    #[tokio::test]
    async fn verify_rejects_tampered_payload() {
        let mut wallet = MockWallet::new();
        let secret = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let did = "did:example:payer";
        let key_id = format!("{did}#account-key");
        let public = wallet.add_key(&key_id, secret);

        let mut resolver = StaticDidResolver::new();
        resolver.add_key(did, "account-key", public);

        let mut signed = sign(sample_rav("account-key"), &wallet, &key_id).await.unwrap();
        signed.sub_rav.nonce = 2;

        let err = verify(&signed, &resolver, did).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::InvalidSignature)));
    }

    #[tokio::test]
    async fn sign_rejects_mismatched_fragment() {
        let wallet = MockWallet::new();
        let err = sign(sample_rav("account-key"), &wallet, "did:example:payer#other-key")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::KeyFragmentMismatch)));
    }
}
