// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

//! RavVerifier (C9): the single authoritative, side-effect-free decision
//! procedure the billing middleware runs before accepting an inbound signed
//! receipt.

use payment_storage::{ChannelInfo, ChannelStatus, SubChannelInfo};
use subrav_codec::{validate_sequence, SequenceVerdict, SignedSubRav, SubRav};

use crate::crypto::{self, DidResolver};
use crate::error::{AuthError, ProtocolError, StateError};

/// Whether this route requires payment at all, and (if so) whether a
/// pending proposal is outstanding for the caller to sign.
#[derive(Clone, Copy, Debug)]
pub struct BillingRule {
    pub requires_payment: bool,
}

/// The decision returned by [`verify_receipt`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Verdict {
    Allow,
    RequireSignature402,
    Conflict,
    Reject,
}

/// Inputs to one verification decision; the verifier never mutates storage
/// itself, it only reads what the caller gathered beforehand.
pub struct VerifyInput<'a> {
    pub channel_info: &'a ChannelInfo,
    pub sub_channel_state: Option<&'a SubChannelInfo>,
    pub billing_rule: BillingRule,
    pub resolver: Option<&'a dyn DidResolver>,
    pub signed_sub_rav: Option<&'a SignedSubRav>,
    pub latest_pending_sub_rav: Option<&'a SubRav>,
    /// The chain id resolved for this channel at open time (spec §4.7 step
    /// 4's "chainId equality"), checked against the signed receipt's own.
    pub expected_chain_id: u64,
}

/// Outcome of [`verify_receipt`]: the verdict plus the two observability
/// flags spec §4.7 calls out.
#[derive(Clone, Copy, Debug)]
pub struct VerifyOutcome {
    pub verdict: Verdict,
    pub signed_verified: bool,
    pub pending_matched: bool,
    pub rejection: Option<RejectionReason>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RejectionReason {
    InvalidSignature,
    ChannelNotActive,
    EpochMismatch { expected: u64, got: u64 },
    ChainIdMismatch { expected: u64, got: u64 },
    NonceConflict,
}

/// Structural comparison of two SubRAVs ignoring the signature: spec §4.7's
/// `subRAVsMatch`.
fn sub_ravs_match(a: &SubRav, b: &SubRav) -> bool {
    a == b
}

/// Runs the decision procedure described in spec §4.7.
pub async fn verify_receipt(input: VerifyInput<'_>) -> VerifyOutcome {
    let mut pending_matched = false;
    let mut signed_verified = false;

    // 1. Payment required, a pending proposal exists, but no signature was
    // supplied: ask the caller to sign it.
    if input.billing_rule.requires_payment && input.latest_pending_sub_rav.is_some() && input.signed_sub_rav.is_none()
    {
        return VerifyOutcome {
            verdict: Verdict::RequireSignature402,
            signed_verified,
            pending_matched,
            rejection: None,
        };
    }

    let Some(signed) = input.signed_sub_rav else {
        // No payment presented and none required: nothing further to check.
        return VerifyOutcome { verdict: Verdict::Allow, signed_verified, pending_matched, rejection: None };
    };

    // 2. A signature was supplied alongside a pending proposal: it must
    // structurally match, barring the signature itself.
    if let Some(pending) = input.latest_pending_sub_rav {
        if !sub_ravs_match(&signed.sub_rav, pending) {
            return VerifyOutcome {
                verdict: Verdict::Conflict,
                signed_verified,
                pending_matched,
                rejection: Some(RejectionReason::NonceConflict),
            };
        }
        pending_matched = true;
    }

    // 3. Signature verification against the payer's resolved DID document.
    if let Some(resolver) = input.resolver {
        match crypto::verify(signed, resolver, &input.channel_info.payer_did).await {
            Ok(()) => signed_verified = true,
            Err(_) => {
                return VerifyOutcome {
                    verdict: Verdict::Reject,
                    signed_verified,
                    pending_matched,
                    rejection: Some(RejectionReason::InvalidSignature),
                }
            }
        }
    }

    // 4. Channel/epoch/chain-id/sequence checks.
    if input.channel_info.status != ChannelStatus::Active {
        return VerifyOutcome {
            verdict: Verdict::Reject,
            signed_verified,
            pending_matched,
            rejection: Some(RejectionReason::ChannelNotActive),
        };
    }
    if signed.sub_rav.channel_epoch != input.channel_info.epoch {
        return VerifyOutcome {
            verdict: Verdict::Reject,
            signed_verified,
            pending_matched,
            rejection: Some(RejectionReason::EpochMismatch {
                expected: input.channel_info.epoch,
                got: signed.sub_rav.channel_epoch,
            }),
        };
    }
    if signed.sub_rav.chain_id != input.expected_chain_id {
        return VerifyOutcome {
            verdict: Verdict::Reject,
            signed_verified,
            pending_matched,
            rejection: Some(RejectionReason::ChainIdMismatch {
                expected: input.expected_chain_id,
                got: signed.sub_rav.chain_id,
            }),
        };
    }

    let prev = input.sub_channel_state;
    let prev_signed = prev.map(|state| SignedSubRav {
        sub_rav: SubRav {
            version: signed.sub_rav.version,
            chain_id: signed.sub_rav.chain_id,
            channel_id: state.channel_id,
            channel_epoch: state.epoch,
            vm_id_fragment: state.vm_id_fragment.clone(),
            accumulated_amount: state.last_claimed_amount,
            nonce: state.last_confirmed_nonce,
        },
        signature: Vec::new(),
    });

    match validate_sequence(prev_signed.as_ref(), &signed.sub_rav, input.billing_rule.requires_payment) {
        SequenceVerdict::Progresses | SequenceVerdict::IdempotentReplay => {}
        SequenceVerdict::Conflict => {
            return VerifyOutcome {
                verdict: Verdict::Reject,
                signed_verified,
                pending_matched,
                rejection: Some(RejectionReason::NonceConflict),
            }
        }
    }

    VerifyOutcome { verdict: Verdict::Allow, signed_verified, pending_matched, rejection: None }
}

impl From<RejectionReason> for crate::error::Error {
    fn from(reason: RejectionReason) -> Self {
        match reason {
            RejectionReason::InvalidSignature => crate::error::Error::Auth(AuthError::InvalidSignature),
            RejectionReason::ChannelNotActive => crate::error::Error::State(StateError::ChannelClosed),
            RejectionReason::EpochMismatch { expected, got } => {
                crate::error::Error::Protocol(ProtocolError::EpochMismatch { expected, got })
            }
            RejectionReason::ChainIdMismatch { expected, got } => {
                crate::error::Error::Protocol(ProtocolError::ChainIdMismatch { expected, got })
            }
            RejectionReason::NonceConflict => crate::error::Error::Protocol(ProtocolError::TamperedSubRav),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payment_storage::ChannelStatus;
    use subrav_codec::{Amount, ChannelId, CURRENT_VERSION};

    fn channel() -> ChannelInfo {
        ChannelInfo {
            channel_id: ChannelId([1; 32]),
            payer_did: "did:example:payer".to_string(),
            payee_did: "did:example:payee".to_string(),
            asset_id: "asset-1".to_string(),
            chain_id: 4,
            epoch: 0,
            status: ChannelStatus::Active,
        }
    }

    fn rav(nonce: u64, amount: u64) -> SubRav {
        SubRav {
            version: CURRENT_VERSION,
            chain_id: 4,
            channel_id: ChannelId([1; 32]),
            channel_epoch: 0,
            vm_id_fragment: "account-key".to_string(),
            accumulated_amount: Amount::from_u64(amount),
            nonce,
        }
    }

    #[tokio::test]
    async fn requires_signature_when_pending_and_no_signature() {
        let channel_info = channel();
        let pending = rav(2, 200);
        let outcome = verify_receipt(VerifyInput {
            channel_info: &channel_info,
            sub_channel_state: None,
            billing_rule: BillingRule { requires_payment: true },
            resolver: None,
            signed_sub_rav: None,
            latest_pending_sub_rav: Some(&pending),
            expected_chain_id: 4,
        })
        .await;
        assert_eq!(outcome.verdict, Verdict::RequireSignature402);
    }

    #[tokio::test]
    async fn conflict_when_signed_does_not_match_pending() {
        let channel_info = channel();
        let pending = rav(2, 200);
        let mismatched = SignedSubRav { sub_rav: rav(2, 999), signature: vec![0; 65] };
        let outcome = verify_receipt(VerifyInput {
            channel_info: &channel_info,
            sub_channel_state: None,
            billing_rule: BillingRule { requires_payment: true },
            resolver: None,
            signed_sub_rav: Some(&mismatched),
            latest_pending_sub_rav: Some(&pending),
            expected_chain_id: 4,
        })
        .await;
        assert_eq!(outcome.verdict, Verdict::Conflict);
    }

    #[tokio::test]
    async fn rejects_when_channel_not_active() {
        let mut channel_info = channel();
        channel_info.status = ChannelStatus::Closed;
        let signed = SignedSubRav { sub_rav: rav(1, 100), signature: vec![0; 65] };
        let outcome = verify_receipt(VerifyInput {
            channel_info: &channel_info,
            sub_channel_state: None,
            billing_rule: BillingRule { requires_payment: true },
            resolver: None,
            signed_sub_rav: Some(&signed),
            latest_pending_sub_rav: None,
            expected_chain_id: 4,
        })
        .await;
        assert_eq!(outcome.verdict, Verdict::Reject);
        assert_eq!(outcome.rejection, Some(RejectionReason::ChannelNotActive));
    }

    #[tokio::test]
    async fn rejects_when_chain_id_does_not_match() {
        let channel_info = channel();
        let signed = SignedSubRav { sub_rav: rav(1, 100), signature: vec![0; 65] };
        let outcome = verify_receipt(VerifyInput {
            channel_info: &channel_info,
            sub_channel_state: None,
            billing_rule: BillingRule { requires_payment: true },
            resolver: None,
            signed_sub_rav: Some(&signed),
            latest_pending_sub_rav: None,
            expected_chain_id: 99,
        })
        .await;
        assert_eq!(outcome.verdict, Verdict::Reject);
        assert_eq!(outcome.rejection, Some(RejectionReason::ChainIdMismatch { expected: 99, got: 4 }));
    }

    #[tokio::test]
    async fn allows_first_payment_with_no_resolver() {
        let channel_info = channel();
        let signed = SignedSubRav { sub_rav: rav(1, 100), signature: vec![0; 65] };
        let outcome = verify_receipt(VerifyInput {
            channel_info: &channel_info,
            sub_channel_state: None,
            billing_rule: BillingRule { requires_payment: true },
            resolver: None,
            signed_sub_rav: Some(&signed),
            latest_pending_sub_rav: None,
            expected_chain_id: 4,
        })
        .await;
        assert_eq!(outcome.verdict, Verdict::Allow);
    }
}
