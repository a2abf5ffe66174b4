// subrav-codec: canonical binary encoding and validation for SubRAV receipts.

use crate::subrav::SubRav;

/// A single structural defect found in a [`SubRav`] considered on its own,
/// independent of any channel state it is checked against.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum StructuralError {
    /// vmIdFragment must not be empty
    EmptyVmIdFragment,

    /// vmIdFragment must not exceed 256 bytes, got {0}
    VmIdFragmentTooLong(usize),

    /// chainId must be nonzero
    ZeroChainId,
}

/// Checks a [`SubRav`] in isolation: the checks that don't require knowing
/// anything about prior RAVs or channel state (spec §4.1 "structural
/// validation").
pub fn validate(rav: &SubRav) -> Vec<StructuralError> {
    let mut errors = Vec::new();
    if rav.vm_id_fragment.is_empty() {
        errors.push(StructuralError::EmptyVmIdFragment);
    }
    if rav.vm_id_fragment.len() > 256 {
        errors.push(StructuralError::VmIdFragmentTooLong(rav.vm_id_fragment.len()));
    }
    if rav.chain_id == 0 {
        errors.push(StructuralError::ZeroChainId);
    }
    errors
}

/// The verdict produced by comparing a candidate RAV against the
/// previously-accepted one for the same sub-channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SequenceVerdict {
    /// Strictly progresses the sub-channel: nonce and amount both increased
    /// (or this is the first RAV for the sub-channel).
    Progresses,
    /// Byte-for-byte identical to the previously-accepted RAV: a harmless
    /// retransmission, not a new charge.
    IdempotentReplay,
    /// Conflicts with the previously-accepted RAV: same nonce with a
    /// different amount, a lower nonce, or an amount that did not increase
    /// alongside the nonce.
    Conflict,
}

/// Compares a candidate RAV against the previously-accepted RAV (if any) for
/// the same sub-channel.
///
/// Per spec §9 (Open Question 1): a RAV that is byte-for-byte identical to
/// the previous one is an idempotent replay, not a conflict, regardless of
/// `charges`. When `charges` is true the caller intends to actually redeem
/// value for this request, so a non-increasing nonce or amount is rejected
/// as a conflict; when `charges` is false (a free/already-paid route) the
/// same non-increasing RAV is still only a conflict if it contradicts the
/// previous one rather than repeating it.
pub fn validate_sequence(prev: Option<&crate::subrav::SignedSubRav>, cur: &SubRav, charges: bool) -> SequenceVerdict {
    let Some(prev) = prev else {
        return SequenceVerdict::Progresses;
    };
    let prev = &prev.sub_rav;

    if prev == cur {
        return SequenceVerdict::IdempotentReplay;
    }

    if cur.nonce < prev.nonce {
        return SequenceVerdict::Conflict;
    }

    if cur.nonce == prev.nonce {
        // Same nonce but different payload (checked above): always a conflict,
        // since a nonce uniquely identifies one accumulated amount.
        return SequenceVerdict::Conflict;
    }

    if cur.nonce != prev.nonce + 1 {
        // Nonces must form 1, 2, 3, ... with no gaps.
        return SequenceVerdict::Conflict;
    }

    // cur.nonce == prev.nonce + 1 from here.
    if cur.accumulated_amount < prev.accumulated_amount {
        return SequenceVerdict::Conflict;
    }

    if charges && cur.accumulated_amount == prev.accumulated_amount {
        return SequenceVerdict::Conflict;
    }

    SequenceVerdict::Progresses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::channel_id::ChannelId;
    use crate::subrav::{SignedSubRav, CURRENT_VERSION};

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

    fn signed(r: SubRav) -> SignedSubRav {
        SignedSubRav { sub_rav: r, signature: vec![0; 65] }
    }

    #[test]
    fn first_rav_always_progresses() {
        assert_eq!(validate_sequence(None, &rav(1, 100), true), SequenceVerdict::Progresses);
    }

    #[test]
    fn identical_replay_is_not_a_conflict() {
        let prev = signed(rav(3, 500));
        let cur = rav(3, 500);
        assert_eq!(validate_sequence(Some(&prev), &cur, true), SequenceVerdict::IdempotentReplay);
        assert_eq!(validate_sequence(Some(&prev), &cur, false), SequenceVerdict::IdempotentReplay);
    }

    #[test]
    fn same_nonce_different_amount_conflicts() {
        let prev = signed(rav(3, 500));
        let cur = rav(3, 600);
        assert_eq!(validate_sequence(Some(&prev), &cur, true), SequenceVerdict::Conflict);
    }

    #[test]
    fn lower_nonce_conflicts() {
        let prev = signed(rav(5, 500));
        let cur = rav(4, 500);
        assert_eq!(validate_sequence(Some(&prev), &cur, true), SequenceVerdict::Conflict);
    }

    #[test]
    fn non_increasing_amount_on_charge_conflicts() {
        let prev = signed(rav(3, 500));
        let cur = rav(4, 500);
        assert_eq!(validate_sequence(Some(&prev), &cur, true), SequenceVerdict::Conflict);
    }

    #[test]
    fn non_increasing_amount_on_free_route_progresses() {
        let prev = signed(rav(3, 500));
        let cur = rav(4, 500);
        assert_eq!(validate_sequence(Some(&prev), &cur, false), SequenceVerdict::Progresses);
    }

    #[test]
    fn higher_nonce_and_amount_progresses() {
        let prev = signed(rav(3, 500));
        let cur = rav(4, 600);
        assert_eq!(validate_sequence(Some(&prev), &cur, true), SequenceVerdict::Progresses);
    }

    #[test]
    fn skipped_nonce_conflicts_even_with_a_higher_amount() {
        let prev = signed(rav(3, 500));
        let cur = rav(10, 600);
        assert_eq!(validate_sequence(Some(&prev), &cur, true), SequenceVerdict::Conflict);
    }

    #[test]
    fn structural_validation_flags_empty_fragment() {
        let mut r = rav(1, 1);
        r.vm_id_fragment.clear();
        assert_eq!(validate(&r), vec![StructuralError::EmptyVmIdFragment]);
    }
}
