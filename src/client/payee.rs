// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

use std::sync::Arc;

use payment_storage::{ChannelInfo, ChannelRepository, RavRepository, SubChannelCursorUpdate, SubChannelInfo};
use subrav_codec::{ChannelId, SignedSubRav};

use crate::contract::PaymentChannelContract;
use crate::error::{Error, Result, StateError};

/// Payee-side operations (C6): channel/sub-channel lookup with chain
/// fallback, and claim entry points over the repositories other
/// collaborators (the billing middleware, the claim service) also use.
pub struct PayeeClient {
    contract: Arc<dyn PaymentChannelContract>,
    channels: Arc<dyn ChannelRepository>,
    ravs: Arc<dyn RavRepository>,
}

impl PayeeClient {
    pub fn new(contract: Arc<dyn PaymentChannelContract>, channels: Arc<dyn ChannelRepository>, ravs: Arc<dyn RavRepository>) -> Self {
        PayeeClient { contract, channels, ravs }
    }

    pub fn channels(&self) -> &Arc<dyn ChannelRepository> {
        &self.channels
    }

    pub fn ravs(&self) -> &Arc<dyn RavRepository> {
        &self.ravs
    }

    /// Returns the local cursor if present; otherwise synthesizes one from
    /// on-chain sub-channel info and persists it. Returns `None` only when
    /// the sub-channel is not authorised on-chain (spec §4.6).
    pub async fn get_sub_channel_state(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
    ) -> Result<Option<SubChannelInfo>> {
        if let Some(cursor) = self.channels.get_sub_channel(channel_id, vm_id_fragment).await? {
            return Ok(Some(cursor));
        }

        let Some((amount, nonce)) = self.contract.get_sub_channel(channel_id, vm_id_fragment).await? else {
            return Ok(None);
        };
        let epoch = self
            .channels
            .get_channel(channel_id)
            .await?
            .map(|c| c.epoch)
            .unwrap_or(0);

        let cursor = self
            .channels
            .update_sub_channel(
                channel_id,
                vm_id_fragment,
                SubChannelCursorUpdate {
                    epoch: Some(epoch),
                    last_claimed_amount: Some(amount),
                    last_confirmed_nonce: Some(nonce),
                },
            )
            .await?;
        Ok(Some(cursor))
    }

    /// Fetches `ChannelInfo` from the local cache. The contract exposes no
    /// way to reconstruct the full record (payer/payee DIDs, asset) from a
    /// channel id alone, so an uncached channel can only be confirmed live
    /// via [`PaymentChannelContract::get_channel_status`], not rehydrated.
    pub async fn get_channel_info(&self, channel_id: &ChannelId) -> Result<Option<ChannelInfo>> {
        Ok(self.channels.get_channel(channel_id).await?)
    }

    /// Submits `signed_sub_rav` to the contract. A higher-level verification
    /// (C9) is expected to have already run.
    pub async fn claim_from_channel(&self, signed_sub_rav: &SignedSubRav) -> Result<crate::contract::TxReceipt> {
        let receipt = self.contract.claim_from_channel(signed_sub_rav).await?;
        self.ravs
            .mark_as_claimed(
                &signed_sub_rav.sub_rav.channel_id,
                &signed_sub_rav.sub_rav.vm_id_fragment,
                signed_sub_rav.sub_rav.nonce,
                Some(receipt.tx_hash.clone()),
            )
            .await?;
        self.channels
            .update_sub_channel(
                &signed_sub_rav.sub_rav.channel_id,
                &signed_sub_rav.sub_rav.vm_id_fragment,
                SubChannelCursorUpdate {
                    epoch: None,
                    last_claimed_amount: Some(signed_sub_rav.sub_rav.accumulated_amount),
                    last_confirmed_nonce: Some(signed_sub_rav.sub_rav.nonce),
                },
            )
            .await?;
        Ok(receipt)
    }

    /// Iterates `claim_from_channel` over every entry; a failure on one
    /// claim is surfaced rather than silently skipped (spec §4.6).
    pub async fn batch_claim_from_channels(
        &self,
        signed_sub_ravs: &[SignedSubRav],
    ) -> Result<Vec<crate::contract::TxReceipt>> {
        let mut receipts = Vec::with_capacity(signed_sub_ravs.len());
        for signed in signed_sub_ravs {
            receipts.push(self.claim_from_channel(signed).await?);
        }
        Ok(receipts)
    }

    /// Re-fetches `ChannelInfo` from the contract and, if the on-chain epoch
    /// has moved past the locally cached one, invalidates every pending
    /// proposal for the channel so issuance can resume against the new
    /// epoch (the supplemented dispute/epoch-rollover recovery path).
    pub async fn refresh_channel_epoch(
        &self,
        channel_id: &ChannelId,
        pending: &dyn payment_storage::PendingSubRavRepository,
    ) -> Result<bool> {
        let Some(mut cached) = self.channels.get_channel(channel_id).await? else {
            return Err(Error::State(StateError::SubChannelNotAuthorized));
        };
        let chain_epoch = self.contract.get_channel_epoch(channel_id).await?;

        if chain_epoch <= cached.epoch {
            return Ok(false);
        }

        let sub_channels = self.channels.list_sub_channels(channel_id).await?;
        for sub_channel in sub_channels {
            if let Some(stale) = pending.find_latest_by_sub_channel(channel_id, &sub_channel.vm_id_fragment).await? {
                pending.remove(channel_id, &sub_channel.vm_id_fragment, stale.nonce).await?;
            }
        }

        cached.epoch = chain_epoch;
        self.channels.set_channel(cached).await?;
        Ok(true)
    }
}
