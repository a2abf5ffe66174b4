// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

use std::sync::{Arc, RwLock};

use payment_storage::{ChannelFilter, ChannelInfo, ChannelRepository, ChannelStatus, Pagination, SubChannelCursorUpdate};
use subrav_codec::{validate_sequence, Amount, ChannelId, SequenceVerdict, SignedSubRav, SubRav, CURRENT_VERSION};

use crate::contract::{PaymentChannelContract, TxReceipt};
use crate::crypto::{self, Signer};
use crate::error::{Error, ProtocolError, StateError};

/// Payer-side operations (C5): open/authorize channels, validate and sign
/// server-proposed receipts, close channels.
pub struct PayerClient {
    contract: Arc<dyn PaymentChannelContract>,
    channels: Arc<dyn ChannelRepository>,
    signer: Arc<dyn Signer>,
    payer_did: String,
    key_id: String,
    chain_id: RwLock<Option<u64>>,
    active_channel: RwLock<Option<ChannelId>>,
}

impl PayerClient {
    pub fn new(
        contract: Arc<dyn PaymentChannelContract>,
        channels: Arc<dyn ChannelRepository>,
        signer: Arc<dyn Signer>,
        payer_did: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Self {
        PayerClient {
            contract,
            channels,
            signer,
            payer_did: payer_did.into(),
            key_id: key_id.into(),
            chain_id: RwLock::new(None),
            active_channel: RwLock::new(None),
        }
    }

    async fn resolve_chain_id(&self) -> crate::error::Result<u64> {
        if let Some(id) = *self.chain_id.read().unwrap() {
            return Ok(id);
        }
        let id = self.contract.get_chain_id().await?;
        *self.chain_id.write().unwrap() = Some(id);
        Ok(id)
    }

    /// Opens a channel with `payee_did` over `asset_id`, persisting
    /// `{status: active, epoch: 0}` and, if no active channel is tracked
    /// locally, adopting it as the active one.
    pub async fn open_channel(&self, payee_did: &str, asset_id: &str) -> crate::error::Result<ChannelId> {
        let (channel_id, _receipt) = self.contract.open_channel(&self.payer_did, payee_did, asset_id).await?;
        self.persist_new_channel(channel_id, payee_did, asset_id).await?;
        Ok(channel_id)
    }

    /// Like [`Self::open_channel`], but also authorizes `vm_id_fragment` as
    /// a sub-channel and persists an initial `{nonce: 0, amount: 0}` cursor.
    pub async fn open_channel_with_sub_channel(
        &self,
        payee_did: &str,
        asset_id: &str,
        vm_id_fragment: &str,
    ) -> crate::error::Result<ChannelId> {
        let (channel_id, _receipt) = self
            .contract
            .open_channel_with_sub_channel(&self.payer_did, payee_did, asset_id, vm_id_fragment)
            .await?;
        self.persist_new_channel(channel_id, payee_did, asset_id).await?;
        self.channels
            .update_sub_channel(
                &channel_id,
                vm_id_fragment,
                SubChannelCursorUpdate {
                    epoch: Some(0),
                    last_claimed_amount: Some(Amount::ZERO),
                    last_confirmed_nonce: Some(0),
                },
            )
            .await?;
        Ok(channel_id)
    }

    async fn persist_new_channel(&self, channel_id: ChannelId, payee_did: &str, asset_id: &str) -> crate::error::Result<()> {
        let chain_id = self.resolve_chain_id().await?;
        self.channels
            .set_channel(ChannelInfo {
                channel_id,
                payer_did: self.payer_did.clone(),
                payee_did: payee_did.to_string(),
                asset_id: asset_id.to_string(),
                chain_id,
                epoch: 0,
                status: ChannelStatus::Active,
            })
            .await?;
        let mut active = self.active_channel.write().unwrap();
        if active.is_none() {
            *active = Some(channel_id);
        }
        Ok(())
    }

    pub async fn authorize_sub_channel(&self, channel_id: &ChannelId, vm_id_fragment: &str) -> crate::error::Result<TxReceipt> {
        Ok(self.contract.authorize_sub_channel(channel_id, vm_id_fragment).await?)
    }

    pub async fn close_channel(&self, channel_id: &ChannelId) -> crate::error::Result<TxReceipt> {
        let receipt = self.contract.close_channel(channel_id).await?;
        if let Some(mut info) = self.channels.get_channel(channel_id).await? {
            info.status = ChannelStatus::Closed;
            self.channels.set_channel(info).await?;
        }
        Ok(receipt)
    }

    /// The steps of spec §4.5's `signSubRAV`.
    pub async fn sign_sub_rav(&self, sub_rav: SubRav, max_amount: Option<Amount>) -> crate::error::Result<SignedSubRav> {
        let chain_id = self.resolve_chain_id().await?;

        let channel = self
            .channels
            .get_channel(&sub_rav.channel_id)
            .await?
            .ok_or(Error::Protocol(ProtocolError::UnknownSubChannel))?;
        if channel.status != ChannelStatus::Active {
            return Err(Error::State(StateError::ChannelClosed));
        }
        if sub_rav.channel_epoch != channel.epoch {
            return Err(Error::Protocol(ProtocolError::EpochMismatch {
                expected: channel.epoch,
                got: sub_rav.channel_epoch,
            }));
        }
        if sub_rav.chain_id != chain_id {
            return Err(Error::Protocol(ProtocolError::ChainIdMismatch { expected: chain_id, got: sub_rav.chain_id }));
        }
        if sub_rav.nonce == 0 {
            return Err(Error::Protocol(ProtocolError::NonMonotonicNonce { expected: 1, got: 0 }));
        }
        if let Some(max) = max_amount {
            if sub_rav.accumulated_amount > max {
                return Err(Error::Economic(crate::error::EconomicError::CostExceedsCeiling {
                    cost: sub_rav.accumulated_amount.to_string(),
                    max: max.to_string(),
                }));
            }
        }

        let fragment =
            crypto::extract_fragment(&self.key_id).ok_or(Error::Auth(crate::error::AuthError::KeyFragmentMismatch))?;
        if fragment != sub_rav.vm_id_fragment {
            return Err(Error::Auth(crate::error::AuthError::KeyFragmentMismatch));
        }

        let prev = self.channels.get_sub_channel(&sub_rav.channel_id, &sub_rav.vm_id_fragment).await?;
        let prev_signed = prev.as_ref().map(|cursor| SignedSubRav {
            sub_rav: SubRav {
                version: CURRENT_VERSION,
                chain_id,
                channel_id: sub_rav.channel_id,
                channel_epoch: cursor.epoch,
                vm_id_fragment: cursor.vm_id_fragment.clone(),
                accumulated_amount: cursor.last_claimed_amount,
                nonce: cursor.last_confirmed_nonce,
            },
            signature: Vec::new(),
        });

        if prev_signed.is_none() && sub_rav.nonce != 1 {
            return Err(Error::Protocol(ProtocolError::NonMonotonicNonce { expected: 1, got: sub_rav.nonce }));
        }

        match validate_sequence(prev_signed.as_ref(), &sub_rav, true) {
            SequenceVerdict::Progresses => {}
            SequenceVerdict::IdempotentReplay => {}
            SequenceVerdict::Conflict => {
                return Err(Error::Protocol(ProtocolError::NonMonotonicNonce {
                    expected: prev.map_or(1, |c| c.last_confirmed_nonce + 1),
                    got: sub_rav.nonce,
                }))
            }
        }

        let signed = crypto::sign(sub_rav, self.signer.as_ref(), &self.key_id).await?;

        self.channels
            .update_sub_channel(
                &signed.sub_rav.channel_id,
                &signed.sub_rav.vm_id_fragment,
                SubChannelCursorUpdate {
                    epoch: None,
                    last_claimed_amount: Some(signed.sub_rav.accumulated_amount),
                    last_confirmed_nonce: Some(signed.sub_rav.nonce),
                },
            )
            .await?;

        Ok(signed)
    }

    pub async fn list_channels(&self, filter: &ChannelFilter, page: Pagination) -> crate::error::Result<Vec<ChannelInfo>> {
        Ok(self.channels.list_channels(filter, page).await?)
    }
}
