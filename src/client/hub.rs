// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

use std::sync::Arc;

use subrav_codec::Amount;

use crate::contract::{PaymentChannelContract, TxReceipt};
use crate::error::Result;

/// Hub balance operations (C7): deposit/withdraw/query aggregate balances,
/// exposed by [`crate::client::PayerClient`] as a thin pass-through over the
/// contract.
pub struct HubClient {
    contract: Arc<dyn PaymentChannelContract>,
}

impl HubClient {
    pub fn new(contract: Arc<dyn PaymentChannelContract>) -> Self {
        HubClient { contract }
    }

    pub async fn deposit(&self, payer_did: &str, asset_id: &str, amount: Amount) -> Result<TxReceipt> {
        Ok(self.contract.deposit_to_hub(payer_did, asset_id, amount).await?)
    }

    pub async fn withdraw(&self, payer_did: &str, asset_id: &str, amount: Amount) -> Result<TxReceipt> {
        Ok(self.contract.withdraw_from_hub(payer_did, asset_id, amount).await?)
    }

    pub async fn balance(&self, payer_did: &str, asset_id: &str) -> Result<Amount> {
        Ok(self.contract.get_hub_balance(payer_did, asset_id).await?)
    }

    pub async fn all_balances(&self, payer_did: &str) -> Result<Vec<(String, Amount)>> {
        Ok(self.contract.get_all_hub_balances(payer_did).await?)
    }

    pub async fn active_channel_count(&self, payer_did: &str) -> Result<u64> {
        Ok(self.contract.get_active_channels_count(payer_did).await?)
    }
}
