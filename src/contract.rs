// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

//! The on-chain escrow contract and billing-rule evaluator, consumed as
//! opaque capability traits (spec §1: deliberately out of scope).

use async_trait::async_trait;
use payment_storage::ChannelStatus;
use subrav_codec::{Amount, ChannelId, SignedSubRav};

use crate::error::Result;

/// Result of a write call against the contract.
#[derive(Clone, Debug)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_height: Option<u64>,
}

/// On-chain asset metadata.
#[derive(Clone, Debug)]
pub struct AssetInfo {
    pub asset_id: String,
    pub decimals: u8,
    pub symbol: String,
}

/// A price quote in picoUSD: `1 USD = 10^12 pUSD` (spec §6).
#[derive(Clone, Copy, Debug)]
pub struct PicoUsdPrice(pub u64);

/// The opaque on-chain escrow contract. Read operations are safe to retry;
/// writes return a receipt once included.
#[async_trait]
pub trait PaymentChannelContract: Send + Sync {
    async fn open_channel(&self, payer_did: &str, payee_did: &str, asset_id: &str) -> Result<(ChannelId, TxReceipt)>;

    async fn open_channel_with_sub_channel(
        &self,
        payer_did: &str,
        payee_did: &str,
        asset_id: &str,
        vm_id_fragment: &str,
    ) -> Result<(ChannelId, TxReceipt)>;

    async fn authorize_sub_channel(&self, channel_id: &ChannelId, vm_id_fragment: &str) -> Result<TxReceipt>;

    async fn claim_from_channel(&self, signed_sub_rav: &SignedSubRav) -> Result<TxReceipt>;

    async fn close_channel(&self, channel_id: &ChannelId) -> Result<TxReceipt>;

    async fn get_channel_status(&self, channel_id: &ChannelId) -> Result<ChannelStatus>;

    async fn get_channel_epoch(&self, channel_id: &ChannelId) -> Result<u64>;

    async fn get_sub_channel(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
    ) -> Result<Option<(Amount, u64)>>;

    async fn get_asset_info(&self, asset_id: &str) -> Result<AssetInfo>;

    async fn get_asset_price(&self, asset_id: &str) -> Result<PicoUsdPrice>;

    async fn get_chain_id(&self) -> Result<u64>;

    async fn deposit_to_hub(&self, payer_did: &str, asset_id: &str, amount: Amount) -> Result<TxReceipt>;

    async fn withdraw_from_hub(&self, payer_did: &str, asset_id: &str, amount: Amount) -> Result<TxReceipt>;

    async fn get_hub_balance(&self, payer_did: &str, asset_id: &str) -> Result<Amount>;

    async fn get_all_hub_balances(&self, payer_did: &str) -> Result<Vec<(String, Amount)>>;

    async fn get_active_channels_count(&self, payer_did: &str) -> Result<u64>;
}

/// Context passed to the billing-rule evaluator for one request.
#[derive(Clone, Debug)]
pub struct BillingContext {
    pub service_id: String,
    pub operation: String,
    pub asset_id: String,
    pub meta: serde_json::Value,
}

/// The opaque billing-rule evaluator (spec §1): given a request context,
/// returns the cost of servicing it in the asset's base units.
#[async_trait]
pub trait CostCalculator: Send + Sync {
    async fn cost_of(&self, context: &BillingContext) -> Result<Amount>;
}
