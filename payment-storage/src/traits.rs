// payment-storage: repository traits and storage backends for payment-kit.

use async_trait::async_trait;
use subrav_codec::{ChannelId, SignedSubRav};

use crate::error::Error;
use crate::models::*;

/// Channel and sub-channel metadata: spec §4.4.1.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn get_channel(&self, channel_id: &ChannelId) -> Result<Option<ChannelInfo>, Error>;
    async fn set_channel(&self, info: ChannelInfo) -> Result<(), Error>;
    async fn remove_channel(&self, channel_id: &ChannelId) -> Result<(), Error>;
    async fn list_channels(
        &self,
        filter: &ChannelFilter,
        page: Pagination,
    ) -> Result<Vec<ChannelInfo>, Error>;

    async fn get_sub_channel(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
    ) -> Result<Option<SubChannelInfo>, Error>;

    /// Partial merge: fields left `None` in `update` are preserved.
    /// `last_updated` is always refreshed regardless of which fields changed.
    async fn update_sub_channel(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
        update: SubChannelCursorUpdate,
    ) -> Result<SubChannelInfo, Error>;

    async fn remove_sub_channel(&self, channel_id: &ChannelId, vm_id_fragment: &str) -> Result<(), Error>;

    async fn list_sub_channels(&self, channel_id: &ChannelId) -> Result<Vec<SubChannelInfo>, Error>;

    async fn stats(&self) -> Result<ChannelRepositoryStats, Error>;
}

/// Append-only signed-RAV log: spec §4.4.2.
#[async_trait]
pub trait RavRepository: Send + Sync {
    /// Idempotent on `(channelId, vmIdFragment, nonce)`.
    async fn save(&self, rav: SignedSubRav) -> Result<(), Error>;

    /// The RAV with the maximum nonce for this sub-channel, regardless of
    /// insertion order.
    async fn get_latest(&self, channel_id: &ChannelId, vm_id_fragment: &str) -> Result<Option<SignedSubRav>, Error>;

    /// Ordered by `(vmIdFragment, nonce)`.
    async fn list(&self, channel_id: &ChannelId) -> Result<Vec<SignedSubRav>, Error>;

    /// Highest unclaimed signed RAV per sub-channel, for the claim trigger.
    async fn get_unclaimed_ravs(&self, channel_id: &ChannelId) -> Result<Vec<(String, SignedSubRav)>, Error>;

    /// Monotonic: never moves the claim cursor backward.
    async fn mark_as_claimed(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
        nonce: u64,
        tx_hash: Option<String>,
    ) -> Result<(), Error>;

    /// Never removes RAVs above the claim cursor, nor (when
    /// `keep_latest_per_sub_channel` is set) the latest RAV per sub-channel.
    async fn cleanup(&self, policy: RavCleanupPolicy) -> Result<u64, Error>;
}

/// Unsigned payee proposals awaiting a payer signature: spec §4.4.3.
#[async_trait]
pub trait PendingSubRavRepository: Send + Sync {
    async fn save(&self, pending: PendingSubRav) -> Result<(), Error>;

    async fn find(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
        nonce: u64,
    ) -> Result<Option<PendingSubRav>, Error>;

    async fn find_latest_by_sub_channel(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
    ) -> Result<Option<PendingSubRav>, Error>;

    async fn remove(&self, channel_id: &ChannelId, vm_id_fragment: &str, nonce: u64) -> Result<(), Error>;

    async fn cleanup(&self, max_age_ms: u64) -> Result<u64, Error>;

    async fn stats(&self) -> Result<PendingSubRavStats, Error>;
}

/// Client-side observability ledger: spec §4.4.4.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create(&self, record: TransactionRecord) -> Result<(), Error>;
    async fn update(&self, record: TransactionRecord) -> Result<(), Error>;
    async fn get(&self, client_tx_ref: &str) -> Result<Option<TransactionRecord>, Error>;
    async fn list(&self, filter: &TransactionFilter, page: Pagination) -> Result<Vec<TransactionRecord>, Error>;

    /// Registers a listener invoked (best-effort, not transactionally) on
    /// every create/update. Returns a subscription id usable to unsubscribe.
    fn subscribe(&self, listener: Box<dyn Fn(TransactionEvent) + Send + Sync>) -> u64;
    fn unsubscribe(&self, subscription_id: u64);
}
