// payment-storage: repository traits and storage backends for payment-kit.

use chrono::{DateTime, Utc};
use subrav_codec::{Amount, ChannelId};

/// Lifecycle state of an on-chain channel, mirrored locally.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "sql", derive(sqlx::Type))]
#[cfg_attr(feature = "sql", sqlx(type_name = "text", rename_all = "lowercase"))]
pub enum ChannelStatus {
    #[display("active")]
    Active,
    #[display("closing")]
    Closing,
    #[display("closed")]
    Closed,
}

/// Chain-sourced channel metadata, cached locally (spec's `ChannelInfo`).
///
/// `chain_id` is resolved from the contract once, at channel-open time, and
/// held fixed for the channel's lifetime: every sub-channel and RAV under it
/// carries the same value.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChannelInfo {
    pub channel_id: ChannelId,
    pub payer_did: String,
    pub payee_did: String,
    pub asset_id: String,
    pub chain_id: u64,
    pub epoch: u64,
    pub status: ChannelStatus,
}

/// Filter applied to [`super::ChannelRepository::list_channels`].
#[derive(Clone, Default, Debug)]
pub struct ChannelFilter {
    pub payer_did: Option<String>,
    pub payee_did: Option<String>,
    pub status: Option<ChannelStatus>,
    pub asset_id: Option<String>,
}

/// Offset/limit pagination shared by every `list` operation.
#[derive(Clone, Copy, Debug)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination { offset: 0, limit: 100 }
    }
}

/// Per-sub-channel cursor: the locally mirrored view of on-chain claim state
/// (spec's `SubChannelInfo`).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SubChannelInfo {
    pub channel_id: ChannelId,
    pub epoch: u64,
    pub vm_id_fragment: String,
    pub last_claimed_amount: Amount,
    pub last_confirmed_nonce: u64,
    pub last_updated: DateTime<Utc>,
}

/// Partial update applied to a [`SubChannelInfo`] cursor; unset fields are
/// left untouched (spec §4.4.1's "partial merge" invariant).
#[derive(Clone, Default, Debug)]
pub struct SubChannelCursorUpdate {
    pub epoch: Option<u64>,
    pub last_claimed_amount: Option<Amount>,
    pub last_confirmed_nonce: Option<u64>,
}

/// An unsigned SubRAV the payee has offered but not yet received back
/// signed (spec's `PendingSubRAV`).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PendingSubRav {
    pub channel_id: ChannelId,
    pub vm_id_fragment: String,
    pub nonce: u64,
    pub sub_rav: subrav_codec::SubRav,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters returned by each repository's `stats` operation.
#[derive(Clone, Copy, Default, Debug)]
pub struct ChannelRepositoryStats {
    pub channel_count: u64,
    pub sub_channel_count: u64,
}

#[derive(Clone, Copy, Default, Debug)]
pub struct PendingSubRavStats {
    pub pending_count: u64,
}

/// Status of a client-observable request, recorded in the observability
/// ledger (spec's `TransactionRecord`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TransactionStatus {
    #[display("pending")]
    Pending,
    #[display("free")]
    Free,
    #[display("paid")]
    Paid,
    #[display("error")]
    Error,
}

/// Snapshot of the payment that accompanied one request, if any.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct PaymentSnapshot {
    pub cost: Option<Amount>,
    pub cost_usd: Option<String>,
    pub nonce: Option<u64>,
    pub service_tx_ref: Option<String>,
}

/// One entry in the client's observability ledger.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TransactionRecord {
    pub client_tx_ref: String,
    pub protocol: String,
    pub target: String,
    pub stream: bool,
    pub channel_id: Option<ChannelId>,
    pub vm_id_fragment: Option<String>,
    pub asset_id: Option<String>,
    pub payment: PaymentSnapshot,
    pub status: TransactionStatus,
    pub status_code: Option<u16>,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Filter applied to [`super::TransactionStore::list`].
#[derive(Clone, Default, Debug)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub channel_id: Option<ChannelId>,
    pub protocol: Option<String>,
}

/// Event emitted by [`super::TransactionStore::subscribe`].
#[derive(Clone, Debug)]
pub enum TransactionEvent {
    Created(TransactionRecord),
    Updated(TransactionRecord),
}

/// Parameters for [`super::RavRepository::cleanup`].
#[derive(Clone, Copy, Debug)]
pub struct RavCleanupPolicy {
    pub retention_days: u32,
    pub keep_latest_per_sub_channel: bool,
}
