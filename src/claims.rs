// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

//! ClaimTriggerService (C10): an event-driven, single-process scheduler that
//! coalesces many small off-chain receipts into periodic on-chain claims.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use payment_storage::{ChannelRepository, RavRepository, SubChannelCursorUpdate};
use subrav_codec::{Amount, ChannelId};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::contract::PaymentChannelContract;
use crate::error::Result;

/// Tunable policy, with the documented defaults from spec §4.9.
#[derive(Clone, Copy, Debug, serde_crate::Serialize, serde_crate::Deserialize)]
#[serde(crate = "serde_crate", default)]
pub struct ClaimPolicy {
    pub min_claim_amount: Amount,
    pub max_concurrent_claims: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub require_hub_balance: bool,
    pub insufficient_funds_backoff_ms: u64,
    pub count_insufficient_as_failure: bool,
    pub tick_interval_ms: u64,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        ClaimPolicy {
            min_claim_amount: Amount::from_u64(10_000_000),
            max_concurrent_claims: 10,
            max_retries: 3,
            retry_delay_ms: 60_000,
            require_hub_balance: true,
            insufficient_funds_backoff_ms: 30_000,
            count_insufficient_as_failure: false,
            tick_interval_ms: 1_000,
        }
    }
}

type SubChannelKey = (ChannelId, String);

struct QueueEntry {
    delta: Amount,
    attempts: u32,
    next_retry_at: std::time::Instant,
    #[allow(dead_code)]
    created_at: std::time::Instant,
}

#[derive(Default)]
struct Counters {
    success: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    insufficient_funds: AtomicU64,
    total_processing_ms: AtomicU64,
}

/// Snapshot of [`ClaimTriggerService`]'s counters, for observability.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClaimCounters {
    pub success_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    pub insufficient_funds_count: u64,
    pub total_processing_time_ms: u64,
}

struct Inner {
    contract: Arc<dyn PaymentChannelContract>,
    channels: Arc<dyn ChannelRepository>,
    ravs: Arc<dyn RavRepository>,
    policy: ClaimPolicy,
    queue: Mutex<HashMap<SubChannelKey, QueueEntry>>,
    active: Mutex<HashSet<SubChannelKey>>,
    semaphore: Semaphore,
    counters: Counters,
}

/// Coalesces claim requests across sub-channels and drains them on a
/// background timer, honouring `maxConcurrentClaims` and the
/// one-in-flight-claim-per-sub-channel guarantee of spec §5.
pub struct ClaimTriggerService {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ClaimTriggerService {
    pub fn new(
        contract: Arc<dyn PaymentChannelContract>,
        channels: Arc<dyn ChannelRepository>,
        ravs: Arc<dyn RavRepository>,
        policy: ClaimPolicy,
    ) -> Arc<Self> {
        let inner = Arc::new(Inner {
            contract,
            channels,
            ravs,
            semaphore: Semaphore::new(policy.max_concurrent_claims),
            policy,
            queue: Mutex::new(HashMap::new()),
            active: Mutex::new(HashSet::new()),
            counters: Counters::default(),
        });
        let service = Arc::new(ClaimTriggerService { inner, worker: Mutex::new(None) });
        service.clone().spawn_worker();
        service
    }

    fn spawn_worker(self: Arc<Self>) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(inner.policy.tick_interval_ms));
            loop {
                ticker.tick().await;
                Inner::drain_ready(inner.clone()).await;
            }
        });
        // Swallow the lock: this only runs once, from `new`, before any
        // caller can observe `self.worker`.
        if let Ok(mut slot) = self.worker.try_lock() {
            *slot = Some(handle);
        }
    }

    /// Spec §4.9's `maybeQueue`: skip below `minClaimAmount`, if the
    /// sub-channel already has a claim in flight, or if the global
    /// `active + queued` cap is reached; otherwise enqueue or update the
    /// stored delta in place.
    pub async fn maybe_queue(&self, channel_id: ChannelId, vm_id_fragment: &str, delta: Amount) {
        if delta < self.inner.policy.min_claim_amount {
            return;
        }
        let key = (channel_id, vm_id_fragment.to_string());
        if self.inner.active.lock().await.contains(&key) {
            return;
        }

        let mut queue = self.inner.queue.lock().await;
        if let Some(entry) = queue.get_mut(&key) {
            entry.delta = delta;
            return;
        }
        let active_count = self.inner.active.lock().await.len();
        if active_count + queue.len() >= self.inner.policy.max_concurrent_claims {
            // Global in-flight cap (active + queued) reached; drop silently,
            // the next maybeQueue call for this sub-channel will retry.
            debug!(?channel_id, vm_id_fragment, "claim queue at capacity, dropping enqueue");
            return;
        }
        queue.insert(
            key,
            QueueEntry { delta, attempts: 0, next_retry_at: std::time::Instant::now(), created_at: std::time::Instant::now() },
        );
    }

    pub fn counters(&self) -> ClaimCounters {
        ClaimCounters {
            success_count: self.inner.counters.success.load(Ordering::Relaxed),
            failed_count: self.inner.counters.failed.load(Ordering::Relaxed),
            skipped_count: self.inner.counters.skipped.load(Ordering::Relaxed),
            insufficient_funds_count: self.inner.counters.insufficient_funds.load(Ordering::Relaxed),
            total_processing_time_ms: self.inner.counters.total_processing_ms.load(Ordering::Relaxed),
        }
    }

    /// Stops the background timer. In-flight tasks already spawned complete
    /// and record their result; they are not cancelled.
    pub async fn destroy(&self) {
        if let Some(handle) = self.worker.lock().await.take() {
            handle.abort();
        }
    }
}

impl Inner {
    async fn drain_ready(self: Arc<Self>) {
        let now = std::time::Instant::now();
        let ready: Vec<SubChannelKey> = {
            let mut queue = self.queue.lock().await;
            let active = self.active.lock().await;
            let permits = self.semaphore.available_permits();
            let mut keys = Vec::new();
            for (key, entry) in queue.iter() {
                if keys.len() >= permits {
                    break;
                }
                if entry.next_retry_at <= now && !active.contains(key) {
                    keys.push(key.clone());
                }
            }
            for key in &keys {
                queue.remove(key);
            }
            keys
        };

        for key in ready {
            self.active.lock().await.insert(key.clone());
            let inner = self.clone();
            tokio::spawn(async move {
                inner.run_one(key).await;
            });
        }
    }

    async fn run_one(self: Arc<Self>, key: SubChannelKey) {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let started = std::time::Instant::now();
        let (channel_id, vm_id_fragment) = key.clone();

        let outcome = self.attempt_claim(&channel_id, &vm_id_fragment).await;
        self.counters.total_processing_ms.fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);

        match outcome {
            Ok(ClaimOutcome::Success) => {
                self.counters.success.fetch_add(1, Ordering::Relaxed);
            }
            Ok(ClaimOutcome::InsufficientFunds { delta }) => {
                self.counters.insufficient_funds.fetch_add(1, Ordering::Relaxed);
                if self.policy.count_insufficient_as_failure {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                self.reschedule(key.clone(), delta, self.policy.insufficient_funds_backoff_ms, u32::MAX)
                    .await;
            }
            Ok(ClaimOutcome::NothingToClaim) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!(?channel_id, vm_id_fragment, error = %err, "claim attempt failed");
                self.fail_or_retry(key.clone()).await;
            }
        }

        self.active.lock().await.remove(&key);
    }

    async fn fail_or_retry(self: &Arc<Self>, key: SubChannelKey) {
        let mut queue = self.queue.lock().await;
        let attempts = queue.get(&key).map_or(1, |e| e.attempts + 1);
        drop(queue);

        if attempts <= self.policy.max_retries {
            let delay = self.policy.retry_delay_ms * 2u64.saturating_pow(attempts.saturating_sub(1));
            self.reschedule_with_attempts(key, Amount::ZERO, delay, attempts).await;
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn reschedule(self: &Arc<Self>, key: SubChannelKey, delta: Amount, delay_ms: u64, attempts: u32) {
        self.reschedule_with_attempts(key, delta, delay_ms, attempts).await;
    }

    async fn reschedule_with_attempts(self: &Arc<Self>, key: SubChannelKey, delta: Amount, delay_ms: u64, attempts: u32) {
        let mut queue = self.queue.lock().await;
        let entry = queue.entry(key).or_insert_with(|| QueueEntry {
            delta,
            attempts: 0,
            next_retry_at: std::time::Instant::now(),
            created_at: std::time::Instant::now(),
        });
        if !delta.is_zero() {
            entry.delta = delta;
        }
        entry.attempts = attempts;
        entry.next_retry_at = std::time::Instant::now() + Duration::from_millis(delay_ms);
    }

    /// The work unit of spec §4.9: fetch the latest RAV, compute the delta,
    /// hub-balance precheck, submit the claim, and advance the cursor
    /// atomically with respect to other claim tasks for the same
    /// sub-channel (guaranteed by the caller holding this key's `active`
    /// membership for the task's lifetime).
    async fn attempt_claim(&self, channel_id: &ChannelId, vm_id_fragment: &str) -> Result<ClaimOutcome> {
        let Some(latest) = self.ravs.get_latest(channel_id, vm_id_fragment).await? else {
            return Ok(ClaimOutcome::NothingToClaim);
        };
        let cursor = self.channels.get_sub_channel(channel_id, vm_id_fragment).await?;
        let last_claimed = cursor.as_ref().map_or(Amount::ZERO, |c| c.last_claimed_amount);
        let Some(delta) = latest.sub_rav.accumulated_amount.checked_sub(last_claimed) else {
            return Ok(ClaimOutcome::NothingToClaim);
        };
        if delta.is_zero() {
            return Ok(ClaimOutcome::NothingToClaim);
        }

        if self.policy.require_hub_balance {
            let channel = self.channels.get_channel(channel_id).await?;
            if let Some(channel) = channel {
                let balance = self.contract.get_hub_balance(&channel.payer_did, &channel.asset_id).await?;
                if balance < delta {
                    return Ok(ClaimOutcome::InsufficientFunds { delta });
                }
            }
        }

        self.contract.claim_from_channel(&latest).await?;
        self.ravs
            .mark_as_claimed(channel_id, vm_id_fragment, latest.sub_rav.nonce, None)
            .await?;
        self.channels
            .update_sub_channel(
                channel_id,
                vm_id_fragment,
                SubChannelCursorUpdate {
                    epoch: None,
                    last_claimed_amount: Some(latest.sub_rav.accumulated_amount),
                    last_confirmed_nonce: Some(latest.sub_rav.nonce),
                },
            )
            .await?;

        Ok(ClaimOutcome::Success)
    }
}

enum ClaimOutcome {
    Success,
    InsufficientFunds { delta: Amount },
    NothingToClaim,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use payment_storage::mem::{MemChannelRepository, MemRavRepository};
    use payment_storage::{ChannelInfo, ChannelStatus};
    use subrav_codec::{SignedSubRav, SubRav, CURRENT_VERSION};
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::contract::{AssetInfo, PicoUsdPrice, TxReceipt};

    #[test]
    fn default_policy_matches_documented_defaults() {
        let policy = ClaimPolicy::default();
        assert_eq!(policy.min_claim_amount, Amount::from_u64(10_000_000));
        assert_eq!(policy.max_concurrent_claims, 10);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_delay_ms, 60_000);
        assert!(policy.require_hub_balance);
        assert_eq!(policy.insufficient_funds_backoff_ms, 30_000);
        assert!(!policy.count_insufficient_as_failure);
    }

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let base = 60_000u64;
        let delays: Vec<u64> = (1..=3).map(|attempt| base * 2u64.saturating_pow(attempt - 1)).collect();
        assert_eq!(delays, vec![60_000, 120_000, 240_000]);
    }

    struct StubContract {
        hub_balance: Amount,
        claimed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PaymentChannelContract for StubContract {
        async fn open_channel(&self, _payer_did: &str, _payee_did: &str, _asset_id: &str) -> Result<(ChannelId, TxReceipt)> {
            unimplemented!()
        }
        async fn open_channel_with_sub_channel(
            &self,
            _payer_did: &str,
            _payee_did: &str,
            _asset_id: &str,
            _vm_id_fragment: &str,
        ) -> Result<(ChannelId, TxReceipt)> {
            unimplemented!()
        }
        async fn authorize_sub_channel(&self, _channel_id: &ChannelId, _vm_id_fragment: &str) -> Result<TxReceipt> {
            unimplemented!()
        }
        async fn claim_from_channel(&self, _signed_sub_rav: &SignedSubRav) -> Result<TxReceipt> {
            self.claimed.store(true, Ordering::SeqCst);
            Ok(TxReceipt { tx_hash: "0xdeadbeef".to_string(), block_height: Some(1) })
        }
        async fn close_channel(&self, _channel_id: &ChannelId) -> Result<TxReceipt> {
            unimplemented!()
        }
        async fn get_channel_status(&self, _channel_id: &ChannelId) -> Result<ChannelStatus> {
            Ok(ChannelStatus::Active)
        }
        async fn get_channel_epoch(&self, _channel_id: &ChannelId) -> Result<u64> {
            Ok(0)
        }
        async fn get_sub_channel(&self, _channel_id: &ChannelId, _vm_id_fragment: &str) -> Result<Option<(Amount, u64)>> {
            Ok(None)
        }
        async fn get_asset_info(&self, asset_id: &str) -> Result<AssetInfo> {
            Ok(AssetInfo { asset_id: asset_id.to_string(), decimals: 18, symbol: "TEST".to_string() })
        }
        async fn get_asset_price(&self, _asset_id: &str) -> Result<PicoUsdPrice> {
            Ok(PicoUsdPrice(0))
        }
        async fn get_chain_id(&self) -> Result<u64> {
            Ok(0)
        }
        async fn deposit_to_hub(&self, _payer_did: &str, _asset_id: &str, _amount: Amount) -> Result<TxReceipt> {
            unimplemented!()
        }
        async fn withdraw_from_hub(&self, _payer_did: &str, _asset_id: &str, _amount: Amount) -> Result<TxReceipt> {
            unimplemented!()
        }
        async fn get_hub_balance(&self, _payer_did: &str, _asset_id: &str) -> Result<Amount> {
            Ok(self.hub_balance)
        }
        async fn get_all_hub_balances(&self, _payer_did: &str) -> Result<Vec<(String, Amount)>> {
            Ok(vec![])
        }
        async fn get_active_channels_count(&self, _payer_did: &str) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn queued_claim_drains_through_the_worker_and_advances_the_cursor() {
        let channel_id = ChannelId([9; 32]);
        let channels: Arc<dyn ChannelRepository> = Arc::new(MemChannelRepository::new());
        let ravs: Arc<dyn RavRepository> = Arc::new(MemRavRepository::new());
        channels
            .set_channel(ChannelInfo {
                channel_id,
                payer_did: "did:example:payer".to_string(),
                payee_did: "did:example:payee".to_string(),
                asset_id: "asset-1".to_string(),
                chain_id: 4,
                epoch: 0,
                status: ChannelStatus::Active,
            })
            .await
            .unwrap();
        ravs.save(SignedSubRav {
            sub_rav: SubRav {
                version: CURRENT_VERSION,
                chain_id: 4,
                channel_id,
                channel_epoch: 0,
                vm_id_fragment: "account-key".to_string(),
                accumulated_amount: Amount::from_u64(50_000_000),
                nonce: 1,
            },
            signature: vec![0u8; 64],
        })
        .await
        .unwrap();

        let claimed = Arc::new(AtomicBool::new(false));
        let contract = Arc::new(StubContract { hub_balance: Amount::from_u64(1_000_000_000), claimed: claimed.clone() });
        let policy = ClaimPolicy { tick_interval_ms: 20, ..ClaimPolicy::default() };
        let service = ClaimTriggerService::new(contract, channels.clone(), ravs, policy);

        service.maybe_queue(channel_id, "account-key", Amount::from_u64(50_000_000)).await;

        timeout(Duration::from_secs(2), async {
            while !claimed.load(Ordering::SeqCst) {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("claim did not drain in time");

        let cursor = channels.get_sub_channel(&channel_id, "account-key").await.unwrap().unwrap();
        assert_eq!(cursor.last_confirmed_nonce, 1);
        assert_eq!(cursor.last_claimed_amount, Amount::from_u64(50_000_000));
        assert_eq!(service.counters().success_count, 1);
        service.destroy().await;
    }

    #[tokio::test]
    async fn below_threshold_deltas_are_never_queued() {
        let channel_id = ChannelId([10; 32]);
        let channels: Arc<dyn ChannelRepository> = Arc::new(MemChannelRepository::new());
        let ravs: Arc<dyn RavRepository> = Arc::new(MemRavRepository::new());
        let contract = Arc::new(StubContract { hub_balance: Amount::ZERO, claimed: Arc::new(AtomicBool::new(false)) });
        let service = ClaimTriggerService::new(contract, channels, ravs, ClaimPolicy::default());

        service.maybe_queue(channel_id, "account-key", Amount::from_u64(1)).await;
        assert!(service.inner.queue.lock().await.is_empty());
        service.destroy().await;
    }
}
