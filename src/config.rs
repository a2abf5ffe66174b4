// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

//! The only public tunables (spec §6): the claim service policy and
//! transaction-store retention. Everything else is protocol-determined.

use payment_storage::RavCleanupPolicy;
use serde_crate::{Deserialize, Serialize};

use crate::claims::ClaimPolicy;
use crate::error::{Error, InternalError, Result};

/// Retention knobs for the append-only RAV log and the pending-proposal
/// table, independent of `ClaimPolicy`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(crate = "serde_crate", default)]
pub struct RetentionConfig {
    pub rav_retention_days: u32,
    pub keep_latest_rav_per_sub_channel: bool,
    pub pending_sub_rav_max_age_ms: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig { rav_retention_days: 90, keep_latest_rav_per_sub_channel: true, pending_sub_rav_max_age_ms: 600_000 }
    }
}

impl RetentionConfig {
    pub fn rav_cleanup_policy(&self) -> RavCleanupPolicy {
        RavCleanupPolicy {
            retention_days: self.rav_retention_days,
            keep_latest_per_sub_channel: self.keep_latest_rav_per_sub_channel,
        }
    }
}

/// Top-level configuration, deserializable from TOML.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(crate = "serde_crate", default)]
pub struct PaymentKitConfig {
    pub claim_policy: ClaimPolicy,
    pub retention: RetentionConfig,
}

impl Default for PaymentKitConfig {
    fn default() -> Self {
        PaymentKitConfig { claim_policy: ClaimPolicy::default(), retention: RetentionConfig::default() }
    }
}

impl PaymentKitConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Internal(InternalError::Invariant(format!("invalid config: {e}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_documented_defaults() {
        let config = PaymentKitConfig::from_toml_str("").unwrap();
        assert_eq!(config.claim_policy.max_concurrent_claims, 10);
        assert_eq!(config.retention.rav_retention_days, 90);
    }

    #[test]
    fn partial_override_preserves_other_defaults() {
        let config = PaymentKitConfig::from_toml_str(
            "[claim_policy]\nmax_retries = 5\n",
        )
        .unwrap();
        assert_eq!(config.claim_policy.max_retries, 5);
        assert_eq!(config.claim_policy.max_concurrent_claims, 10);
    }
}
