// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

//! Billing middleware (C8): orchestrates the deferred-payment protocol
//! around an otherwise ordinary application request.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use payment_storage::{
    ChannelRepository, PendingSubRav, PendingSubRavRepository, PaymentSnapshot, RavRepository, TransactionRecord,
    TransactionStatus, TransactionStore,
};
use subrav_codec::{Amount, ChannelId, SignedSubRav, SubRav, CURRENT_VERSION};
use tokio::sync::Mutex as AsyncMutex;

use crate::claims::ClaimTriggerService;
use crate::contract::{BillingContext, CostCalculator};
use crate::crypto::DidResolver;
use crate::error::{Error, ProtocolError, Result};
use crate::header::{self, RequestPayload, ResponsePayload};
use crate::verifier::{self, BillingRule, RejectionReason, VerifyInput, VerifyOutcome, Verdict};

/// The application-level context the middleware needs, gathered by the
/// framework-specific adapter before calling [`BillingMiddleware::handle`].
pub struct RequestContext {
    pub service_id: String,
    pub operation: String,
    pub asset_id: String,
    pub protocol: String,
    pub target: String,
    pub stream: bool,
    pub payer_did: String,
    pub meta: serde_json::Value,
    pub payment_header: Option<String>,
    /// The sub-channel this request bills against, established out-of-band
    /// (e.g. at connection setup) and independent of whether the client has
    /// already received a proposal to sign. Required once cost is nonzero;
    /// a header's signed receipt must name the same sub-channel if both are
    /// present.
    pub sub_channel: Option<(ChannelId, String)>,
}

/// What the middleware decided to do with this request.
pub enum MiddlewareDecision {
    /// Short-circuit with this HTTP status, error code and message; the
    /// application handler must not run.
    ShortCircuit { status: u16, error_code: &'static str, message: String, outstanding: Option<SubRav> },
    /// The application handler should run; attach `response_header` to its
    /// response once produced via [`BillingMiddleware::finalize`].
    Proceed { channel_id: ChannelId, vm_id_fragment: String, cost: Amount },
}

pub struct BillingMiddleware {
    channels: Arc<dyn ChannelRepository>,
    ravs: Arc<dyn RavRepository>,
    pending: Arc<dyn PendingSubRavRepository>,
    transactions: Arc<dyn TransactionStore>,
    resolver: Option<Arc<dyn DidResolver>>,
    cost_calculator: Arc<dyn CostCalculator>,
    claim_service: Option<Arc<ClaimTriggerService>>,
    locks: AsyncMutex<HashMap<(ChannelId, String), Arc<AsyncMutex<()>>>>,
}

impl BillingMiddleware {
    pub fn new(
        channels: Arc<dyn ChannelRepository>,
        ravs: Arc<dyn RavRepository>,
        pending: Arc<dyn PendingSubRavRepository>,
        transactions: Arc<dyn TransactionStore>,
        resolver: Option<Arc<dyn DidResolver>>,
        cost_calculator: Arc<dyn CostCalculator>,
        claim_service: Option<Arc<ClaimTriggerService>>,
    ) -> Self {
        BillingMiddleware {
            channels,
            ravs,
            pending,
            transactions,
            resolver,
            cost_calculator,
            claim_service,
            locks: AsyncMutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, channel_id: ChannelId, vm_id_fragment: &str) -> Arc<AsyncMutex<()>> {
        let key = (channel_id, vm_id_fragment.to_string());
        let mut locks = self.locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Runs steps 1–4 of spec §4.8. Returns a decision; on `Proceed` the
    /// caller should run the application handler next and call
    /// [`Self::finalize`] with its outcome.
    pub async fn handle(&self, ctx: &RequestContext, client_tx_ref: &str) -> Result<MiddlewareDecision> {
        if let Some(prior) = self.transactions.get(client_tx_ref).await? {
            if prior.status == TransactionStatus::Paid || prior.status == TransactionStatus::Free {
                // Idempotent replay of a completed request: nothing to redo.
                return Ok(MiddlewareDecision::ShortCircuit {
                    status: 200,
                    error_code: "",
                    message: "idempotent replay".to_string(),
                    outstanding: None,
                });
            }
        }

        let request_payload = ctx
            .payment_header
            .as_deref()
            .map(header::decode_request)
            .transpose()?;

        let billing_context =
            BillingContext { service_id: ctx.service_id.clone(), operation: ctx.operation.clone(), asset_id: ctx.asset_id.clone(), meta: ctx.meta.clone() };
        let cost = self.cost_calculator.cost_of(&billing_context).await?;

        let signed_owned = request_payload.as_ref().and_then(|p| p.signed_sub_rav.clone());
        let signed_from_header = signed_owned.as_ref().map(|s| (s.sub_rav.channel_id, s.sub_rav.vm_id_fragment.clone()));

        if let (Some(ctx_sub), Some(header_sub)) = (&ctx.sub_channel, &signed_from_header) {
            if ctx_sub != header_sub {
                return Err(Error::Protocol(ProtocolError::InvalidHeader));
            }
        }

        let sub_channel = ctx.sub_channel.clone().or_else(|| signed_from_header.clone());

        if cost.is_zero() {
            let (channel_id, vm_id_fragment) = sub_channel.unwrap_or((ChannelId::from_bytes([0; 32]), String::new()));
            return Ok(MiddlewareDecision::Proceed { channel_id, vm_id_fragment, cost });
        }

        let Some((channel_id, vm_id_fragment)) = sub_channel else {
            return Err(Error::Protocol(ProtocolError::UnknownSubChannel));
        };

        let guard = self.lock_for(channel_id, &vm_id_fragment).await;
        let _permit = guard.lock().await;

        let channel_info = self
            .channels
            .get_channel(&channel_id)
            .await?
            .ok_or(Error::Protocol(ProtocolError::UnknownSubChannel))?;
        if !ctx.payer_did.is_empty() && ctx.payer_did != channel_info.payer_did {
            return Err(Error::Protocol(ProtocolError::UnknownSubChannel));
        }
        let sub_channel_state = self.channels.get_sub_channel(&channel_id, &vm_id_fragment).await?;
        let latest_pending = self.pending.find_latest_by_sub_channel(&channel_id, &vm_id_fragment).await?;
        let signed = signed_owned.as_ref();

        let expected_chain_id = channel_info.chain_id;
        let outcome = verifier::verify_receipt(VerifyInput {
            channel_info: &channel_info,
            sub_channel_state: sub_channel_state.as_ref(),
            billing_rule: BillingRule { requires_payment: true },
            resolver: self.resolver.as_deref(),
            signed_sub_rav: signed,
            latest_pending_sub_rav: latest_pending.as_ref().map(|p| &p.sub_rav),
            expected_chain_id,
        })
        .await;

        match self.apply_verdict(outcome, &channel_id, &vm_id_fragment, signed, latest_pending.as_ref()).await? {
            Some(decision) => Ok(decision),
            None => Ok(MiddlewareDecision::Proceed { channel_id, vm_id_fragment, cost }),
        }
    }

    async fn apply_verdict(
        &self,
        outcome: VerifyOutcome,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
        signed: Option<&SignedSubRav>,
        latest_pending: Option<&PendingSubRav>,
    ) -> Result<Option<MiddlewareDecision>> {
        match outcome.verdict {
            Verdict::RequireSignature402 => Ok(Some(MiddlewareDecision::ShortCircuit {
                status: 402,
                error_code: "PAYMENT_REQUIRED",
                message: "sign the outstanding proposal before proceeding".to_string(),
                outstanding: latest_pending.map(|p| p.sub_rav.clone()),
            })),
            Verdict::Conflict => Ok(Some(MiddlewareDecision::ShortCircuit {
                status: 400,
                error_code: "TAMPERED_SUBRAV",
                message: "signed SubRAV does not match the outstanding proposal".to_string(),
                outstanding: None,
            })),
            Verdict::Reject => {
                let reason = outcome.rejection.unwrap_or(RejectionReason::InvalidSignature);
                let error: Error = reason.into();
                Err(error)
            }
            Verdict::Allow => {
                if let Some(signed) = signed {
                    self.ravs.save(signed.clone()).await?;
                    if let Some(pending) = latest_pending {
                        if pending.nonce == signed.sub_rav.nonce {
                            self.pending.remove(channel_id, vm_id_fragment, pending.nonce).await?;
                        }
                    }
                    self.channels
                        .update_sub_channel(
                            channel_id,
                            vm_id_fragment,
                            payment_storage::SubChannelCursorUpdate {
                                epoch: None,
                                last_claimed_amount: None,
                                last_confirmed_nonce: Some(signed.sub_rav.nonce),
                            },
                        )
                        .await?;
                }
                Ok(None)
            }
        }
    }

    /// Step 4b–4e and §5: builds the next unsigned proposal, stores and
    /// attaches it, then notifies the claim service.
    pub async fn finalize(
        &self,
        ctx: &RequestContext,
        channel_id: ChannelId,
        vm_id_fragment: &str,
        cost: Amount,
        client_tx_ref: &str,
        status_code: Option<u16>,
    ) -> Result<Option<String>> {
        if cost.is_zero() {
            self.record_transaction(ctx, client_tx_ref, channel_id, vm_id_fragment, TransactionStatus::Free, None, status_code)
                .await?;
            return Ok(None);
        }

        let cursor = self.channels.get_sub_channel(&channel_id, vm_id_fragment).await?;
        let channel_info = self
            .channels
            .get_channel(&channel_id)
            .await?
            .ok_or(Error::Protocol(ProtocolError::UnknownSubChannel))?;
        let chain_id = channel_info.chain_id;
        let epoch = cursor.as_ref().map_or(channel_info.epoch, |c| c.epoch.max(channel_info.epoch));
        let prev_nonce = cursor.as_ref().map_or(0, |c| c.last_confirmed_nonce);
        let prev_amount = cursor.as_ref().map_or(Amount::ZERO, |c| c.last_claimed_amount);
        let next_amount = prev_amount.checked_add(cost).ok_or_else(|| {
            Error::Internal(crate::error::InternalError::Invariant("accumulated amount overflow".to_string()))
        })?;

        let next = SubRav {
            version: CURRENT_VERSION,
            chain_id,
            channel_id,
            channel_epoch: epoch,
            vm_id_fragment: vm_id_fragment.to_string(),
            accumulated_amount: next_amount,
            nonce: prev_nonce + 1,
        };

        self.pending
            .save(PendingSubRav {
                channel_id,
                vm_id_fragment: vm_id_fragment.to_string(),
                nonce: next.nonce,
                sub_rav: next.clone(),
                created_at: Utc::now(),
            })
            .await?;

        if let Some(claim_service) = &self.claim_service {
            claim_service.maybe_queue(channel_id, vm_id_fragment, cost).await;
        }

        self.record_transaction(
            ctx,
            client_tx_ref,
            channel_id,
            vm_id_fragment,
            TransactionStatus::Paid,
            Some(cost),
            status_code,
        )
        .await?;

        let response = ResponsePayload {
            sub_rav: Some(next),
            amount_debited: cost,
            client_tx_ref: client_tx_ref.to_string(),
            service_tx_ref: None,
            error_code: 0,
            message: None,
        };
        Ok(Some(header::encode_response(&response)?))
    }

    async fn record_transaction(
        &self,
        ctx: &RequestContext,
        client_tx_ref: &str,
        channel_id: ChannelId,
        vm_id_fragment: &str,
        status: TransactionStatus,
        cost: Option<Amount>,
        status_code: Option<u16>,
    ) -> Result<()> {
        let record = TransactionRecord {
            client_tx_ref: client_tx_ref.to_string(),
            protocol: ctx.protocol.clone(),
            target: ctx.target.clone(),
            stream: ctx.stream,
            channel_id: Some(channel_id),
            vm_id_fragment: Some(vm_id_fragment.to_string()),
            asset_id: Some(ctx.asset_id.clone()),
            payment: PaymentSnapshot { cost, cost_usd: None, nonce: None, service_tx_ref: None },
            status,
            status_code,
            duration_ms: None,
            created_at: Utc::now(),
        };
        self.transactions.create(record).await?;
        Ok(())
    }
}

/// A request's payment-carrying payload, decoded once and reused by both
/// `handle` and `finalize`.
pub fn decode_request_payload(header_value: &str) -> Result<RequestPayload> {
    header::decode_request(header_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use payment_storage::mem::{MemChannelRepository, MemPendingSubRavRepository, MemRavRepository, MemTransactionStore};
    use payment_storage::{ChannelInfo, ChannelStatus};
    use subrav_codec::{CanonicalEncode, ChannelId};

    use crate::crypto::{MockWallet, Signer, StaticDidResolver};

    struct FlatFee(Amount);

    #[async_trait]
    impl CostCalculator for FlatFee {
        async fn cost_of(&self, _ctx: &BillingContext) -> Result<Amount> {
            Ok(self.0)
        }
    }

    fn ctx(sub_channel: Option<(ChannelId, String)>, payment_header: Option<String>) -> RequestContext {
        RequestContext {
            service_id: "svc".to_string(),
            operation: "op".to_string(),
            asset_id: "asset-1".to_string(),
            protocol: "http".to_string(),
            target: "/v1/op".to_string(),
            stream: false,
            payer_did: String::new(),
            meta: serde_json::Value::Null,
            payment_header,
            sub_channel,
        }
    }

    async fn middleware_with_channel(
        channel_id: ChannelId,
        cost: u64,
    ) -> (BillingMiddleware, MockWallet, String) {
        let channels: Arc<dyn ChannelRepository> = Arc::new(MemChannelRepository::new());
        let ravs: Arc<dyn RavRepository> = Arc::new(MemRavRepository::new());
        let pending: Arc<dyn PendingSubRavRepository> = Arc::new(MemPendingSubRavRepository::new());
        let transactions: Arc<dyn TransactionStore> = Arc::new(MemTransactionStore::new());

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

        let mut wallet = MockWallet::new();
        let secret = secp256k1::SecretKey::from_slice(&[0x7a; 32]).unwrap();
        let key_id = "did:example:payer#account-key".to_string();
        let public = wallet.add_key(key_id.as_str(), secret);
        let mut resolver = StaticDidResolver::new();
        resolver.add_key("did:example:payer", "account-key", public);

        let middleware = BillingMiddleware::new(
            channels,
            ravs,
            pending,
            transactions,
            Some(Arc::new(resolver)),
            Arc::new(FlatFee(Amount::from_u64(cost))),
            None,
        );
        (middleware, wallet, key_id)
    }

    #[tokio::test]
    async fn first_request_on_a_known_sub_channel_proceeds_with_no_pending_yet() {
        let channel_id = ChannelId([3; 32]);
        let (middleware, _wallet, _key_id) = middleware_with_channel(channel_id, 1000).await;

        let decision = middleware
            .handle(&ctx(Some((channel_id, "account-key".to_string())), None), "tx-1")
            .await
            .unwrap();
        assert!(matches!(decision, MiddlewareDecision::Proceed { .. }));
    }

    #[tokio::test]
    async fn second_request_with_an_outstanding_proposal_and_no_signature_gets_402() {
        let channel_id = ChannelId([6; 32]);
        let (middleware, _wallet, _key_id) = middleware_with_channel(channel_id, 1000).await;
        let sub_channel = Some((channel_id, "account-key".to_string()));

        middleware
            .finalize(&ctx(sub_channel.clone(), None), channel_id, "account-key", Amount::from_u64(1000), "tx-1", None)
            .await
            .unwrap();

        let decision = middleware.handle(&ctx(sub_channel, None), "tx-2").await.unwrap();
        match decision {
            MiddlewareDecision::ShortCircuit { status, .. } => assert_eq!(status, 402),
            _ => panic!("expected a short-circuit"),
        }
    }

    #[tokio::test]
    async fn billing_without_a_known_sub_channel_is_rejected() {
        let channel_id = ChannelId([7; 32]);
        let (middleware, _wallet, _key_id) = middleware_with_channel(channel_id, 1000).await;

        let err = middleware.handle(&ctx(None, None), "tx-1").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::UnknownSubChannel)));
    }

    #[tokio::test]
    async fn free_route_proceeds_without_a_payment_header() {
        let channel_id = ChannelId([4; 32]);
        let (middleware, _wallet, _key_id) = middleware_with_channel(channel_id, 0).await;

        let decision = middleware.handle(&ctx(None, None), "tx-2").await.unwrap();
        assert!(matches!(decision, MiddlewareDecision::Proceed { .. }));
        let header = middleware
            .finalize(&ctx(None, None), ChannelId([0; 32]), "", Amount::ZERO, "tx-2", Some(200))
            .await
            .unwrap();
        assert!(header.is_none());
    }

    #[tokio::test]
    async fn signing_the_proposed_subrav_then_allows_and_issues_the_next_one() {
        let channel_id = ChannelId([5; 32]);
        let (middleware, wallet, key_id) = middleware_with_channel(channel_id, 500).await;
        let sub_channel = Some((channel_id, "account-key".to_string()));

        let next_header = middleware
            .finalize(&ctx(sub_channel.clone(), None), channel_id, "account-key", Amount::from_u64(500), "tx-3", None)
            .await
            .unwrap()
            .unwrap();
        let proposal = header::decode_response(&next_header).unwrap().sub_rav.unwrap();
        assert_eq!(proposal.nonce, 1);

        let signature = wallet.sign(&proposal.canonical_serialize(), &key_id).await.unwrap();
        let signed = SignedSubRav { sub_rav: proposal, signature };
        let request_header = header::encode_request(&RequestPayload {
            signed_sub_rav: Some(signed),
            max_amount: None,
            client_tx_ref: "tx-4".to_string(),
            version: 1,
        })
        .unwrap();

        let decision = middleware.handle(&ctx(sub_channel, Some(request_header)), "tx-4").await.unwrap();
        assert!(matches!(decision, MiddlewareDecision::Proceed { .. }));
    }
}
