// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.
//
// To the extent possible under law, the payment-kit contributors have
// dedicated all copyright and related and neighboring rights to this
// software to the public domain worldwide.

#![recursion_limit = "256"]
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
)]

//! SubRAV receipts, payer/payee/hub clients, the billing middleware, the
//! RAV verifier and the claim trigger service that together make up an
//! off-chain micropayment channel settlement engine on top of an opaque
//! on-chain escrow contract.

#[macro_use]
extern crate amplify_derive;

pub mod claims;
pub mod client;
pub mod config;
pub mod contract;
pub mod crypto;
pub mod error;
pub mod header;
pub mod middleware;
pub mod verifier;

pub use claims::{ClaimCounters, ClaimPolicy, ClaimTriggerService};
pub use client::{HubClient, PayeeClient, PayerClient};
pub use config::{PaymentKitConfig, RetentionConfig};
pub use contract::{AssetInfo, BillingContext, CostCalculator, PaymentChannelContract, PicoUsdPrice, TxReceipt};
pub use crypto::{DidDocument, DidResolver, MockWallet, Signer, StaticDidResolver, VerificationMethod};
pub use error::{AuthError, EconomicError, Error, ErrorCode, InternalError, ProtocolError, Result, StateError, TransientError};
pub use header::{RequestPayload, ResponsePayload, PAYMENT_HEADER_NAME};
pub use middleware::{BillingMiddleware, MiddlewareDecision, RequestContext};
pub use verifier::{BillingRule, RejectionReason, Verdict, VerifyInput, VerifyOutcome};

pub use payment_storage as storage;
pub use subrav_codec as codec;
