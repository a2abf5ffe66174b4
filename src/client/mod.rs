// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

//! Payer, payee and hub clients (C5–C7): the channel-lifecycle and
//! receipt-issuance operations layered over the opaque contract and storage
//! capabilities.

pub mod hub;
pub mod payee;
pub mod payer;

pub use hub::HubClient;
pub use payee::PayeeClient;
pub use payer::PayerClient;
