// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

//! The error taxonomy shared by every component: protocol, authorization,
//! state, economic, transient and internal errors, each mapping to a stable
//! wire-level code per the billing middleware's contract.

use amplify::IoError;

/// Stable wire-level error code returned by the billing middleware.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum ErrorCode {
    #[display("PAYMENT_REQUIRED")]
    PaymentRequired,
    #[display("INVALID_PAYMENT")]
    InvalidPayment,
    #[display("UNKNOWN_SUBRAV")]
    UnknownSubRav,
    #[display("TAMPERED_SUBRAV")]
    TamperedSubRav,
    #[display("CHANNEL_CLOSED")]
    ChannelClosed,
    #[display("EPOCH_MISMATCH")]
    EpochMismatch,
    #[display("INSUFFICIENT_FUNDS")]
    InsufficientFunds,
    #[display("PAYMENT_ERROR")]
    PaymentError,
}

impl ErrorCode {
    /// The HTTP status conventionally associated with this code (spec §6/§7).
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::PaymentRequired => 402,
            ErrorCode::InvalidPayment => 400,
            ErrorCode::UnknownSubRav => 400,
            ErrorCode::TamperedSubRav => 400,
            ErrorCode::ChannelClosed => 400,
            ErrorCode::EpochMismatch => 400,
            ErrorCode::InsufficientFunds => 402,
            ErrorCode::PaymentError => 500,
        }
    }
}

/// Protocol errors: client-fault defects in the payment header or receipt
/// sequence, surfaced as `4xx` and never retried.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ProtocolError {
    /// payment header is missing, malformed, or not valid base64url(JSON)
    InvalidHeader,

    /// no pending proposal or prior RAV is known for this sub-channel
    UnknownSubChannel,

    /// signed SubRAV does not match the outstanding pending proposal
    TamperedSubRav,

    /// SubRAV nonce does not strictly follow the last accepted nonce
    NonMonotonicNonce { expected: u64, got: u64 },

    /// SubRAV channel epoch does not match the channel's current epoch
    EpochMismatch { expected: u64, got: u64 },

    /// SubRAV chain id does not match the resolved chain id
    ChainIdMismatch { expected: u64, got: u64 },

    /// malformed SubRAV wire encoding
    #[from]
    Codec(subrav_codec::Error),
}

/// Authorization errors: signature or key-resolution failures.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum AuthError {
    /// signature does not verify against the resolved public key
    InvalidSignature,

    /// verification method `{0}` is absent from the resolved DID document
    MissingKey(String),

    /// DID document's verification method uses an unsupported algorithm
    UnsupportedAlgorithm,

    /// signer's key fragment does not match the SubRAV's vmIdFragment
    KeyFragmentMismatch,
}

/// State errors: the channel or sub-channel is not in a state that permits
/// the requested operation.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum StateError {
    /// channel is not active
    ChannelClosed,

    /// sub-channel has not been authorised on-chain
    SubChannelNotAuthorized,
}

/// Economic errors: insufficient value or a breached ceiling.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum EconomicError {
    /// hub balance {balance} is insufficient to cover the requested claim of {requested}
    InsufficientHubBalance { balance: String, requested: String },

    /// request cost {cost} exceeds the caller-supplied ceiling of {max}
    CostExceedsCeiling { cost: String, max: String },
}

/// Transient errors: retryable failures in an external collaborator.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum TransientError {
    /// on-chain contract call failed
    ChainRpc(String),

    /// storage backend operation failed
    #[from]
    Storage(payment_storage::Error),

    /// outbound call exceeded its deadline
    Timeout,
}

/// Internal errors: defects in this process rather than caller input.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum InternalError {
    /// I/O error
    #[from(std::io::Error)]
    #[display(inner)]
    Io(IoError),

    /// JSON encoding/decoding failure: {0}
    Json(String),

    /// internal invariant violated: {0}
    Invariant(String),
}

/// The union of every error category a payment-kit operation can produce.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(inner)]
pub enum Error {
    #[from]
    Protocol(ProtocolError),
    #[from]
    Auth(AuthError),
    #[from]
    State(StateError),
    #[from]
    Economic(EconomicError),
    #[from]
    Transient(TransientError),
    #[from]
    Internal(InternalError),
}

impl From<payment_storage::Error> for Error {
    fn from(e: payment_storage::Error) -> Self {
        Error::Transient(TransientError::Storage(e))
    }
}

impl From<subrav_codec::Error> for Error {
    fn from(e: subrav_codec::Error) -> Self {
        Error::Protocol(ProtocolError::Codec(e))
    }
}

impl Error {
    /// The stable wire-level code the billing middleware reports for this
    /// error, where one applies (internal/transient errors surface as 500
    /// and have no single dedicated code).
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            Error::Protocol(ProtocolError::InvalidHeader) => ErrorCode::InvalidPayment,
            Error::Protocol(ProtocolError::UnknownSubChannel) => ErrorCode::UnknownSubRav,
            Error::Protocol(ProtocolError::TamperedSubRav) => ErrorCode::TamperedSubRav,
            Error::Protocol(ProtocolError::NonMonotonicNonce { .. }) => ErrorCode::InvalidPayment,
            Error::Protocol(ProtocolError::EpochMismatch { .. }) => ErrorCode::EpochMismatch,
            Error::Protocol(ProtocolError::ChainIdMismatch { .. }) => ErrorCode::InvalidPayment,
            Error::Protocol(ProtocolError::Codec(_)) => ErrorCode::InvalidPayment,
            Error::Auth(_) => ErrorCode::InvalidPayment,
            Error::State(StateError::ChannelClosed) => ErrorCode::ChannelClosed,
            Error::State(StateError::SubChannelNotAuthorized) => ErrorCode::UnknownSubRav,
            Error::Economic(EconomicError::InsufficientHubBalance { .. }) => ErrorCode::InsufficientFunds,
            Error::Economic(EconomicError::CostExceedsCeiling { .. }) => ErrorCode::InvalidPayment,
            Error::Transient(_) => ErrorCode::PaymentError,
            Error::Internal(_) => ErrorCode::PaymentError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
