// payment-kit: chain-agnostic off-chain micropayment channel settlement engine.

//! Payment header codec (C3): a single application-defined header carrying
//! base64url(JSON) with big integers serialized as decimal strings.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_crate::{Deserialize, Serialize};
use subrav_codec::{Amount, SignedSubRav};

use crate::error::{Error, InternalError, ProtocolError, Result};

/// Name of the HTTP header carrying the payment payload.
pub const PAYMENT_HEADER_NAME: &str = "X-Payment-Channel-Data";

/// The payer's request-side payload: a signed receipt plus request metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(crate = "serde_crate")]
pub struct RequestPayload {
    #[serde(rename = "signedSubRav")]
    pub signed_sub_rav: Option<SignedSubRav>,
    #[serde(rename = "maxAmount")]
    pub max_amount: Option<Amount>,
    #[serde(rename = "clientTxRef")]
    pub client_tx_ref: String,
    pub version: u8,
}

/// The payee's response-side payload: the next unsigned proposal plus the
/// outcome of this request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(crate = "serde_crate")]
pub struct ResponsePayload {
    #[serde(rename = "subRav")]
    pub sub_rav: Option<subrav_codec::SubRav>,
    #[serde(rename = "amountDebited")]
    pub amount_debited: Amount,
    #[serde(rename = "clientTxRef")]
    pub client_tx_ref: String,
    #[serde(rename = "serviceTxRef")]
    pub service_tx_ref: Option<String>,
    #[serde(rename = "errorCode")]
    pub error_code: u32,
    pub message: Option<String>,
}

fn encode<T: Serialize>(payload: &T) -> Result<String> {
    let json = serde_json::to_vec(payload).map_err(|e| Error::Internal(InternalError::Json(e.to_string())))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode<T: for<'de> Deserialize<'de>>(header_value: &str) -> Result<T> {
    let json = URL_SAFE_NO_PAD
        .decode(header_value)
        .map_err(|_| Error::Protocol(ProtocolError::InvalidHeader))?;
    serde_json::from_slice(&json).map_err(|_| Error::Protocol(ProtocolError::InvalidHeader))
}

pub fn encode_request(payload: &RequestPayload) -> Result<String> {
    encode(payload)
}

pub fn decode_request(header_value: &str) -> Result<RequestPayload> {
    decode(header_value)
}

pub fn encode_response(payload: &ResponsePayload) -> Result<String> {
    encode(payload)
}

pub fn decode_response(header_value: &str) -> Result<ResponsePayload> {
    decode(header_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use subrav_codec::{ChannelId, SubRav, CURRENT_VERSION};

    fn sample_signed() -> SignedSubRav {
        SignedSubRav {
            sub_rav: SubRav {
                version: CURRENT_VERSION,
                chain_id: 4,
                channel_id: ChannelId([1; 32]),
                channel_epoch: 0,
                vm_id_fragment: "account-key".to_string(),
                accumulated_amount: Amount::from_u64(10_000),
                nonce: 1,
            },
            signature: vec![0xaa; 65],
        }
    }

    #[test]
    fn request_payload_round_trips() {
        let payload = RequestPayload {
            signed_sub_rav: Some(sample_signed()),
            max_amount: Some(Amount::from_u64(50_000)),
            client_tx_ref: "tx-1".to_string(),
            version: 1,
        };
        let encoded = encode_request(&payload).unwrap();
        let decoded = decode_request(&encoded).unwrap();
        assert_eq!(decoded.client_tx_ref, "tx-1");
        assert_eq!(decoded.signed_sub_rav.unwrap().sub_rav.nonce, 1);
    }

    #[test]
    fn large_integers_preserve_precision_as_decimal_strings() {
        let huge = "123456789012345678901234567890123456789012345678901234567890";
        let payload = ResponsePayload {
            sub_rav: None,
            amount_debited: huge.parse().unwrap(),
            client_tx_ref: "tx-2".to_string(),
            service_tx_ref: None,
            error_code: 0,
            message: None,
        };
        let encoded = encode_response(&payload).unwrap();
        assert!(!encoded.contains('+'));
        let decoded = decode_response(&encoded).unwrap();
        assert_eq!(decoded.amount_debited.to_string(), huge);
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(matches!(
            decode_request("not-valid-base64url!!!"),
            Err(Error::Protocol(ProtocolError::InvalidHeader))
        ));
    }
}
