// subrav-codec: canonical binary encoding and validation for SubRAV receipts.

use subrav_codec::{Amount, CanonicalDecode, CanonicalEncode, ChannelId, SubRav, CURRENT_VERSION};

/// Scenario 1 from the payment-kit walkthrough: a freshly-opened sub-channel
/// on chain 4, first RAV at nonce 1 with accumulated amount 10000.
#[test]
fn scenario_one_round_trips_byte_for_byte() {
    let channel_id: ChannelId = "0x35df6e7e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e3e79797c"
        .parse()
        .unwrap();

    let rav = SubRav {
        version: CURRENT_VERSION,
        chain_id: 4,
        channel_id,
        channel_epoch: 0,
        vm_id_fragment: "account-key".to_string(),
        accumulated_amount: Amount::from_u64(10_000),
        nonce: 1,
    };

    let bytes = rav.canonical_serialize();

    // version(1) + chainId(8) + channelId(32) + epoch(8) + fragment(2 + 11) +
    // amount(32) + nonce(8)
    assert_eq!(bytes.len(), 1 + 8 + 32 + 8 + 2 + 11 + 32 + 8);
    assert_eq!(bytes[0], CURRENT_VERSION);

    let decoded = SubRav::canonical_deserialize(&bytes).unwrap();
    assert_eq!(decoded, rav);
}

#[test]
fn channel_id_survives_display_and_parse() {
    let id = ChannelId([0x07; 32]);
    let round_tripped: ChannelId = id.to_string().parse().unwrap();
    assert_eq!(id, round_tripped);
}
