//! Property-based tests for the wire format.
//!
//! These validate the framing invariants across randomly generated inputs:
//! lossless serialize/parse round trips, cursor-ordered payload consumption,
//! and checksum sensitivity to corruption.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use dualport::core::codec::{self, PacketFlag, HEADER_LEN, MAX_PAYLOAD};
use dualport::{ClientId, Packet};
use proptest::prelude::*;

proptest! {
    // Any payload survives a serialize/parse round trip untouched.
    #[test]
    fn prop_serialize_parse_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 0..MAX_PAYLOAD),
        data_id in 7u16..=u16::MAX,
        sender in any::<ClientId>(),
        with_checksum in any::<bool>(),
        with_sender in any::<bool>(),
    ) {
        let mut pack = Packet::with_data_id(data_id);
        pack.add_bytes(&payload).unwrap();
        pack.finalize(with_checksum, with_sender, sender);

        let wire = pack.serialize().to_vec();
        let parsed = Packet::from_frame(&wire).expect("parses");

        prop_assert_eq!(parsed.data_id(), data_id);
        prop_assert_eq!(parsed.payload(), &payload[..]);
        prop_assert_eq!(parsed.flag(PacketFlag::Checksum), with_checksum);
        prop_assert_eq!(parsed.flag(PacketFlag::UdpSupport), with_sender);
        if with_sender {
            prop_assert_eq!(parsed.sender_id(), sender);
        }
        if with_checksum {
            prop_assert_eq!(parsed.checksum(), pack.checksum());
        }
        prop_assert!(parsed.is_valid());
    }

    // Values come back out in the order they went in.
    #[test]
    fn prop_typed_values_roundtrip_in_order(values in prop::collection::vec(any::<u32>(), 0..300)) {
        let mut pack = Packet::with_data_id(7);
        for &value in &values {
            pack.add::<u32>(value).unwrap();
        }
        pack.reset();
        for &value in &values {
            prop_assert_eq!(pack.remove::<u32>().unwrap(), value);
        }
        prop_assert_eq!(pack.remaining_payload(), 0);
    }

    // Strings round trip alongside scalars.
    #[test]
    fn prop_strings_roundtrip(text in "\\PC{0,200}", number in any::<i64>()) {
        let mut pack = Packet::with_data_id(7);
        pack.add_string(&text).unwrap();
        pack.add::<i64>(number).unwrap();
        pack.reset();
        prop_assert_eq!(pack.remove_string().unwrap(), text);
        prop_assert_eq!(pack.remove::<i64>().unwrap(), number);
    }

    // Flipping any single payload byte of a checksummed packet is caught.
    #[test]
    fn prop_checksum_catches_single_byte_corruption(
        payload in prop::collection::vec(any::<u8>(), 1..512),
        flip in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut pack = Packet::with_data_id(9);
        pack.add_bytes(&payload).unwrap();
        pack.finalize(true, true, 3);

        let mut wire = pack.serialize().to_vec();
        let index = HEADER_LEN + flip.index(payload.len());
        wire[index] ^= 1 << bit;

        let parsed = Packet::from_frame(&wire).expect("parses");
        prop_assert!(!parsed.is_valid());
    }

    // Header peeking agrees with what was serialized, and frames shorter
    // than frame_len are recognized as incomplete.
    #[test]
    fn prop_frame_scan_respects_boundaries(
        payload in prop::collection::vec(any::<u8>(), 0..256),
        cut in any::<prop::sample::Index>(),
    ) {
        let mut pack = Packet::with_data_id(12);
        pack.add_bytes(&payload).unwrap();
        pack.finalize(true, false, 0);
        let wire = pack.serialize().to_vec();

        let header = codec::peek_header(&wire).expect("header");
        prop_assert_eq!(header.payload_len as usize, payload.len());
        prop_assert_eq!(codec::frame_len(&header), wire.len());

        let cut = cut.index(wire.len());
        if cut < HEADER_LEN {
            prop_assert!(codec::peek_header(&wire[..cut]).is_none());
        } else {
            let short = codec::peek_header(&wire[..cut]).expect("header");
            prop_assert!(codec::frame_len(&short) > cut);
        }
    }
}
