//! Property tests for decoder totality
//!
//! Decoders must reject payloads shorter than their span with `ShortPayload`
//! and never panic on any payload of at least that length.

use can_telemetry::signals::ByteOrder;
use can_telemetry::{DecodeError, FieldSpec, SignalKind};
use proptest::prelude::*;

fn any_kind() -> impl Strategy<Value = SignalKind> {
    (0..SignalKind::ALL.len()).prop_map(|index| SignalKind::ALL[index])
}

fn any_field() -> impl Strategy<Value = FieldSpec> {
    (0u16..64)
        .prop_flat_map(|start| (Just(start), 1u16..=64 - start, any::<bool>(), any::<bool>()))
        .prop_map(|(start, length, big_endian, signed)| {
            let byte_order = if big_endian {
                ByteOrder::BigEndian
            } else {
                ByteOrder::LittleEndian
            };
            FieldSpec::new(start, length)
                .with_byte_order(byte_order)
                .with_signed(signed)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Any built-in decoder given fewer bytes than it needs reports the shortfall.
    #[test]
    fn prop_truncated_builtin_payload_is_short(
        kind in any_kind(),
        data in proptest::collection::vec(any::<u8>(), 8),
        cut in 0usize..8,
    ) {
        let len = cut % kind.required_len();
        let result = kind.decode(&data[..len]);
        prop_assert_eq!(
            result,
            Err(DecodeError::ShortPayload { required: kind.required_len(), actual: len })
        );
    }

    /// Any payload at least as long as the span decodes.
    #[test]
    fn prop_full_builtin_payload_decodes(
        kind in any_kind(),
        data in proptest::collection::vec(any::<u8>(), 8),
    ) {
        prop_assert!(kind.decode(&data[..kind.required_len()]).is_ok());
        prop_assert!(kind.decode(&data).is_ok());
    }

    /// Field decoders follow the same contract for every layout.
    #[test]
    fn prop_field_decoder_total(
        spec in any_field(),
        data in proptest::collection::vec(any::<u8>(), 0..=8),
    ) {
        let result = spec.decode(&data);
        if data.len() < spec.required_len() {
            let is_short = matches!(result, Err(DecodeError::ShortPayload { .. }));
            prop_assert!(is_short);
        } else {
            prop_assert!(result.is_ok());
        }
    }

    /// Decoding is deterministic and does not touch the input.
    #[test]
    fn prop_decode_is_pure(
        kind in any_kind(),
        data in proptest::collection::vec(any::<u8>(), 8),
    ) {
        let before = data.clone();
        let first = kind.decode(&data);
        let second = kind.decode(&data);
        prop_assert_eq!(first, second);
        prop_assert_eq!(before, data);
    }
}
