//! Property-based tests for the frame codec
//!
//! These tests verify that headers and frames survive encoding, that
//! concatenated frames split back at the right boundaries, and that the
//! decoder rejects corrupted input instead of panicking.

use pulse_core::{
    payload::{PayloadCodec, PayloadItem},
    wire::{Frame, FrameHeader, MessageType, HEADER_SIZE},
    ProtocolError, RequestId,
};
use proptest::prelude::*;

/// Generate an arbitrary message type
fn arb_message_type() -> impl Strategy<Value = MessageType> {
    prop_oneof![
        Just(MessageType::ExternalRequest),
        Just(MessageType::ExternalResponse),
        Just(MessageType::PushMessage),
        Just(MessageType::InternalRequest),
        Just(MessageType::InternalResponse),
        Just(MessageType::PresenceResponse),
        Just(MessageType::PollRequest),
        Just(MessageType::IdlePoll),
        Just(MessageType::Heartbeat),
    ]
}

/// Generate an arbitrary uncompressed frame
fn arb_frame() -> impl Strategy<Value = Frame> {
    (
        arb_message_type(),
        any::<i32>(),
        any::<i32>(),
        prop::collection::vec(any::<u8>(), 0..256),
    )
        .prop_map(|(message_type, id, secondary, payload)| {
            Frame::new(message_type, RequestId::new(id), payload).with_secondary_id(secondary)
        })
}

proptest! {
    /// Property: header fields survive a byte round trip
    #[test]
    fn header_fields_survive_encoding(
        message_type in arb_message_type(),
        id in any::<i32>(),
        secondary in any::<i32>(),
        length in 0u32..=(i32::MAX as u32),
        compressed in any::<bool>(),
    ) {
        let header = FrameHeader {
            message_type,
            correlation_id: RequestId::new(id),
            secondary_id: secondary,
            payload_length: length,
            compressed,
        };
        let decoded = FrameHeader::from_bytes(&header.to_bytes()).expect("valid header");
        prop_assert_eq!(decoded, header);
    }

    /// Property: concatenated frames split back exactly
    #[test]
    fn concatenated_frames_split_exactly(frames in prop::collection::vec(arb_frame(), 0..8)) {
        let mut body = Vec::new();
        for frame in &frames {
            frame.encode_into(&mut body);
        }
        let decoded = Frame::decode_all(&body).expect("valid body");
        prop_assert_eq!(decoded, frames);
    }

    /// Property: any truncation of a non-empty body is rejected
    #[test]
    fn truncated_bodies_rejected(frame in arb_frame(), cut in 1usize..HEADER_SIZE) {
        let bytes = frame.encode();
        let end = bytes.len().saturating_sub(cut);
        let result = Frame::decode(&bytes[..end]);
        let is_truncated = matches!(result, Err(ProtocolError::Truncated { .. }));
        prop_assert!(is_truncated);
    }

    /// Property: arbitrary bytes never panic the decoder
    #[test]
    fn garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = Frame::decode_all(&bytes);
        let _ = PayloadCodec::decode(&bytes);
    }

    /// Property: compressed frames inflate to the original payload
    #[test]
    fn compression_preserves_payload(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
        let frame = Frame::new(MessageType::ExternalResponse, RequestId::new(1), payload.clone())
            .compressed()
            .expect("compression succeeds");
        prop_assert_eq!(frame.header.payload_length as usize, frame.payload.len());
        prop_assert_eq!(frame.inflated_payload(2048).expect("inflates"), payload);
    }

    /// Property: data items keep their order and content
    #[test]
    fn data_items_keep_order(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..6)) {
        let items: Vec<PayloadItem> = chunks.into_iter().map(PayloadItem::Data).collect();
        let decoded = PayloadCodec::decode(&PayloadCodec::encode(&items)).expect("valid payload");
        prop_assert_eq!(decoded, items);
    }
}

#[test]
fn test_documented_response_frame_round_trip() {
    let bytes: Vec<u8> = vec![
        0xFF, 0xFF, 4, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 5, 0, 1, 2, 3, 4, 5,
    ];
    let frames = Frame::decode_all(&bytes).expect("valid frame");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.message_type, MessageType::InternalResponse);
    assert_eq!(frames[0].header.correlation_id, RequestId::new(1));
    assert_eq!(frames[0].payload, vec![1, 2, 3, 4, 5]);
    assert_eq!(frames[0].encode(), bytes);
}

#[test]
fn test_payload_preview_is_bounded() {
    let frame = Frame::new(MessageType::ExternalResponse, RequestId::new(1), vec![0xAB; 40]);
    let preview = frame.payload_preview();
    assert!(preview.starts_with("abab"));
    assert!(preview.ends_with(".."));
    assert_eq!(preview.len(), 16 * 2 + 2);
}
