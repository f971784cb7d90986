//! Wire format for frames exchanged with the back end
//!
//! Every frame is a fixed 16-byte header followed by the payload:
//!
//! ```text
//! delimiter(2) | msgType(1) | correlationId(i32) | secondaryId(i32) | payloadLength(i32) | compression(1) | payload
//! ```
//!
//! All integers are big-endian. The same per-frame encoding is used by the
//! persistent socket and inside polling transport POST bodies.

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression as ZlibCompression};
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::types::RequestId;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Fixed pattern opening every frame
pub const FRAME_DELIMITER: [u8; 2] = [0xFF, 0xFF];

/// Size of the fixed frame header
pub const HEADER_SIZE: usize = 16;

/// Minimum payload size worth compressing
pub const COMPRESSION_THRESHOLD: usize = 512;

// ----------------------------------------------------------------------------
// Message Types
// ----------------------------------------------------------------------------

/// Frame message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    ExternalRequest = 0,
    ExternalResponse = 1,
    PushMessage = 2,
    InternalRequest = 3,
    InternalResponse = 4,
    PresenceResponse = 5,
    PollRequest = 6,
    /// Empty keep-alive reply, never decoded
    IdlePoll = 7,
    Heartbeat = 10,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(MessageType::ExternalRequest),
            1 => Ok(MessageType::ExternalResponse),
            2 => Ok(MessageType::PushMessage),
            3 => Ok(MessageType::InternalRequest),
            4 => Ok(MessageType::InternalResponse),
            5 => Ok(MessageType::PresenceResponse),
            6 => Ok(MessageType::PollRequest),
            7 => Ok(MessageType::IdlePoll),
            10 => Ok(MessageType::Heartbeat),
            other => Err(ProtocolError::UnknownMessageType {
                message_type: other,
            }),
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Whether frames of this type flow from the server to the client
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            MessageType::ExternalResponse
                | MessageType::PushMessage
                | MessageType::InternalResponse
                | MessageType::PresenceResponse
                | MessageType::IdlePoll
        )
    }
}

// ----------------------------------------------------------------------------
// Frame Header
// ----------------------------------------------------------------------------

/// Decoded fixed-size frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub correlation_id: RequestId,
    pub secondary_id: i32,
    pub payload_length: u32,
    pub compressed: bool,
}

impl FrameHeader {
    /// Serialize the header
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..2].copy_from_slice(&FRAME_DELIMITER);
        bytes[2] = self.message_type.as_u8();
        bytes[3..7].copy_from_slice(&self.correlation_id.as_i32().to_be_bytes());
        bytes[7..11].copy_from_slice(&self.secondary_id.to_be_bytes());
        bytes[11..15].copy_from_slice(&(self.payload_length as i32).to_be_bytes());
        bytes[15] = u8::from(self.compressed);
        bytes
    }

    /// Parse a header from the first `HEADER_SIZE` bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let delimiter = [bytes[0], bytes[1]];
        if delimiter != FRAME_DELIMITER {
            return Err(ProtocolError::BadDelimiter { found: delimiter });
        }

        let message_type = MessageType::from_u8(bytes[2])?;
        let correlation_id = i32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
        let secondary_id = i32::from_be_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]);
        let length = i32::from_be_bytes([bytes[11], bytes[12], bytes[13], bytes[14]]);
        if length < 0 {
            return Err(ProtocolError::NegativeLength { length });
        }

        Ok(Self {
            message_type,
            correlation_id: RequestId::new(correlation_id),
            secondary_id,
            payload_length: length as u32,
            compressed: bytes[15] != 0,
        })
    }

    /// Reject payloads above `max` before allocating for them
    pub fn check_payload_size(&self, max: usize) -> Result<(), ProtocolError> {
        let actual = self.payload_length as usize;
        if actual > max {
            return Err(ProtocolError::PayloadTooLarge { max, actual });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One header plus its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create an uncompressed frame
    pub fn new(message_type: MessageType, correlation_id: RequestId, payload: Vec<u8>) -> Self {
        Self {
            header: FrameHeader {
                message_type,
                correlation_id,
                secondary_id: 0,
                payload_length: payload.len() as u32,
                compressed: false,
            },
            payload,
        }
    }

    pub fn with_secondary_id(mut self, secondary_id: i32) -> Self {
        self.header.secondary_id = secondary_id;
        self
    }

    /// Compress the payload when it is large enough to benefit
    pub fn compressed(mut self) -> Result<Self, ProtocolError> {
        if self.header.compressed || !Compression::should_compress(&self.payload) {
            return Ok(self);
        }
        self.payload = Compression::compress(&self.payload)?;
        self.header.payload_length = self.payload.len() as u32;
        self.header.compressed = true;
        Ok(self)
    }

    /// Payload with compression undone, refusing more than `max` bytes
    pub fn inflated_payload(&self, max: usize) -> Result<Vec<u8>, ProtocolError> {
        if self.header.compressed {
            Compression::decompress(&self.payload, max)
        } else {
            self.header.check_payload_size(max)?;
            Ok(self.payload.clone())
        }
    }

    /// Append the encoded frame to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
    }

    /// Hex dump of the first payload bytes for trace logging
    pub fn payload_preview(&self) -> String {
        const PREVIEW_LEN: usize = 16;
        let end = self.payload.len().min(PREVIEW_LEN);
        let mut preview = hex::encode(&self.payload[..end]);
        if self.payload.len() > PREVIEW_LEN {
            preview.push_str("..");
        }
        preview
    }

    /// Encode the frame to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        self.encode_into(&mut bytes);
        bytes
    }

    /// Decode one frame from the front of `bytes`, returning it and the bytes consumed
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let header = FrameHeader::from_bytes(bytes)?;
        let total = HEADER_SIZE + header.payload_length as usize;
        if bytes.len() < total {
            return Err(ProtocolError::Truncated {
                expected: total,
                actual: bytes.len(),
            });
        }
        let payload = bytes[HEADER_SIZE..total].to_vec();
        Ok((Self { header, payload }, total))
    }

    /// Decode a concatenation of frames such as an HTTP response body
    pub fn decode_all(mut bytes: &[u8]) -> Result<Vec<Self>, ProtocolError> {
        let mut frames = Vec::new();
        while !bytes.is_empty() {
            let (frame, consumed) = Self::decode(bytes)?;
            frames.push(frame);
            bytes = &bytes[consumed..];
        }
        Ok(frames)
    }
}

// ----------------------------------------------------------------------------
// Compression
// ----------------------------------------------------------------------------

/// Payload compression utilities
pub struct Compression;

impl Compression {
    /// Compress data using zlib
    pub fn compress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), ZlibCompression::default());
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| ProtocolError::Decompression {
                reason: format!("compression failed: {}", e),
            })
    }

    /// Decompress zlib data, stopping once the output passes `max` bytes
    pub fn decompress(data: &[u8], max: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut decoder = ZlibDecoder::new(data).take(max as u64 + 1);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| ProtocolError::Decompression {
                reason: e.to_string(),
            })?;
        if decompressed.len() > max {
            return Err(ProtocolError::PayloadTooLarge {
                max,
                actual: decompressed.len(),
            });
        }
        Ok(decompressed)
    }

    /// Check if compression would be beneficial for given data
    pub fn should_compress(data: &[u8]) -> bool {
        data.len() >= COMPRESSION_THRESHOLD
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_frame_round_trip() {
        let bytes: Vec<u8> = vec![
            0xFF, 0xFF, // delimiter
            4,    // internal response
            0, 0, 0, 1, // correlation id
            0, 0, 0, 0, // secondary id
            0, 0, 0, 5, // payload length
            0, // not compressed
            1, 2, 3, 4, 5,
        ];

        let (frame, consumed) = Frame::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(frame.header.message_type, MessageType::InternalResponse);
        assert_eq!(frame.header.correlation_id, RequestId::new(1));
        assert_eq!(frame.header.secondary_id, 0);
        assert_eq!(frame.header.payload_length, 5);
        assert!(!frame.header.compressed);
        assert_eq!(frame.payload, vec![1, 2, 3, 4, 5]);
        assert_eq!(frame.encode(), bytes);
    }

    #[test]
    fn test_bad_delimiter_rejected() {
        let mut bytes = Frame::new(MessageType::IdlePoll, RequestId::PUSH, vec![]).encode();
        bytes[1] = 0x00;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(ProtocolError::BadDelimiter { .. })
        ));
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut bytes = Frame::new(MessageType::IdlePoll, RequestId::PUSH, vec![]).encode();
        bytes[11..15].copy_from_slice(&(-3i32).to_be_bytes());
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::NegativeLength { length: -3 })
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let bytes = Frame::new(MessageType::ExternalResponse, RequestId::new(3), vec![9; 10]).encode();
        assert!(matches!(
            Frame::decode(&bytes[..bytes.len() - 1]),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_all_splits_concatenated_frames() {
        let mut body = Vec::new();
        Frame::new(MessageType::ExternalResponse, RequestId::new(1), vec![1]).encode_into(&mut body);
        Frame::new(MessageType::PushMessage, RequestId::PUSH, vec![2, 2]).encode_into(&mut body);

        let frames = Frame::decode_all(&body).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].header.message_type, MessageType::PushMessage);
        assert_eq!(frames[1].payload, vec![2, 2]);
    }

    #[test]
    fn test_compression_only_above_threshold() {
        let small = Frame::new(MessageType::ExternalRequest, RequestId::new(1), vec![7; 16])
            .compressed()
            .unwrap();
        assert!(!small.header.compressed);

        let original = vec![7u8; 4096];
        let large = Frame::new(MessageType::ExternalRequest, RequestId::new(1), original.clone())
            .compressed()
            .unwrap();
        assert!(large.header.compressed);
        assert!(large.payload.len() < original.len());
        assert_eq!(large.header.payload_length as usize, large.payload.len());
        assert_eq!(large.inflated_payload(4096).unwrap(), original);
    }

    #[test]
    fn test_inflation_stops_at_limit() {
        let frame = Frame::new(MessageType::ExternalResponse, RequestId::new(1), vec![0; 64 * 1024])
            .compressed()
            .unwrap();
        assert!(frame.header.check_payload_size(1024).is_ok());

        match frame.inflated_payload(1024) {
            Err(ProtocolError::PayloadTooLarge { max, actual }) => {
                assert_eq!(max, 1024);
                assert_eq!(actual, 1025);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
        assert_eq!(frame.inflated_payload(64 * 1024).unwrap().len(), 64 * 1024);
    }

    #[test]
    fn test_uncompressed_payload_checked_against_limit() {
        let frame = Frame::new(MessageType::ExternalResponse, RequestId::new(1), vec![1; 100]);
        assert!(frame.inflated_payload(100).is_ok());
        assert!(matches!(
            frame.inflated_payload(99),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_payload_size_limit() {
        let header = Frame::new(MessageType::ExternalResponse, RequestId::new(1), vec![0; 100]).header;
        assert!(header.check_payload_size(100).is_ok());
        assert!(header.check_payload_size(99).is_err());
    }
}
