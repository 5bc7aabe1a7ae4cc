//! XBee API-mode frame codec
//!
//! Every API frame on the serial line is:
//!
//! ```text
//! 0x7E | length (u16, big endian) | frame data (length bytes) | checksum
//! ```
//!
//! where `checksum = 0xFF - (sum of frame data & 0xFF)`. In escaped mode (API 2)
//! the bytes `0x7E 0x7D 0x11 0x13` after the start delimiter are sent as `0x7D`
//! followed by the byte XOR `0x20`.
//!
//! Only the frame types the ground station uses are modeled: transmit request
//! (handshake out), receive packet (telemetry in) and transmit status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PeerAddress;

pub const START_DELIMITER: u8 = 0x7E;
pub const ESCAPE: u8 = 0x7D;
pub const XON: u8 = 0x11;
pub const XOFF: u8 = 0x13;
const ESCAPE_XOR: u8 = 0x20;

pub const TRANSMIT_REQUEST: u8 = 0x10;
pub const TRANSMIT_STATUS: u8 = 0x8B;
pub const RECEIVE_PACKET: u8 = 0x90;

/// Largest frame data accepted: a transmit request header plus a 256-byte
/// RF payload. Longer lengths are noise.
pub const MAX_FRAME_DATA: usize = 14 + 256;

/// 16-bit address meaning "unknown, route by 64-bit address".
pub const UNKNOWN_16BIT_ADDRESS: u16 = 0xFFFE;

/// Serial framing mode configured on the ground radio (`AP` parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiMode {
    /// AP=1
    #[default]
    Plain,
    /// AP=2
    Escaped,
}

/// A decoded API frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFrame {
    TransmitRequest { frame_id: u8, destination: PeerAddress, payload: Vec<u8> },
    ReceivePacket { source: PeerAddress, source_16: u16, options: u8, payload: Vec<u8> },
    TransmitStatus { frame_id: u8, retries: u8, delivery_status: u8, discovery_status: u8 },
    Other { frame_type: u8, data: Vec<u8> },
}

/// Problems found while decoding API frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiFault {
    #[error("API frame checksum mismatch: expected {expected:#04x}, found {found:#04x}")]
    BadChecksum { expected: u8, found: u8 },

    #[error("API frame type {frame_type:#04x} too short ({len} bytes)")]
    Truncated { frame_type: u8, len: usize },

    #[error("API frame with zero length")]
    Empty,

    #[error("API frame length {len} exceeds {max} bytes")]
    TooLong { len: usize, max: usize },
}

impl ApiFrame {
    pub fn frame_type(&self) -> u8 {
        match self {
            ApiFrame::TransmitRequest { .. } => TRANSMIT_REQUEST,
            ApiFrame::ReceivePacket { .. } => RECEIVE_PACKET,
            ApiFrame::TransmitStatus { .. } => TRANSMIT_STATUS,
            ApiFrame::Other { frame_type, .. } => *frame_type,
        }
    }

    /// Frame data: the bytes covered by length and checksum.
    pub fn frame_data(&self) -> Vec<u8> {
        let mut data = vec![self.frame_type()];
        match self {
            ApiFrame::TransmitRequest { frame_id, destination, payload } => {
                data.push(*frame_id);
                data.extend_from_slice(&destination.to_be_bytes());
                data.extend_from_slice(&UNKNOWN_16BIT_ADDRESS.to_be_bytes());
                data.push(0); // broadcast radius: maximum hops
                data.push(0); // transmit options
                data.extend_from_slice(payload);
            }
            ApiFrame::ReceivePacket { source, source_16, options, payload } => {
                data.extend_from_slice(&source.to_be_bytes());
                data.extend_from_slice(&source_16.to_be_bytes());
                data.push(*options);
                data.extend_from_slice(payload);
            }
            ApiFrame::TransmitStatus { frame_id, retries, delivery_status, discovery_status } => {
                data.push(*frame_id);
                data.extend_from_slice(&UNKNOWN_16BIT_ADDRESS.to_be_bytes());
                data.extend_from_slice(&[*retries, *delivery_status, *discovery_status]);
            }
            ApiFrame::Other { data: body, .. } => data.extend_from_slice(body),
        }
        data
    }

    /// Parse frame data (without delimiter, length or checksum).
    pub fn parse(data: &[u8]) -> Result<ApiFrame, ApiFault> {
        let (&frame_type, body) = data.split_first().ok_or(ApiFault::Empty)?;
        let truncated = ApiFault::Truncated { frame_type, len: data.len() };

        match frame_type {
            TRANSMIT_REQUEST => {
                if body.len() < 13 {
                    return Err(truncated);
                }
                Ok(ApiFrame::TransmitRequest {
                    frame_id: body[0],
                    destination: address_at(&body[1..9]),
                    payload: body[13..].to_vec(),
                })
            }
            RECEIVE_PACKET => {
                if body.len() < 11 {
                    return Err(truncated);
                }
                Ok(ApiFrame::ReceivePacket {
                    source: address_at(&body[0..8]),
                    source_16: u16::from_be_bytes([body[8], body[9]]),
                    options: body[10],
                    payload: body[11..].to_vec(),
                })
            }
            TRANSMIT_STATUS => {
                if body.len() < 6 {
                    return Err(truncated);
                }
                Ok(ApiFrame::TransmitStatus {
                    frame_id: body[0],
                    retries: body[3],
                    delivery_status: body[4],
                    discovery_status: body[5],
                })
            }
            _ => Ok(ApiFrame::Other { frame_type, data: body.to_vec() }),
        }
    }

    /// Encode as bytes ready to write to the serial port.
    pub fn encode(&self, mode: ApiMode) -> Vec<u8> {
        let data = self.frame_data();
        let len = data.len() as u16;

        let mut unescaped = Vec::with_capacity(data.len() + 3);
        unescaped.extend_from_slice(&len.to_be_bytes());
        unescaped.extend_from_slice(&data);
        unescaped.push(checksum(&data));

        let mut out = Vec::with_capacity(unescaped.len() + 4);
        out.push(START_DELIMITER);
        for b in unescaped {
            if mode == ApiMode::Escaped && needs_escape(b) {
                out.push(ESCAPE);
                out.push(b ^ ESCAPE_XOR);
            } else {
                out.push(b);
            }
        }
        out
    }
}

fn address_at(bytes: &[u8]) -> PeerAddress {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    PeerAddress::from_be_bytes(raw)
}

fn needs_escape(b: u8) -> bool {
    matches!(b, START_DELIMITER | ESCAPE | XON | XOFF)
}

/// `0xFF` minus the low byte of the sum of `data`.
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    0xFF - sum
}

#[derive(Debug, Clone, Copy, Default)]
enum Stage {
    #[default]
    Delimiter,
    LengthHigh,
    LengthLow(u8),
    Data(usize),
    Checksum,
}

/// Incremental API frame decoder.
///
/// Bytes may be pushed in arbitrary chunks; complete frames are returned as
/// soon as their checksum byte arrives. Bytes outside a frame are skipped.
#[derive(Debug)]
pub struct ApiFrameDecoder {
    mode: ApiMode,
    stage: Stage,
    buf: Vec<u8>,
    escaped: bool,
}

impl ApiFrameDecoder {
    pub fn new(mode: ApiMode) -> Self {
        Self { mode, stage: Stage::Delimiter, buf: Vec::new(), escaped: false }
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.stage = Stage::Delimiter;
        self.buf.clear();
        self.escaped = false;
    }

    /// Push bytes, returning every frame (or fault) completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<ApiFrame, ApiFault>> {
        let mut out = Vec::new();
        for &raw in bytes {
            let byte = match self.mode {
                ApiMode::Escaped => {
                    if raw == START_DELIMITER {
                        // An unescaped delimiter always starts a new frame.
                        self.reset();
                        self.stage = Stage::LengthHigh;
                        continue;
                    }
                    if matches!(self.stage, Stage::Delimiter) {
                        continue;
                    }
                    if raw == ESCAPE {
                        self.escaped = true;
                        continue;
                    }
                    if std::mem::take(&mut self.escaped) { raw ^ ESCAPE_XOR } else { raw }
                }
                ApiMode::Plain => raw,
            };

            if let Some(result) = self.step(byte) {
                out.push(result);
            }
        }
        out
    }

    fn step(&mut self, byte: u8) -> Option<Result<ApiFrame, ApiFault>> {
        match self.stage {
            Stage::Delimiter => {
                if byte == START_DELIMITER {
                    self.stage = Stage::LengthHigh;
                }
                None
            }
            Stage::LengthHigh => {
                self.stage = Stage::LengthLow(byte);
                None
            }
            Stage::LengthLow(high) => {
                let len = u16::from_be_bytes([high, byte]) as usize;
                if len == 0 {
                    self.reset();
                    return Some(Err(ApiFault::Empty));
                }
                if len > MAX_FRAME_DATA {
                    self.reset();
                    return Some(Err(ApiFault::TooLong { len, max: MAX_FRAME_DATA }));
                }
                self.buf.clear();
                self.stage = Stage::Data(len);
                None
            }
            Stage::Data(len) => {
                self.buf.push(byte);
                if self.buf.len() == len {
                    self.stage = Stage::Checksum;
                }
                None
            }
            Stage::Checksum => {
                let data = std::mem::take(&mut self.buf);
                self.stage = Stage::Delimiter;
                let expected = checksum(&data);
                if byte != expected {
                    return Some(Err(ApiFault::BadChecksum { expected, found: byte }));
                }
                Some(ApiFrame::parse(&data))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn handshake() -> ApiFrame {
        ApiFrame::TransmitRequest {
            frame_id: 1,
            destination: PeerAddress::REFERENCE_PAYLOAD,
            payload: b" start".to_vec(),
        }
    }

    #[test]
    fn handshake_encoding_matches_reference_bytes() {
        let bytes = handshake().encode(ApiMode::Plain);
        let expected: Vec<u8> = [
            &[0x7E, 0x00, 0x14, 0x10, 0x01][..],
            &[0x00, 0x13, 0xA2, 0x00, 0x41, 0x06, 0x84, 0x22][..],
            &[0xFF, 0xFE, 0x00, 0x00][..],
            &b" start"[..],
        ]
        .concat();
        assert_eq!(&bytes[..bytes.len() - 1], &expected[..]);
        let sum = bytes[3..].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0xFF, "data plus checksum must sum to 0xFF");
    }

    #[test]
    fn escaped_mode_escapes_reserved_bytes() {
        let bytes = handshake().encode(ApiMode::Escaped);
        // 0x13 inside the destination address must be escaped
        assert!(bytes.windows(2).any(|w| w == [ESCAPE, 0x13 ^ 0x20]));
        assert_eq!(bytes.iter().filter(|&&b| b == START_DELIMITER).count(), 1);
    }

    #[test]
    fn decodes_receive_packet_split_across_reads() {
        let frame = ApiFrame::ReceivePacket {
            source: PeerAddress::REFERENCE_PAYLOAD,
            source_16: 0x1234,
            options: 0x01,
            payload: b"4421,00:00:01,1".to_vec(),
        };
        let bytes = frame.encode(ApiMode::Plain);
        let mut decoder = ApiFrameDecoder::new(ApiMode::Plain);

        let (head, tail) = bytes.split_at(5);
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec![Ok(frame)]);
    }

    #[test]
    fn skips_noise_before_delimiter() {
        let mut bytes = b"garbage".to_vec();
        bytes.extend(handshake().encode(ApiMode::Plain));
        let mut decoder = ApiFrameDecoder::new(ApiMode::Plain);
        assert_eq!(decoder.push(&bytes), vec![Ok(handshake())]);
    }

    #[test]
    fn bad_checksum_is_reported() {
        let mut bytes = handshake().encode(ApiMode::Plain);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut decoder = ApiFrameDecoder::new(ApiMode::Plain);
        let results = decoder.push(&bytes);
        assert!(matches!(results.as_slice(), [Err(ApiFault::BadChecksum { .. })]));

        // decoder recovers for the next frame
        assert_eq!(decoder.push(&handshake().encode(ApiMode::Plain)), vec![Ok(handshake())]);
    }

    #[test]
    fn truncated_receive_packet_is_rejected() {
        assert_eq!(
            ApiFrame::parse(&[RECEIVE_PACKET, 0, 1, 2]),
            Err(ApiFault::Truncated { frame_type: RECEIVE_PACKET, len: 4 })
        );
        assert_eq!(ApiFrame::parse(&[]), Err(ApiFault::Empty));
    }

    #[test]
    fn transmit_status_round_trips() {
        let status = ApiFrame::TransmitStatus {
            frame_id: 1,
            retries: 2,
            delivery_status: 0x21,
            discovery_status: 0,
        };
        let mut decoder = ApiFrameDecoder::new(ApiMode::Escaped);
        assert_eq!(decoder.push(&status.encode(ApiMode::Escaped)), vec![Ok(status)]);
    }

    proptest! {
        #[test]
        fn frames_survive_arbitrary_chunking(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..5),
            address in any::<u64>(),
            escaped in any::<bool>(),
            chunk in 1usize..16
        ) {
            let mode = if escaped { ApiMode::Escaped } else { ApiMode::Plain };
            let frames: Vec<ApiFrame> = payloads
                .into_iter()
                .map(|payload| ApiFrame::ReceivePacket {
                    source: PeerAddress(address),
                    source_16: UNKNOWN_16BIT_ADDRESS,
                    options: 0,
                    payload,
                })
                .collect();
            let stream: Vec<u8> = frames.iter().flat_map(|f| f.encode(mode)).collect();

            let mut decoder = ApiFrameDecoder::new(mode);
            let mut decoded = Vec::new();
            for piece in stream.chunks(chunk) {
                decoded.extend(decoder.push(piece));
            }

            let expected: Vec<Result<ApiFrame, ApiFault>> = frames.into_iter().map(Ok).collect();
            prop_assert_eq!(decoded, expected);
        }

        #[test]
        fn stray_delimiter_with_huge_length_does_not_swallow_frames(
            len in (MAX_FRAME_DATA as u16 + 1)..=u16::MAX,
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..4),
            chunk in 1usize..16
        ) {
            let frames: Vec<ApiFrame> = payloads
                .into_iter()
                .map(|payload| ApiFrame::ReceivePacket {
                    source: PeerAddress(0x0013A20041068422),
                    source_16: UNKNOWN_16BIT_ADDRESS,
                    options: 0,
                    payload,
                })
                .collect();
            let mut stream = vec![START_DELIMITER];
            stream.extend(len.to_be_bytes());
            stream.extend(frames.iter().flat_map(|f| f.encode(ApiMode::Plain)));

            let mut decoder = ApiFrameDecoder::new(ApiMode::Plain);
            let mut decoded = Vec::new();
            for piece in stream.chunks(chunk) {
                decoded.extend(decoder.push(piece));
            }

            let mut expected = vec![Err(ApiFault::TooLong { len: len as usize, max: MAX_FRAME_DATA })];
            expected.extend(frames.into_iter().map(Ok));
            prop_assert_eq!(decoded, expected);
        }
    }
}
