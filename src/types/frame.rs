//! Raw frame type handed from the radio reader to the consumer

use std::sync::Arc;
use std::time::SystemTime;

use super::PeerAddress;

/// One raw unit of data received from the radio link, prior to decoding.
///
/// Frames are immutable once created; the payload is shared via `Arc` so
/// draining a frame out of the queue never copies it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Payload bytes exactly as delivered by the radio
    pub payload: Arc<[u8]>,

    /// Wall-clock time the frame was received
    pub arrival_time: SystemTime,

    /// Sender address, when the radio reports one
    pub source: Option<PeerAddress>,
}

impl Frame {
    /// Create a frame stamped with the current time.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        let payload: Vec<u8> = payload.into();
        Self { payload: payload.into(), arrival_time: SystemTime::now(), source: None }
    }

    /// Attach the sender address.
    pub fn with_source(mut self, source: PeerAddress) -> Self {
        self.source = Some(source);
        self
    }

    /// Payload as trimmed text, with invalid UTF-8 sequences dropped.
    pub fn text(&self) -> String {
        let lossy = String::from_utf8_lossy(&self.payload);
        let cleaned: String = lossy.chars().filter(|&c| c != char::REPLACEMENT_CHARACTER).collect();
        cleaned.trim().to_string()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_strips_invalid_bytes_and_whitespace() {
        let frame = Frame::new(b"\xff 1,2,3\r\n".to_vec());
        assert_eq!(frame.text(), "1,2,3");
    }

    #[test]
    fn source_is_optional() {
        let frame = Frame::new("x");
        assert!(frame.source.is_none());
        let frame = frame.with_source(PeerAddress(1));
        assert_eq!(frame.source, Some(PeerAddress(1)));
        assert_eq!(frame.len(), 1);
    }
}
