//! 64-bit radio hardware address

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 64-bit hardware address of a radio endpoint.
///
/// Written as 16 hex digits, e.g. `0013A20041068422`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress(pub u64);

impl PeerAddress {
    /// The flight payload radio of the reference deployment.
    pub const REFERENCE_PAYLOAD: PeerAddress = PeerAddress(0x0013_A200_4106_8422);

    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        PeerAddress(u64::from_be_bytes(bytes))
    }
}

impl Default for PeerAddress {
    fn default() -> Self {
        PeerAddress::REFERENCE_PAYLOAD
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl FromStr for PeerAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim();
        let hex = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")).unwrap_or(hex);
        if hex.is_empty() || hex.len() > 16 {
            return Err(format!("expected up to 16 hex digits, got {s:?}"));
        }
        u64::from_str_radix(hex, 16)
            .map(PeerAddress)
            .map_err(|e| format!("invalid peer address {s:?}: {e}"))
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerAddress> for String {
    fn from(value: PeerAddress) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_address() {
        let addr: PeerAddress = "0013A20041068422".parse().unwrap();
        assert_eq!(addr, PeerAddress::REFERENCE_PAYLOAD);
        assert_eq!(addr.to_string(), "0013A20041068422");
    }

    #[test]
    fn accepts_prefix_and_lowercase() {
        let addr: PeerAddress = "0x0013a20041068422".parse().unwrap();
        assert_eq!(addr, PeerAddress::REFERENCE_PAYLOAD);
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<PeerAddress>().is_err());
        assert!("XYZ".parse::<PeerAddress>().is_err());
        assert!("0013A2004106842200".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn byte_order_is_big_endian() {
        let bytes = PeerAddress::REFERENCE_PAYLOAD.to_be_bytes();
        assert_eq!(bytes, [0x00, 0x13, 0xA2, 0x00, 0x41, 0x06, 0x84, 0x22]);
        assert_eq!(PeerAddress::from_be_bytes(bytes), PeerAddress::REFERENCE_PAYLOAD);
    }
}
