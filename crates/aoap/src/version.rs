//! Accessory protocol version

use crate::error::{AoapError, Result};
use std::fmt;

/// Accessory protocol version reported by GET_PROTOCOL
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    /// Size of the GET_PROTOCOL reply
    pub const WIRE_SIZE: usize = 2;

    /// Decode a GET_PROTOCOL reply
    pub fn decode(reply: &[u8]) -> Result<Self> {
        if reply.len() < Self::WIRE_SIZE {
            return Err(AoapError::ShortReply {
                expected: Self::WIRE_SIZE,
                actual: reply.len(),
            });
        }

        Ok(Self(u16::from_le_bytes([reply[0], reply[1]])))
    }

    /// Version 0 means the device does not implement accessory mode
    pub fn supports_accessory_mode(&self) -> bool {
        self.0 >= 1
    }

    /// Decode and reject devices without accessory support
    pub fn decode_supported(reply: &[u8]) -> Result<Self> {
        let version = Self::decode(reply)?;
        if !version.supports_accessory_mode() {
            return Err(AoapError::Unsupported(version.0));
        }
        Ok(version)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
