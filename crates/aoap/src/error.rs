//! Accessory protocol error types

use thiserror::Error;

/// Errors produced while decoding accessory protocol replies
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AoapError {
    /// GET_PROTOCOL returned fewer bytes than a version word
    #[error("Short protocol version reply: got {actual} bytes, expected {expected}")]
    ShortReply { expected: usize, actual: usize },

    /// Device answered GET_PROTOCOL but does not implement accessory mode
    #[error("Accessory mode not supported (protocol version {0})")]
    Unsupported(u16),

    /// Identification string contains an interior NUL byte
    #[error("Identification string for {field} contains a NUL byte")]
    InvalidString { field: &'static str },
}

/// Type alias for accessory protocol results
pub type Result<T> = std::result::Result<T, AoapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AoapError::ShortReply {
            expected: 2,
            actual: 1,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Short protocol version reply"));
        assert!(msg.contains("got 1"));

        let err = AoapError::Unsupported(0);
        assert!(format!("{}", err).contains("version 0"));
    }
}
