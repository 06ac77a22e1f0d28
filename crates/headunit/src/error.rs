//! Error taxonomy
//!
//! Only [`InitializationError`] is fatal. Negotiation errors stay with the
//! device that produced them; transport and protocol entity errors stay with
//! the session and end in a teardown.

use aoap::{AoapError, DeviceId};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Startup failures that abort the process
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("USB host context unavailable: {0}")]
    UsbContext(#[source] rusb::Error),

    #[error("Failed to start {pool} worker pool: {source}")]
    WorkerPool {
        pool: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to register hotplug callback: {0}")]
    Hotplug(#[source] rusb::Error),
}

/// Why a single negotiation step failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepFailure {
    #[error("USB control transfer timed out")]
    Timeout,

    #[error("USB transfer failed: {0}")]
    Usb(rusb::Error),

    #[error(transparent)]
    Protocol(#[from] AoapError),

    #[error("short control transfer: sent {sent} of {expected} bytes")]
    ShortWrite { sent: usize, expected: usize },

    #[error("accessory interface has no bulk endpoint pair")]
    MissingEndpoints,

    #[error("device switched to accessory mode and will re-enumerate")]
    ModeSwitched,

    #[error("no step produced an accessory transport")]
    Exhausted,
}

impl From<rusb::Error> for StepFailure {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Timeout => StepFailure::Timeout,
            other => StepFailure::Usb(other),
        }
    }
}

/// Negotiation with one device ended without a transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("negotiation with device {device} stopped at step '{step}': {reason}")]
pub struct NegotiationError {
    pub device: DeviceId,
    pub step: &'static str,
    pub reason: StepFailure,
}

impl NegotiationError {
    /// The device accepted the switch; its re-enumeration will arrive as a
    /// new device
    pub fn is_mode_switch(&self) -> bool {
        self.reason == StepFailure::ModeSwitched
    }
}

/// I/O failures on a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("USB accessory I/O failed: {0}")]
    Usb(rusb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures reported by (or about) a protocol entity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolEntityError {
    #[error("protocol entity rejected the transport: {0}")]
    Rejected(String),

    #[error("transport failed under the protocol entity: {0}")]
    Transport(String),

    #[error("protocol entity failed: {0}")]
    Failed(String),
}

impl From<TransportError> for ProtocolEntityError {
    fn from(e: TransportError) -> Self {
        ProtocolEntityError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_step_timeout() {
        assert_eq!(StepFailure::from(rusb::Error::Timeout), StepFailure::Timeout);
        assert_eq!(
            StepFailure::from(rusb::Error::NoDevice),
            StepFailure::Usb(rusb::Error::NoDevice)
        );
    }

    #[test]
    fn test_negotiation_error_display() {
        let err = NegotiationError {
            device: DeviceId::new(1, 7),
            step: "read-protocol-version",
            reason: StepFailure::Timeout,
        };
        let msg = err.to_string();
        assert!(msg.contains("001:007"));
        assert!(msg.contains("read-protocol-version"));
        assert!(!err.is_mode_switch());
    }

    #[test]
    fn test_transport_error_into_entity_error() {
        let err: ProtocolEntityError =
            TransportError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).into();
        assert!(matches!(err, ProtocolEntityError::Transport(msg) if msg.contains("gone")));
    }
}
