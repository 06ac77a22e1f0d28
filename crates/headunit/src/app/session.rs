//! The single logical session and its lifecycle state

use crate::entity::ProtocolEntity;
use crate::transport::{TransportCloser, TransportInfo};
use std::fmt;

/// Identifies one session across its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session; watching for devices unless stopped
    #[default]
    Idle,
    /// A transport arrived and the protocol entity is being started
    Negotiating,
    /// The protocol entity runs on the transport
    Active,
    /// The entity is being stopped and the transport closed
    ShuttingDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Active => "active",
            SessionState::ShuttingDown => "shutting down",
        };
        f.write_str(name)
    }
}

/// The active session
pub struct Session {
    pub id: SessionId,
    pub transport: TransportInfo,
    pub closer: TransportCloser,
    pub entity: Box<dyn ProtocolEntity>,
}

impl Session {
    /// Whether `device` backs this session's transport
    pub fn uses_device(&self, device: aoap::DeviceId) -> bool {
        self.transport.device() == Some(device)
    }

    /// Stop the entity and close the transport
    ///
    /// Returns `true` when this call closed the transport.
    pub fn shut_down(mut self) -> bool {
        self.entity.stop();
        self.closer.close()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}
