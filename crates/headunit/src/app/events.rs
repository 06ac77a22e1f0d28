//! Event channel into the session orchestrator
//!
//! Everything that can change the session state (negotiated transports,
//! hotplug departures, protocol entity termination, shell requests) arrives
//! as an [`AppEvent`] on one unbounded channel. Producers never block, so
//! hotplug callbacks running on USB event threads can post directly.

use crate::app::session::SessionId;
use crate::error::ProtocolEntityError;
use crate::transport::Transport;
use aoap::DeviceId;
use async_channel::{Receiver, Sender, unbounded};

#[derive(Debug)]
pub enum AppEvent {
    /// Start (or resume) watching for USB devices when idle
    WaitForDevice,
    /// A transport is ready for a session: negotiated USB accessory or a
    /// manual network connection
    TransportReady(Transport),
    /// A USB device left the bus
    DeviceLeft(DeviceId),
    /// The protocol entity of a session ended
    EntityTerminated {
        session: SessionId,
        error: Option<ProtocolEntityError>,
    },
    /// Tear down and exit the orchestrator
    Stop,
}

/// Producer side, cloned into every component that reports to the orchestrator
#[derive(Debug, Clone)]
pub struct AppEventSender {
    tx: Sender<AppEvent>,
}

impl AppEventSender {
    /// Post an event without blocking
    pub fn post(&self, event: AppEvent) -> common::Result<()> {
        self.tx
            .try_send(event)
            .map_err(|e| common::Error::Channel(e.to_string()))
    }

    pub fn transport_ready(&self, transport: Transport) -> common::Result<()> {
        self.post(AppEvent::TransportReady(transport))
    }

    pub fn device_left(&self, device: DeviceId) -> common::Result<()> {
        self.post(AppEvent::DeviceLeft(device))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side, owned by the orchestrator task
#[derive(Debug)]
pub struct AppInbox {
    rx: Receiver<AppEvent>,
}

impl AppInbox {
    pub async fn recv(&self) -> common::Result<AppEvent> {
        self.rx
            .recv()
            .await
            .map_err(|e| common::Error::Channel(e.to_string()))
    }
}

/// Create the orchestrator's event channel
pub fn channel() -> (AppEventSender, AppInbox) {
    let (tx, rx) = unbounded();
    (AppEventSender { tx }, AppInbox { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (events, inbox) = channel();
        events.device_left(DeviceId::new(1, 1)).unwrap();
        events.post(AppEvent::Stop).unwrap();

        assert!(matches!(inbox.recv().await.unwrap(), AppEvent::DeviceLeft(_)));
        assert!(matches!(inbox.recv().await.unwrap(), AppEvent::Stop));
    }

    #[test]
    fn test_post_after_inbox_dropped() {
        let (events, inbox) = channel();
        drop(inbox);
        assert!(events.is_closed());
        assert!(matches!(
            events.post(AppEvent::WaitForDevice),
            Err(common::Error::Channel(_))
        ));
    }
}
