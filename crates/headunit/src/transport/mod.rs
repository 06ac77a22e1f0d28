//! Duplex byte channels between the head unit and an accessory
//!
//! A [`Transport`] is either a USB accessory endpoint pair or a TCP socket.
//! The protocol entity takes its byte stream; the session keeps a
//! [`TransportCloser`] so the transport is closed exactly once, whichever
//! side of a teardown gets there first.
//!
//! Closing only asks the backing resources to go away. A USB transport keeps
//! its interface claimed until its pumps notice, so anything that wants to
//! reopen the device waits on [`TransportCloser::released`] first.

pub mod tcp;
pub mod usb;

use aoap::DeviceId;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::debug;

/// Byte stream carried by a transport
pub trait TransportIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> TransportIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique transport identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(pub u64);

impl TransportId {
    fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What backs a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    /// Bulk endpoint pair of a device in accessory mode
    UsbAccessory { device: DeviceId },
    /// TCP connection to a phone on the network
    Tcp { peer: SocketAddr },
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::UsbAccessory { device } => write!(f, "usb accessory {}", device),
            TransportKind::Tcp { peer } => write!(f, "tcp {}", peer),
        }
    }
}

/// Identity of a transport, kept by the session after the stream is handed off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportInfo {
    pub id: TransportId,
    pub kind: TransportKind,
}

impl TransportInfo {
    /// USB device backing this transport, if any
    pub fn device(&self) -> Option<DeviceId> {
        match self.kind {
            TransportKind::UsbAccessory { device } => Some(device),
            TransportKind::Tcp { .. } => None,
        }
    }
}

/// Held by whatever owns a transport's backing resources; dropped once they
/// are gone
#[derive(Debug)]
pub struct ReleaseGuard {
    _tx: watch::Sender<()>,
}

/// Resolves when the matching [`ReleaseGuard`] is dropped
#[derive(Debug, Clone)]
pub struct Released {
    rx: watch::Receiver<()>,
}

impl Released {
    pub async fn wait(mut self) {
        // Nothing is ever sent; the channel only closes
        while self.rx.changed().await.is_ok() {}
    }

    pub fn is_released(&self) -> bool {
        self.rx.has_changed().is_err()
    }
}

/// Pair a release guard with the future that waits for it
pub fn release_tracker() -> (ReleaseGuard, Released) {
    let (tx, rx) = watch::channel(());
    (ReleaseGuard { _tx: tx }, Released { rx })
}

type CloseHook = Box<dyn FnOnce() + Send>;

struct CloseState {
    info: TransportInfo,
    closed: AtomicBool,
    hook: Mutex<Option<CloseHook>>,
    released: Option<Released>,
}

impl CloseState {
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let hook = self
            .hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(hook) = hook {
            hook();
        }
        debug!("Closed transport {} ({})", self.info.id.0, self.info.kind);
        true
    }
}

impl Drop for CloseState {
    fn drop(&mut self) {
        // Release backing resources even if nobody closed explicitly
        self.close();
    }
}

/// Close-once handle for a transport
#[derive(Clone)]
pub struct TransportCloser {
    state: Arc<CloseState>,
}

impl TransportCloser {
    /// Close the transport. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        self.state.close()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> &TransportInfo {
        &self.state.info
    }

    /// Wait until the backing resources are gone
    ///
    /// Returns at once for transports that do not track their release.
    pub async fn released(&self) {
        if let Some(released) = self.state.released.clone() {
            released.wait().await;
        }
    }
}

impl fmt::Debug for TransportCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCloser")
            .field("info", &self.state.info)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A negotiated duplex byte channel
pub struct Transport {
    io: Box<dyn TransportIo>,
    closer: TransportCloser,
}

impl Transport {
    pub fn new(kind: TransportKind, io: impl TransportIo + 'static) -> Self {
        Self::build(kind, Box::new(io), None, None)
    }

    /// Create a transport that runs `hook` when it is closed
    pub fn with_close_hook(
        kind: TransportKind,
        io: impl TransportIo + 'static,
        hook: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self::build(kind, Box::new(io), Some(Box::new(hook)), None)
    }

    /// Like [`Transport::with_close_hook`], for a transport whose resources
    /// outlive the hook until `released` resolves
    pub fn with_release(
        kind: TransportKind,
        io: impl TransportIo + 'static,
        hook: impl FnOnce() + Send + 'static,
        released: Released,
    ) -> Self {
        Self::build(kind, Box::new(io), Some(Box::new(hook)), Some(released))
    }

    fn build(
        kind: TransportKind,
        io: Box<dyn TransportIo>,
        hook: Option<CloseHook>,
        released: Option<Released>,
    ) -> Self {
        let info = TransportInfo {
            id: TransportId::next(),
            kind,
        };
        let closer = TransportCloser {
            state: Arc::new(CloseState {
                info,
                closed: AtomicBool::new(false),
                hook: Mutex::new(hook),
                released,
            }),
        };
        Self { io, closer }
    }

    pub fn info(&self) -> &TransportInfo {
        self.closer.info()
    }

    pub fn closer(&self) -> TransportCloser {
        self.closer.clone()
    }

    /// Hand the byte stream to its consumer
    ///
    /// The transport stays open while a [`TransportCloser`] obtained from
    /// [`Transport::closer`] is alive; dropping the last one closes it.
    pub fn into_io(self) -> Box<dyn TransportIo> {
        self.io
    }

    /// Drop the stream and close the transport
    pub fn close(self) -> bool {
        let Transport { io, closer } = self;
        drop(io);
        closer.close()
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("info", self.info())
            .field("closed", &self.closer.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn usb_kind() -> TransportKind {
        TransportKind::UsbAccessory {
            device: DeviceId::new(1, 9),
        }
    }

    #[test]
    fn test_close_runs_hook_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (io, _peer) = tokio::io::duplex(64);
        let transport = {
            let closes = closes.clone();
            Transport::with_close_hook(usb_kind(), io, move || {
                closes.fetch_add(1, Ordering::SeqCst);
            })
        };

        let closer = transport.closer();
        let other = closer.clone();
        assert!(closer.close());
        assert!(!other.close());
        assert!(other.is_closed());

        drop(transport);
        drop(closer);
        drop(other);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_closes_unclosed_transport() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (io, _peer) = tokio::io::duplex(64);
        let transport = {
            let closes = closes.clone();
            Transport::with_close_hook(usb_kind(), io, move || {
                closes.fetch_add(1, Ordering::SeqCst);
            })
        };

        drop(transport);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_released_waits_for_guard() {
        let (guard, released) = release_tracker();
        let (io, _peer) = tokio::io::duplex(64);
        let transport = Transport::with_release(usb_kind(), io, || {}, released.clone());
        let closer = transport.closer();

        assert!(transport.close());
        assert!(!released.is_released());
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(50), closer.released()).await;
        assert!(pending.is_err(), "released before the guard was dropped");

        drop(guard);
        tokio::time::timeout(std::time::Duration::from_secs(1), closer.released())
            .await
            .unwrap();
        assert!(released.is_released());
    }

    #[tokio::test]
    async fn test_untracked_transport_is_released_at_once() {
        let (io, _peer) = tokio::io::duplex(64);
        let transport = Transport::new(usb_kind(), io);
        let closer = transport.closer();
        transport.close();
        tokio::time::timeout(std::time::Duration::from_millis(50), closer.released())
            .await
            .unwrap();
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _pa) = tokio::io::duplex(8);
        let (b, _pb) = tokio::io::duplex(8);
        let first = Transport::new(usb_kind(), a);
        let second = Transport::new(usb_kind(), b);
        assert_ne!(first.info().id, second.info().id);
        assert_eq!(first.info().device(), Some(DeviceId::new(1, 9)));
    }

    #[test]
    fn test_tcp_kind_has_no_device() {
        let info = TransportInfo {
            id: TransportId(1),
            kind: TransportKind::Tcp {
                peer: "192.168.1.20:5277".parse().unwrap(),
            },
        };
        assert_eq!(info.device(), None);
        assert_eq!(info.kind.to_string(), "tcp 192.168.1.20:5277");
    }
}
