//! Test utilities for the head unit
//!
//! Scripted stand-ins for the pieces that normally need hardware or a real
//! protocol stack: a USB event source, a phone on the bus, a protocol entity
//! factory and a device watcher. Transports are in-memory pipes.

use crate::app::DeviceWatcher;
use crate::app::events::{AppEvent, AppInbox};
use crate::entity::{ProtocolEntity, ProtocolEntityFactory, SessionObserver};
use crate::error::{ProtocolEntityError, StepFailure};
use crate::transport::{ReleaseGuard, Transport, TransportIo, TransportKind, release_tracker};
use crate::usb::device::AccessoryDevice;
use crate::usb::pump::EventSource;
use crate::usb::query::NegotiationContext;
use aoap::{AccessoryIdentity, AccessoryIds, AccessoryRequest, DeviceId, UsbIds};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::runtime::Handle;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of in-memory transport pipes
const PIPE_CAPACITY: usize = 64 * 1024;

/// Timeout wrapper for async tests
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Next orchestrator event, panicking after [`DEFAULT_TEST_TIMEOUT`]
pub async fn recv_event(inbox: &AppInbox) -> AppEvent {
    match with_timeout(DEFAULT_TEST_TIMEOUT, inbox.recv()).await {
        Ok(Ok(event)) => event,
        Ok(Err(e)) => panic!("event channel closed: {}", e),
        Err(e) => panic!("no event: {}", e),
    }
}

/// Transport over an in-memory pipe, plus the phone's end of the pipe
pub fn duplex_transport() -> (Transport, DuplexStream) {
    let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
    let kind = TransportKind::Tcp {
        peer: std::net::SocketAddr::from(([127, 0, 0, 1], 5277)),
    };
    (Transport::new(kind, ours), theirs)
}

/// Accessory transport for `device` over an in-memory pipe
///
/// The returned counter is bumped when the transport is closed.
pub fn usb_transport(device: DeviceId) -> (Transport, DuplexStream, Arc<AtomicUsize>) {
    let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();
    let transport = Transport::with_close_hook(TransportKind::UsbAccessory { device }, ours, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (transport, theirs, closes)
}

/// Accessory transport that stays unreleased until the guard is dropped
pub fn usb_transport_with_release(device: DeviceId) -> (Transport, DuplexStream, ReleaseGuard) {
    let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
    let (guard, released) = release_tracker();
    let transport =
        Transport::with_release(TransportKind::UsbAccessory { device }, ours, || {}, released);
    (transport, theirs, guard)
}

/// Negotiation settings bound to the current runtime
pub fn negotiation_context() -> NegotiationContext {
    negotiation_context_on(Handle::current())
}

/// Negotiation settings posting transport pumps to `executor`
pub fn negotiation_context_on(executor: Handle) -> NegotiationContext {
    NegotiationContext {
        executor,
        accessory_ids: AccessoryIds::default(),
        identity: AccessoryIdentity::default(),
        control_timeout: Duration::from_millis(100),
        bulk_timeout: Duration::from_millis(50),
    }
}

// ---------------------------------------------------------------------------
// USB event source
// ---------------------------------------------------------------------------

/// Event source whose waits last the full timeout unless interrupted
#[derive(Debug, Default)]
pub struct MockEventSource {
    interrupted: Mutex<bool>,
    wake: Condvar,
    calls: AtomicUsize,
    fail: bool,
}

impl MockEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source whose every wait fails immediately
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Number of waits so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EventSource for MockEventSource {
    fn handle_events(&self, timeout: Duration) -> rusb::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(rusb::Error::Io);
        }

        let guard = self
            .interrupted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (guard, result) = self
            .wake
            .wait_timeout_while(guard, timeout, |interrupted| !*interrupted)
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Interrupts stay raised so late waiters return at once as well
        if *guard && !result.timed_out() {
            Err(rusb::Error::Interrupted)
        } else {
            Ok(())
        }
    }

    fn interrupt(&self) {
        *self
            .interrupted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        self.wake.notify_all();
    }
}

// ---------------------------------------------------------------------------
// Scripted device
// ---------------------------------------------------------------------------

/// One control transfer seen by a [`MockDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCall {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Payload of an OUT transfer; empty for IN transfers
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct ProbeState {
    calls: Mutex<Vec<ControlCall>>,
    transports: AtomicUsize,
    closes: Arc<AtomicUsize>,
    peers: Mutex<Vec<DuplexStream>>,
}

/// Observes a [`MockDevice`] after it has been moved into a chain
#[derive(Debug, Clone, Default)]
pub struct DeviceProbe {
    state: Arc<ProbeState>,
}

impl DeviceProbe {
    pub fn calls(&self) -> Vec<ControlCall> {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn transports_opened(&self) -> usize {
        self.state.transports.load(Ordering::SeqCst)
    }

    /// How many of the opened transports have been closed
    pub fn transports_closed(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Phone end of the most recently opened transport
    pub fn take_peer(&self) -> Option<DuplexStream> {
        self.state
            .peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
    }

    fn record(&self, call: ControlCall) {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}

/// A phone on the bus that answers accessory requests from a script
pub struct MockDevice {
    id: DeviceId,
    ids: UsbIds,
    protocol_version: u16,
    failures: Vec<(u8, rusb::Error)>,
    open_delay: Duration,
    probe: DeviceProbe,
}

impl MockDevice {
    /// Phone in its normal USB mode, speaking accessory protocol version 2
    pub fn phone(id: DeviceId) -> (Self, DeviceProbe) {
        Self::build(
            id,
            UsbIds {
                vendor_id: 0x04e8,
                product_id: 0x6860,
            },
        )
    }

    /// Phone that has already switched to accessory mode
    pub fn accessory(id: DeviceId) -> (Self, DeviceProbe) {
        Self::build(
            id,
            UsbIds {
                vendor_id: aoap::GOOGLE_VENDOR_ID,
                product_id: 0x2d01,
            },
        )
    }

    fn build(id: DeviceId, ids: UsbIds) -> (Self, DeviceProbe) {
        let probe = DeviceProbe::default();
        let device = Self {
            id,
            ids,
            protocol_version: 2,
            failures: Vec::new(),
            open_delay: Duration::ZERO,
            probe: probe.clone(),
        };
        (device, probe)
    }

    pub fn with_protocol_version(mut self, version: u16) -> Self {
        self.protocol_version = version;
        self
    }

    /// Fail every transfer of `request` with `error` (after recording it)
    pub fn failing_on(mut self, request: u8, error: rusb::Error) -> Self {
        self.failures.push((request, error));
        self
    }

    /// Sleep before handing out the transport
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    fn scripted_failure(&self, request: u8) -> Option<rusb::Error> {
        self.failures
            .iter()
            .find(|(code, _)| *code == request)
            .map(|(_, error)| *error)
    }
}

impl AccessoryDevice for MockDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn ids(&self) -> UsbIds {
        self.ids
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        self.probe.record(ControlCall {
            request_type,
            request,
            value,
            index,
            data: Vec::new(),
        });
        if let Some(error) = self.scripted_failure(request) {
            return Err(error);
        }

        if request != AccessoryRequest::GetProtocol.code() {
            return Err(rusb::Error::Pipe);
        }
        let reply = self.protocol_version.to_le_bytes();
        let len = reply.len().min(buf.len());
        buf[..len].copy_from_slice(&reply[..len]);
        Ok(len)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        self.probe.record(ControlCall {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
        });
        match self.scripted_failure(request) {
            Some(error) => Err(error),
            None => Ok(data.len()),
        }
    }

    fn into_transport(self: Box<Self>, _ctx: &NegotiationContext) -> Result<Transport, StepFailure> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }

        let state = &self.probe.state;
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        let closes = state.closes.clone();
        let transport = Transport::with_close_hook(
            TransportKind::UsbAccessory { device: self.id },
            ours,
            move || {
                closes.fetch_add(1, Ordering::SeqCst);
            },
        );

        state.transports.fetch_add(1, Ordering::SeqCst);
        state
            .peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(theirs);
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Protocol entities
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct FactoryState {
    starts: AtomicUsize,
    stops: AtomicUsize,
    reject: AtomicBool,
    observers: Mutex<Vec<SessionObserver>>,
}

/// Entity factory that records what the orchestrator asks of it
///
/// Entities keep their transport stream open until stopped and never end on
/// their own; tests end a session through [`RecordingFactory::observer`].
#[derive(Debug, Clone, Default)]
pub struct RecordingFactory {
    state: Arc<FactoryState>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose `start` fails until [`RecordingFactory::set_reject`]
    /// is cleared
    pub fn rejecting() -> Self {
        let factory = Self::default();
        factory.set_reject(true);
        factory
    }

    pub fn set_reject(&self, reject: bool) {
        self.state.reject.store(reject, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    /// Observer handed to the `n`th started entity
    pub fn observer(&self, n: usize) -> Option<SessionObserver> {
        self.state
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(n)
            .cloned()
    }
}

impl ProtocolEntityFactory for RecordingFactory {
    fn start(
        &self,
        transport: Transport,
        observer: SessionObserver,
    ) -> Result<Box<dyn ProtocolEntity>, ProtocolEntityError> {
        if self.state.reject.load(Ordering::SeqCst) {
            return Err(ProtocolEntityError::Rejected(format!(
                "{} refused",
                transport.info().kind
            )));
        }

        self.state.starts.fetch_add(1, Ordering::SeqCst);
        self.state
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);

        Ok(Box::new(RecordingEntity {
            io: Some(transport.into_io()),
            state: self.state.clone(),
        }))
    }
}

struct RecordingEntity {
    io: Option<Box<dyn TransportIo>>,
    state: Arc<FactoryState>,
}

impl ProtocolEntity for RecordingEntity {
    fn stop(&mut self) {
        self.io = None;
        self.state.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Device watcher
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct WatcherState {
    starts: AtomicUsize,
    cancels: AtomicUsize,
    watching: AtomicBool,
}

/// Watcher that only counts calls
#[derive(Debug, Clone, Default)]
pub struct CountingWatcher {
    state: Arc<WatcherState>,
}

impl CountingWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.state.cancels.load(Ordering::SeqCst)
    }

    pub fn is_watching(&self) -> bool {
        self.state.watching.load(Ordering::SeqCst)
    }
}

impl DeviceWatcher for CountingWatcher {
    fn start_watching(&self) {
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        self.state.watching.store(true, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.state.cancels.fetch_add(1, Ordering::SeqCst);
        self.state.watching.store(false, Ordering::SeqCst);
    }
}
