//! USB accessory transport
//!
//! libusb bulk transfers are blocking, so each accessory transport runs two
//! pumps on the executor's blocking threads: one reads the IN endpoint into
//! an in-memory pipe, the other drains the pipe into the OUT endpoint. The
//! protocol entity only sees the async end of the pipe.
//!
//! When the device disappears the inbound pump stops and the entity reads
//! EOF; when the session closes the transport the pumps observe the stop
//! flag within one bulk timeout. The transport counts as released once both
//! pumps have exited and the interface has been given back.

use crate::error::TransportError;
use crate::transport::{ReleaseGuard, Transport, TransportKind, release_tracker};
use aoap::DeviceId;
use rusb::{Context, DeviceHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Capacity of the in-memory pipe between the pumps and the entity
const PIPE_CAPACITY: usize = 64 * 1024;

/// Largest single bulk read
const READ_CHUNK: usize = 16 * 1024;

/// Blocking bulk endpoint pair
pub trait BulkIo: Send + Sync + 'static {
    fn read_bulk(&self, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;
    fn write_bulk(&self, data: &[u8], timeout: Duration) -> rusb::Result<usize>;
}

/// Bulk endpoint addresses of an accessory interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessoryEndpoints {
    pub interface: u8,
    pub bulk_in: u8,
    pub bulk_out: u8,
}

/// Accessory interface claimed on an open device
///
/// The interface is released when the last pump drops its reference.
pub struct ClaimedInterface {
    handle: DeviceHandle<Context>,
    endpoints: AccessoryEndpoints,
    device: DeviceId,
}

impl ClaimedInterface {
    pub fn claim(
        handle: DeviceHandle<Context>,
        endpoints: AccessoryEndpoints,
        device: DeviceId,
    ) -> rusb::Result<Self> {
        match handle.set_auto_detach_kernel_driver(true) {
            Ok(()) | Err(rusb::Error::NotSupported) => {}
            Err(e) => debug!("Could not enable kernel driver auto-detach: {}", e),
        }

        handle.claim_interface(endpoints.interface)?;
        debug!(
            "Claimed accessory interface {} on device {}",
            endpoints.interface, device
        );

        Ok(Self {
            handle,
            endpoints,
            device,
        })
    }
}

impl BulkIo for ClaimedInterface {
    fn read_bulk(&self, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.read_bulk(self.endpoints.bulk_in, buf, timeout)
    }

    fn write_bulk(&self, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.write_bulk(self.endpoints.bulk_out, data, timeout)
    }
}

impl Drop for ClaimedInterface {
    fn drop(&mut self) {
        match self.handle.release_interface(self.endpoints.interface) {
            Ok(()) => debug!("Released accessory interface on device {}", self.device),
            // The device is usually gone by the time we get here
            Err(e) => debug!(
                "Could not release accessory interface on device {}: {}",
                self.device, e
            ),
        }
    }
}

/// Bulk endpoints shared by the two pumps
///
/// Fields drop in order, so the endpoints are gone before the guard reports
/// the release.
struct SharedBulk<B> {
    bulk: B,
    _release: ReleaseGuard,
}

/// Start the bulk pumps for `bulk` and wrap them in a [`Transport`]
pub fn open_transport<B: BulkIo>(
    bulk: B,
    device: DeviceId,
    executor: &Handle,
    timeout: Duration,
) -> Transport {
    let (release, released) = release_tracker();
    let bulk = Arc::new(SharedBulk {
        bulk,
        _release: release,
    });
    let stop = Arc::new(AtomicBool::new(false));
    let (entity_side, pump_side) = tokio::io::duplex(PIPE_CAPACITY);
    let (pipe_rx, pipe_tx) = tokio::io::split(pump_side);

    {
        let bulk = bulk.clone();
        let stop = stop.clone();
        let runtime = executor.clone();
        executor.spawn_blocking(move || inbound_pump(bulk, pipe_tx, stop, runtime, timeout, device));
    }
    {
        let stop = stop.clone();
        let runtime = executor.clone();
        executor.spawn_blocking(move || outbound_pump(bulk, pipe_rx, stop, runtime, timeout, device));
    }

    info!("USB accessory transport open on device {}", device);
    Transport::with_release(
        TransportKind::UsbAccessory { device },
        entity_side,
        move || {
            stop.store(true, Ordering::SeqCst);
        },
        released,
    )
}

/// Device -> entity
fn inbound_pump<B: BulkIo>(
    shared: Arc<SharedBulk<B>>,
    mut pipe: WriteHalf<DuplexStream>,
    stop: Arc<AtomicBool>,
    runtime: Handle,
    timeout: Duration,
    device: DeviceId,
) {
    let mut buf = vec![0u8; READ_CHUNK];

    let result = loop {
        if stop.load(Ordering::SeqCst) {
            break Ok(());
        }

        match shared.bulk.read_bulk(&mut buf, timeout) {
            Ok(0) => continue,
            Ok(n) => {
                if let Err(e) = runtime.block_on(pipe.write_all(&buf[..n])) {
                    break Err(TransportError::Io(e));
                }
            }
            Err(rusb::Error::Timeout) => continue,
            Err(e) => break Err(TransportError::Usb(e)),
        }
    };

    match result {
        Ok(()) => debug!("Inbound pump for device {} stopped", device),
        Err(e) => warn!("Inbound pump for device {} ended: {}", device, e),
    }
    if let Err(e) = runtime.block_on(pipe.shutdown()) {
        debug!("Could not shut down inbound pipe for device {}: {}", device, e);
    }
}

/// Entity -> device
fn outbound_pump<B: BulkIo>(
    shared: Arc<SharedBulk<B>>,
    mut pipe: ReadHalf<DuplexStream>,
    stop: Arc<AtomicBool>,
    runtime: Handle,
    timeout: Duration,
    device: DeviceId,
) {
    let mut buf = vec![0u8; READ_CHUNK];

    let result = 'pump: loop {
        let n = match runtime.block_on(pipe.read(&mut buf)) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(TransportError::Io(e)),
        };

        let mut written = 0;
        while written < n {
            if stop.load(Ordering::SeqCst) {
                break 'pump Ok(());
            }
            match shared.bulk.write_bulk(&buf[written..n], timeout) {
                Ok(sent) => written += sent,
                Err(rusb::Error::Timeout) => continue,
                Err(e) => break 'pump Err(TransportError::Usb(e)),
            }
        }
    };

    match result {
        Ok(()) => debug!("Outbound pump for device {} stopped", device),
        Err(e) => warn!("Outbound pump for device {} ended: {}", device, e),
    }
}
