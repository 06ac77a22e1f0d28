//! USB device abstraction
//!
//! [`AccessoryDevice`] is what the negotiation chain works on: control
//! transfers on endpoint zero plus a way to turn the device into a
//! [`Transport`] once it is in accessory mode. [`RusbDevice`] is the libusb
//! implementation; it caches the device descriptor and opens the device
//! lazily on the first transfer.

use crate::error::StepFailure;
use crate::transport::Transport;
use crate::transport::usb::{AccessoryEndpoints, ClaimedInterface, open_transport};
use crate::usb::query::NegotiationContext;
use aoap::{ACCESSORY_INTERFACE, DeviceId, UsbIds};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, Direction, TransferType};
use std::time::Duration;
use tracing::{debug, warn};

/// A USB device under negotiation
///
/// Owned by exactly one negotiation step at a time and moved into the next
/// step when the current one succeeds.
pub trait AccessoryDevice: Send {
    fn id(&self) -> DeviceId;

    fn ids(&self) -> UsbIds;

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    /// Claim the accessory interface and start moving bytes
    fn into_transport(self: Box<Self>, ctx: &NegotiationContext) -> Result<Transport, StepFailure>;
}

/// libusb-backed device
pub struct RusbDevice {
    device: Device<Context>,
    id: DeviceId,
    descriptor: DeviceDescriptor,
    handle: Option<DeviceHandle<Context>>,
}

impl RusbDevice {
    /// Wrap a device, reading and caching its descriptor
    pub fn new(device: Device<Context>) -> rusb::Result<Self> {
        let descriptor = device.device_descriptor()?;
        let id = DeviceId::new(device.bus_number(), device.address());

        Ok(Self {
            device,
            id,
            descriptor,
            handle: None,
        })
    }

    pub fn class_code(&self) -> u8 {
        self.descriptor.class_code()
    }

    /// Open the device if it is not open yet
    fn handle(&mut self) -> rusb::Result<&DeviceHandle<Context>> {
        if self.handle.is_none() {
            let handle = self.device.open().inspect_err(|e| {
                warn!("Failed to open device {}: {}", self.id, e);
            })?;
            debug!("Opened device {}", self.id);
            self.handle = Some(handle);
        }

        self.handle.as_ref().ok_or(rusb::Error::NoDevice)
    }

    /// Manufacturer and product strings, when the device is readable
    pub fn strings(&self) -> (Option<String>, Option<String>) {
        let Ok(handle) = self.device.open() else {
            return (None, None);
        };

        let manufacturer = self
            .descriptor
            .manufacturer_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
        let product = self
            .descriptor
            .product_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

        (manufacturer, product)
    }

    /// Locate the bulk endpoint pair on the accessory interface
    fn accessory_endpoints(&self) -> Result<AccessoryEndpoints, StepFailure> {
        let config = self
            .device
            .active_config_descriptor()
            .or_else(|_| self.device.config_descriptor(0))?;

        let interface = config
            .interfaces()
            .find(|interface| interface.number() == ACCESSORY_INTERFACE)
            .ok_or(StepFailure::MissingEndpoints)?;

        let mut bulk_in = None;
        let mut bulk_out = None;
        for setting in interface.descriptors() {
            for endpoint in setting.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In => bulk_in = bulk_in.or(Some(endpoint.address())),
                    Direction::Out => bulk_out = bulk_out.or(Some(endpoint.address())),
                }
            }
        }

        match (bulk_in, bulk_out) {
            (Some(bulk_in), Some(bulk_out)) => Ok(AccessoryEndpoints {
                interface: ACCESSORY_INTERFACE,
                bulk_in,
                bulk_out,
            }),
            _ => Err(StepFailure::MissingEndpoints),
        }
    }
}

impl AccessoryDevice for RusbDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn ids(&self) -> UsbIds {
        UsbIds {
            vendor_id: self.descriptor.vendor_id(),
            product_id: self.descriptor.product_id(),
        }
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle()?
            .read_control(request_type, request, value, index, buf, timeout)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle()?
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn into_transport(
        mut self: Box<Self>,
        ctx: &NegotiationContext,
    ) -> Result<Transport, StepFailure> {
        let endpoints = self.accessory_endpoints()?;
        self.handle()?;
        let handle = self.handle.take().ok_or(StepFailure::Usb(rusb::Error::NoDevice))?;

        debug!(
            "Accessory endpoints on device {}: in={:#04x} out={:#04x}",
            self.id, endpoints.bulk_in, endpoints.bulk_out
        );

        let claimed = ClaimedInterface::claim(handle, endpoints, self.id)?;
        Ok(open_transport(
            claimed,
            self.id,
            &ctx.executor,
            ctx.bulk_timeout,
        ))
    }
}
