//! One-shot enumeration of attached devices

use crate::usb::device::{AccessoryDevice, RusbDevice};
use crate::usb::filter::{Candidacy, DeviceFilter};
use aoap::{DeviceId, UsbIds};
use rusb::{Context, UsbContext};
use tracing::{debug, warn};

/// One attached device, as shown by `--list-devices`
#[derive(Debug, Clone)]
pub struct DeviceListing {
    pub id: DeviceId,
    pub ids: UsbIds,
    pub class_code: u8,
    pub candidacy: Candidacy,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// Describe every attached device
pub fn list_devices(context: &Context, filter: &DeviceFilter) -> rusb::Result<Vec<DeviceListing>> {
    let mut listings = Vec::new();

    for device in context.devices()?.iter() {
        let device = match RusbDevice::new(device) {
            Ok(device) => device,
            Err(e) => {
                warn!("Skipping device without readable descriptor: {}", e);
                continue;
            }
        };

        let (manufacturer, product) = device.strings();
        let ids = device.ids();
        listings.push(DeviceListing {
            id: device.id(),
            ids,
            class_code: device.class_code(),
            candidacy: filter.classify(ids, device.class_code()),
            manufacturer,
            product,
        });
    }

    Ok(listings)
}

/// Attached devices worth a negotiation attempt
pub fn candidates(context: &Context, filter: &DeviceFilter) -> rusb::Result<Vec<RusbDevice>> {
    let mut found = Vec::new();

    for device in context.devices()?.iter() {
        let id = DeviceId::new(device.bus_number(), device.address());
        let device = match RusbDevice::new(device) {
            Ok(device) => device,
            Err(e) => {
                debug!("Skipping device {}: {}", id, e);
                continue;
            }
        };

        let ids = device.ids();
        match filter.classify(ids, device.class_code()) {
            candidacy if candidacy.is_negotiable() => found.push(device),
            Candidacy::Hub => debug!("Skipping hub {} ({})", id, ids),
            other => debug!("Device {} ({}) is {}", id, ids, other.label()),
        }
    }

    debug!("Enumerated {} candidate devices", found.len());
    Ok(found)
}
