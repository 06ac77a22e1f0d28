//! Device and accessory type definitions

use crate::error::{AoapError, Result};
use crate::requests::{
    ACCESSORY_ADB_PRODUCT_ID, ACCESSORY_PRODUCT_ID, GOOGLE_VENDOR_ID, StringIndex,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical position of a device on the USB topology
///
/// A device that re-enumerates (for example after switching into accessory
/// mode) comes back with a new address, so two `DeviceId`s never refer to the
/// same enumeration of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    /// Bus number
    pub bus: u8,
    /// Device address on the bus
    pub address: u8,
}

impl DeviceId {
    pub fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// Vendor and product id pair from a device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbIds {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Display for UsbIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Vendor/product ids a device reports once it is in accessory mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryIds {
    #[serde(default = "AccessoryIds::default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "AccessoryIds::default_product_ids")]
    pub product_ids: Vec<u16>,
}

impl Default for AccessoryIds {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_ids: Self::default_product_ids(),
        }
    }
}

impl AccessoryIds {
    fn default_vendor_id() -> u16 {
        GOOGLE_VENDOR_ID
    }

    fn default_product_ids() -> Vec<u16> {
        vec![ACCESSORY_PRODUCT_ID, ACCESSORY_ADB_PRODUCT_ID]
    }

    /// Whether a device with these ids is already in accessory mode
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == self.vendor_id && self.product_ids.contains(&product_id)
    }

    /// Same as [`AccessoryIds::matches`] for a [`UsbIds`] pair
    pub fn matches_ids(&self, ids: UsbIds) -> bool {
        self.matches(ids.vendor_id, ids.product_id)
    }
}

/// Identification strings announced to the device before the mode switch
///
/// The device uses these to pick the application that will talk to the head
/// unit once the accessory endpoints are up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessoryIdentity {
    pub manufacturer: String,
    pub model: String,
    pub description: String,
    pub version: String,
    pub uri: String,
    pub serial: String,
}

impl Default for AccessoryIdentity {
    fn default() -> Self {
        Self {
            manufacturer: "Android".to_string(),
            model: "Android Auto".to_string(),
            description: "Android Auto".to_string(),
            version: "2.0.1".to_string(),
            uri: "https://www.android.com/auto/".to_string(),
            serial: "HU-AAAAAA001".to_string(),
        }
    }
}

impl AccessoryIdentity {
    /// Raw string for an index
    pub fn field(&self, index: StringIndex) -> &str {
        match index {
            StringIndex::Manufacturer => &self.manufacturer,
            StringIndex::Model => &self.model,
            StringIndex::Description => &self.description,
            StringIndex::Version => &self.version,
            StringIndex::Uri => &self.uri,
            StringIndex::Serial => &self.serial,
        }
    }

    /// SEND_STRING payload for an index: the string followed by a NUL byte
    pub fn encode(&self, index: StringIndex) -> Result<Vec<u8>> {
        let value = self.field(index);
        if value.as_bytes().contains(&0) {
            return Err(AoapError::InvalidString {
                field: index.name(),
            });
        }

        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        assert_eq!(DeviceId::new(1, 4).to_string(), "001:004");
        assert_ne!(DeviceId::new(1, 4), DeviceId::new(1, 5));
    }

    #[test]
    fn test_default_accessory_ids() {
        let ids = AccessoryIds::default();
        assert!(ids.matches(0x18d1, 0x2d00));
        assert!(ids.matches(0x18d1, 0x2d01));
        assert!(!ids.matches(0x18d1, 0x2d02));
        assert!(!ids.matches(0x04e8, 0x2d00));
    }

    #[test]
    fn test_identity_encoding() {
        let identity = AccessoryIdentity::default();
        let payload = identity.encode(StringIndex::Model).unwrap();
        assert_eq!(payload.last(), Some(&0));
        assert_eq!(&payload[..payload.len() - 1], b"Android Auto");
    }

    #[test]
    fn test_identity_rejects_interior_nul() {
        let identity = AccessoryIdentity {
            serial: "HU\0X".to_string(),
            ..Default::default()
        };
        assert_eq!(
            identity.encode(StringIndex::Serial),
            Err(AoapError::InvalidString { field: "serial" })
        );
    }
}
