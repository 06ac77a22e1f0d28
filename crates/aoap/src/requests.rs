//! Accessory mode control requests
//!
//! The switch into accessory mode is driven entirely by vendor control
//! requests on endpoint zero. GET_PROTOCOL is an IN request; every other
//! request is OUT.

/// Google's USB vendor id, reported by every device in accessory mode
pub const GOOGLE_VENDOR_ID: u16 = 0x18d1;

/// Product id of an accessory without ADB
pub const ACCESSORY_PRODUCT_ID: u16 = 0x2d00;

/// Product id of an accessory with ADB enabled
pub const ACCESSORY_ADB_PRODUCT_ID: u16 = 0x2d01;

/// Interface carrying the accessory bulk endpoints
pub const ACCESSORY_INTERFACE: u8 = 0;

const DIRECTION_IN: u8 = 0x80;
const TYPE_VENDOR: u8 = 0x40;
const RECIPIENT_DEVICE: u8 = 0x00;

/// Vendor control requests understood by accessory-capable devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AccessoryRequest {
    /// Read the supported accessory protocol version (2 bytes, little-endian)
    GetProtocol = 51,
    /// Send one identification string, selected by `wIndex`
    SendString = 52,
    /// Ask the device to re-enumerate in accessory mode
    Start = 53,
}

impl AccessoryRequest {
    /// Request code placed in `bRequest`
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the request reads data from the device
    pub fn is_in(self) -> bool {
        matches!(self, AccessoryRequest::GetProtocol)
    }

    /// `bmRequestType` for this request
    pub fn request_type(self) -> u8 {
        control_request_type(self.is_in())
    }
}

/// Build a vendor/device `bmRequestType`
pub fn control_request_type(is_in: bool) -> u8 {
    let direction = if is_in { DIRECTION_IN } else { 0 };
    direction | TYPE_VENDOR | RECIPIENT_DEVICE
}

/// Index of an identification string sent with SEND_STRING
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StringIndex {
    Manufacturer = 0,
    Model = 1,
    Description = 2,
    Version = 3,
    Uri = 4,
    Serial = 5,
}

impl StringIndex {
    /// All indices in the order they are sent
    pub const ALL: [StringIndex; 6] = [
        StringIndex::Manufacturer,
        StringIndex::Model,
        StringIndex::Description,
        StringIndex::Version,
        StringIndex::Uri,
        StringIndex::Serial,
    ];

    /// Value placed in `wIndex`
    pub fn index(self) -> u16 {
        self as u16
    }

    /// Field name, for logs and errors
    pub fn name(self) -> &'static str {
        match self {
            StringIndex::Manufacturer => "manufacturer",
            StringIndex::Model => "model",
            StringIndex::Description => "description",
            StringIndex::Version => "version",
            StringIndex::Uri => "uri",
            StringIndex::Serial => "serial",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_types() {
        assert_eq!(AccessoryRequest::GetProtocol.request_type(), 0xc0);
        assert_eq!(AccessoryRequest::SendString.request_type(), 0x40);
        assert_eq!(AccessoryRequest::Start.request_type(), 0x40);
    }

    #[test]
    fn test_request_codes() {
        assert_eq!(AccessoryRequest::GetProtocol.code(), 51);
        assert_eq!(AccessoryRequest::SendString.code(), 52);
        assert_eq!(AccessoryRequest::Start.code(), 53);
    }

    #[test]
    fn test_string_indices_are_sequential() {
        for (expected, index) in StringIndex::ALL.iter().enumerate() {
            assert_eq!(index.index() as usize, expected);
        }
    }
}
