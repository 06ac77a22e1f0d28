//! Android Open Accessory protocol vocabulary
//!
//! This crate defines the USB-level constants and types a head unit needs to
//! detect an Android device and switch it into accessory mode: the vendor
//! control requests, the identification strings sent before the switch, and
//! the vendor/product ids a device reports once it has re-enumerated as an
//! accessory.
//!
//! It does not know anything about the application protocol spoken over the
//! accessory endpoints once the switch succeeded.
//!
//! # Example
//!
//! ```
//! use aoap::{AccessoryIds, ProtocolVersion};
//!
//! let ids = AccessoryIds::default();
//! assert!(ids.matches(0x18d1, 0x2d01));
//! assert!(!ids.matches(0x18d1, 0x4ee7));
//!
//! let version = ProtocolVersion::decode(&[2, 0]).unwrap();
//! assert!(version.supports_accessory_mode());
//! ```

pub mod error;
pub mod requests;
pub mod types;
pub mod version;

pub use error::{AoapError, Result};
pub use requests::{
    ACCESSORY_INTERFACE, AccessoryRequest, GOOGLE_VENDOR_ID, StringIndex, control_request_type,
};
pub use types::{AccessoryIdentity, AccessoryIds, DeviceId, UsbIds};
pub use version::ProtocolVersion;
