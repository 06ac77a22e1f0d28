//! Head unit device session orchestrator
//!
//! Discovers a phone over USB (or takes a manual network connection), switches
//! it to accessory mode, and runs a single protocol session on the resulting
//! transport, restarting discovery whenever the session ends.
//!
//! The moving parts, each constructed explicitly by the binary:
//!
//! - [`usb::UsbEventPump`]: plain threads draining libusb events
//! - [`executor::IoExecutorPool`]: the async runtime for I/O and negotiation
//! - [`usb::UsbHub`]: enumeration, hotplug and the accessory negotiation chain
//! - [`app::App`]: the orchestrator task owning the session

pub mod app;
pub mod config;
pub mod entity;
pub mod error;
pub mod executor;
pub mod test_utils;
pub mod transport;
pub mod usb;

pub use app::{App, AppHandle, DeviceWatcher, Transition};
pub use config::HeadUnitConfig;
pub use error::{
    InitializationError, NegotiationError, ProtocolEntityError, StepFailure, TransportError,
};
pub use executor::IoExecutorPool;
pub use transport::Transport;
