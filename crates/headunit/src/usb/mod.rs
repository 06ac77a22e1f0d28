//! USB subsystem
//!
//! Event pump, device abstraction, accessory negotiation chain and the
//! enumeration/hotplug hub that feeds negotiated transports to the
//! orchestrator.

pub mod chain;
pub mod device;
pub mod enumerator;
pub mod filter;
pub mod hub;
pub mod pump;
pub mod query;

pub use chain::QueryChain;
pub use device::{AccessoryDevice, RusbDevice};
pub use enumerator::{DeviceListing, list_devices};
pub use filter::{Candidacy, DeviceFilter};
pub use hub::{HubCore, UsbHub};
pub use pump::{EventSource, UsbEventPump};
pub use query::{AccessoryQuery, NegotiationContext, StepOutcome};
