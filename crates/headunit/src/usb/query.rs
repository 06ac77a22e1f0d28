//! Accessory mode queries
//!
//! Each query is one step of the negotiation chain. A step takes ownership of
//! the device, talks to it, and either hands it on to the next step, produces
//! a transport, or reports that the device is about to re-enumerate.

use crate::error::StepFailure;
use crate::transport::Transport;
use crate::usb::device::AccessoryDevice;
use aoap::{AccessoryIdentity, AccessoryIds, AccessoryRequest, ProtocolVersion, StringIndex};
use std::fmt;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

/// Settings shared by every step of a negotiation
#[derive(Clone)]
pub struct NegotiationContext {
    /// Pool the accessory transport pumps are posted to
    pub executor: Handle,
    /// Ids of a device already in accessory mode
    pub accessory_ids: AccessoryIds,
    /// Strings announced before the switch
    pub identity: AccessoryIdentity,
    /// Bound on every control transfer
    pub control_timeout: Duration,
    /// Bound on every bulk transfer once the transport is up
    pub bulk_timeout: Duration,
}

impl fmt::Debug for NegotiationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationContext")
            .field("accessory_ids", &self.accessory_ids)
            .field("control_timeout", &self.control_timeout)
            .field("bulk_timeout", &self.bulk_timeout)
            .finish_non_exhaustive()
    }
}

/// Result of a successful step
pub enum StepOutcome {
    /// Hand the device to the next step
    Continue(Box<dyn AccessoryDevice>),
    /// The device is an accessory; negotiation is done
    Accessory(Transport),
    /// The device accepted the switch and is dropping off the bus
    ModeSwitched,
}

impl fmt::Debug for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Continue(device) => write!(f, "Continue({})", device.id()),
            StepOutcome::Accessory(transport) => write!(f, "Accessory({:?})", transport),
            StepOutcome::ModeSwitched => write!(f, "ModeSwitched"),
        }
    }
}

/// One step of the negotiation chain
pub trait AccessoryQuery: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        device: Box<dyn AccessoryDevice>,
        ctx: &NegotiationContext,
    ) -> Result<StepOutcome, StepFailure>;
}

/// Yield a transport straight away when the device is already an accessory
pub struct ProbeAccessory;

impl AccessoryQuery for ProbeAccessory {
    fn name(&self) -> &'static str {
        "probe-accessory"
    }

    fn execute(
        &self,
        device: Box<dyn AccessoryDevice>,
        ctx: &NegotiationContext,
    ) -> Result<StepOutcome, StepFailure> {
        let ids = device.ids();
        if !ctx.accessory_ids.matches_ids(ids) {
            debug!("Device {} ({}) is not in accessory mode", device.id(), ids);
            return Ok(StepOutcome::Continue(device));
        }

        debug!("Device {} ({}) is already an accessory", device.id(), ids);
        device.into_transport(ctx).map(StepOutcome::Accessory)
    }
}

/// GET_PROTOCOL: make sure the device implements accessory mode at all
pub struct ReadProtocolVersion;

impl AccessoryQuery for ReadProtocolVersion {
    fn name(&self) -> &'static str {
        "read-protocol-version"
    }

    fn execute(
        &self,
        mut device: Box<dyn AccessoryDevice>,
        ctx: &NegotiationContext,
    ) -> Result<StepOutcome, StepFailure> {
        let request = AccessoryRequest::GetProtocol;
        let mut reply = [0u8; ProtocolVersion::WIRE_SIZE];
        let len = device.read_control(
            request.request_type(),
            request.code(),
            0,
            0,
            &mut reply,
            ctx.control_timeout,
        )?;

        let version = ProtocolVersion::decode_supported(&reply[..len])?;
        debug!(
            "Device {} speaks accessory protocol version {}",
            device.id(),
            version
        );
        Ok(StepOutcome::Continue(device))
    }
}

/// SEND_STRING for every identification string
pub struct SendIdentity;

impl AccessoryQuery for SendIdentity {
    fn name(&self) -> &'static str {
        "send-identity"
    }

    fn execute(
        &self,
        mut device: Box<dyn AccessoryDevice>,
        ctx: &NegotiationContext,
    ) -> Result<StepOutcome, StepFailure> {
        let request = AccessoryRequest::SendString;

        for index in StringIndex::ALL {
            let payload = ctx.identity.encode(index)?;
            let sent = device.write_control(
                request.request_type(),
                request.code(),
                0,
                index.index(),
                &payload,
                ctx.control_timeout,
            )?;
            if sent != payload.len() {
                return Err(StepFailure::ShortWrite {
                    sent,
                    expected: payload.len(),
                });
            }
        }

        debug!("Sent identification strings to device {}", device.id());
        Ok(StepOutcome::Continue(device))
    }
}

/// START: ask the device to re-enumerate in accessory mode
pub struct StartAccessoryMode;

impl AccessoryQuery for StartAccessoryMode {
    fn name(&self) -> &'static str {
        "start-accessory-mode"
    }

    fn execute(
        &self,
        mut device: Box<dyn AccessoryDevice>,
        ctx: &NegotiationContext,
    ) -> Result<StepOutcome, StepFailure> {
        let request = AccessoryRequest::Start;
        device.write_control(
            request.request_type(),
            request.code(),
            0,
            0,
            &[],
            ctx.control_timeout,
        )?;

        debug!("Device {} is switching to accessory mode", device.id());
        Ok(StepOutcome::ModeSwitched)
    }
}

/// Steps in the order they run for a fresh device
pub fn default_steps() -> Vec<Box<dyn AccessoryQuery>> {
    vec![
        Box::new(ProbeAccessory),
        Box::new(ReadProtocolVersion),
        Box::new(SendIdentity),
        Box::new(StartAccessoryMode),
    ]
}
