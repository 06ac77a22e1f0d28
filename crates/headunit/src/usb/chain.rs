//! Accessory negotiation chain
//!
//! Runs the query steps for one device strictly in order. The device moves
//! from step to step; the first failure ends the run and nothing after it
//! touches the device.

use crate::error::{NegotiationError, StepFailure};
use crate::transport::Transport;
use crate::usb::device::AccessoryDevice;
use crate::usb::query::{AccessoryQuery, NegotiationContext, StepOutcome, default_steps};
use tracing::{debug, info};

pub struct QueryChain {
    steps: Vec<Box<dyn AccessoryQuery>>,
    ctx: NegotiationContext,
}

impl QueryChain {
    /// Chain with the standard accessory mode steps
    pub fn new(ctx: NegotiationContext) -> Self {
        Self::with_steps(default_steps(), ctx)
    }

    pub fn with_steps(steps: Vec<Box<dyn AccessoryQuery>>, ctx: NegotiationContext) -> Self {
        Self { steps, ctx }
    }

    /// Drive `device` through the steps until it yields a transport
    ///
    /// Blocking: control transfers run on the calling thread, each bounded by
    /// the context's control timeout.
    pub fn negotiate(
        &self,
        device: Box<dyn AccessoryDevice>,
    ) -> Result<Transport, NegotiationError> {
        let device_id = device.id();
        let ids = device.ids();
        debug!("Negotiating with device {} ({})", device_id, ids);

        let mut current = device;
        let mut index = 0;
        loop {
            let Some(step) = self.steps.get(index) else {
                return Err(NegotiationError {
                    device: device_id,
                    step: "end-of-chain",
                    reason: StepFailure::Exhausted,
                });
            };

            let fail = |reason| NegotiationError {
                device: device_id,
                step: step.name(),
                reason,
            };

            debug!("Device {}: step {} ({})", device_id, index, step.name());
            match step.execute(current, &self.ctx) {
                Ok(StepOutcome::Continue(device)) => {
                    current = device;
                    index += 1;
                }
                Ok(StepOutcome::Accessory(transport)) => {
                    info!("Device {} ({}) negotiated as accessory", device_id, ids);
                    return Ok(transport);
                }
                Ok(StepOutcome::ModeSwitched) => return Err(fail(StepFailure::ModeSwitched)),
                Err(reason) => return Err(fail(reason)),
            }
        }
    }
}
