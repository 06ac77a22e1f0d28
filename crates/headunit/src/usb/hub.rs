//! Hotplug hub
//!
//! Turns device arrivals into negotiations and departures into events for
//! the orchestrator. Arrivals are only negotiated while the hub is watching;
//! departures are always reported, since the orchestrator needs them to tear
//! down a session whose device was unplugged.
//!
//! Hotplug callbacks run on USB event threads and libusb forbids blocking
//! transfers there, so every negotiation is posted to the executor's blocking
//! threads.

use crate::app::DeviceWatcher;
use crate::app::events::AppEventSender;
use crate::error::{InitializationError, NegotiationError};
use crate::transport::Transport;
use crate::usb::chain::QueryChain;
use crate::usb::device::{AccessoryDevice, RusbDevice};
use crate::usb::enumerator;
use crate::usb::filter::DeviceFilter;
use aoap::DeviceId;
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Negotiation bookkeeping shared by enumeration and hotplug
pub struct HubCore {
    chain: Arc<QueryChain>,
    executor: Handle,
    events: AppEventSender,
    watching: AtomicBool,
    in_flight: Mutex<HashSet<DeviceId>>,
}

impl HubCore {
    pub fn new(chain: Arc<QueryChain>, executor: Handle, events: AppEventSender) -> Arc<Self> {
        Arc::new(Self {
            chain,
            executor,
            events,
            watching: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn set_watching(&self, watching: bool) {
        let previous = self.watching.swap(watching, Ordering::SeqCst);
        if previous != watching {
            debug!(
                "Device watching {}",
                if watching { "armed" } else { "cancelled" }
            );
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// Number of negotiations currently running
    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<DeviceId>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start negotiating with a newly seen device
    ///
    /// Returns `false` when the device was ignored: the hub is not watching or
    /// the same device is already being negotiated.
    pub fn device_arrived(self: &Arc<Self>, device: Box<dyn AccessoryDevice>) -> bool {
        let id = device.id();
        if !self.is_watching() {
            debug!("Ignoring device {}: not watching", id);
            return false;
        }
        if !self.lock_in_flight().insert(id) {
            debug!("Ignoring device {}: negotiation already running", id);
            return false;
        }

        let core = self.clone();
        self.executor.spawn_blocking(move || {
            let result = core.chain.negotiate(device);
            core.lock_in_flight().remove(&id);
            core.report(result);
        });
        true
    }

    /// Report a device that left the bus
    pub fn device_left(&self, device: DeviceId) {
        if let Err(e) = self.events.device_left(device) {
            error!("Failed to report departure of device {}: {}", device, e);
        }
    }

    fn report(&self, result: Result<Transport, NegotiationError>) {
        match result {
            Ok(transport) => {
                if let Err(e) = self.events.transport_ready(transport) {
                    error!("Failed to hand over negotiated transport: {}", e);
                }
            }
            Err(e) if e.is_mode_switch() => {
                info!("Device {} switching to accessory mode", e.device);
            }
            Err(e) => {
                warn!("{}", e);
            }
        }
    }
}

impl DeviceWatcher for HubCore {
    fn start_watching(&self) {
        self.set_watching(true);
    }

    fn cancel(&self) {
        self.set_watching(false);
    }
}

/// libusb hotplug callback
struct HotplugCallback {
    core: Arc<HubCore>,
    filter: DeviceFilter,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        let id = DeviceId::new(device.bus_number(), device.address());
        debug!("Hot-plug callback: device arrived ({})", id);

        let device = match RusbDevice::new(device) {
            Ok(device) => device,
            Err(e) => {
                warn!("Failed to read descriptor of arrived device {}: {}", id, e);
                return;
            }
        };

        let ids = device.ids();
        let candidacy = self.filter.classify(ids, device.class_code());
        if !candidacy.is_negotiable() {
            debug!("Device {} ({}) is {}", id, ids, candidacy.label());
            return;
        }

        self.core.device_arrived(Box::new(device));
    }

    fn device_left(&mut self, device: Device<Context>) {
        let id = DeviceId::new(device.bus_number(), device.address());
        debug!("Hot-plug callback: device left ({})", id);
        self.core.device_left(id);
    }
}

/// Enumerator plus hotplug registration over a libusb context
pub struct UsbHub {
    context: Context,
    core: Arc<HubCore>,
    filter: DeviceFilter,
    // Deregistered on drop. Callbacks are Send but not Sync.
    _registration: Mutex<Option<Registration<Context>>>,
}

impl UsbHub {
    pub fn new(
        context: Context,
        core: Arc<HubCore>,
        filter: DeviceFilter,
    ) -> Result<Self, InitializationError> {
        let registration = if rusb::has_hotplug() {
            let callback = HotplugCallback {
                core: core.clone(),
                filter: filter.clone(),
            };
            let registration = HotplugBuilder::new()
                .enumerate(false) // Enumeration is driven by start_watching
                .register(&context, Box::new(callback))
                .map_err(InitializationError::Hotplug)?;
            debug!("Hot-plug callbacks registered");
            Some(registration)
        } else {
            warn!("libusb has no hotplug support; only devices present at watch start are seen");
            None
        };

        Ok(Self {
            context,
            core,
            filter,
            _registration: Mutex::new(registration),
        })
    }

    pub fn core(&self) -> &Arc<HubCore> {
        &self.core
    }

    /// Feed every attached candidate into the chain
    fn enumerate_once(context: &Context, core: &Arc<HubCore>, filter: &DeviceFilter) {
        match enumerator::candidates(context, filter) {
            Ok(devices) => {
                for device in devices {
                    core.device_arrived(Box::new(device));
                }
            }
            Err(e) => warn!("Failed to enumerate USB devices: {}", e),
        }
    }
}

impl DeviceWatcher for UsbHub {
    fn start_watching(&self) {
        self.core.set_watching(true);

        let context = self.context.clone();
        let core = self.core.clone();
        let filter = self.filter.clone();
        self.core
            .executor
            .spawn_blocking(move || Self::enumerate_once(&context, &core, &filter));
    }

    fn cancel(&self) {
        self.core.set_watching(false);
    }
}
