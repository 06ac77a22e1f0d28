//! Session orchestrator
//!
//! One task owns the session and applies every transition, consuming
//! [`AppEvent`]s in the order they were posted. Hotplug callbacks, finished
//! negotiations, protocol entities and the shell only ever post events, so
//! no two transitions can interleave and a teardown requested twice (device
//! unplugged while the entity fails) runs once.
//!
//! ```text
//! Idle --transport--> Negotiating --entity started--> Active
//!  ^                       |                            |
//!  |                  start failed              left / ended / stop
//!  |                       v                            v
//!  +---------------------Idle <--------------------ShuttingDown
//! ```
//!
//! A session stays in `ShuttingDown` until its transport has released the
//! device, so a phone that is still attached can be claimed again once
//! watching resumes.

pub mod events;
pub mod session;

use crate::entity::{ProtocolEntityFactory, SessionObserver};
use crate::transport::{Transport, TransportCloser};
use events::{AppEvent, AppEventSender, AppInbox};
use session::{Session, SessionId, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Longest wait for a closed transport to release its device
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffered transitions per subscriber before the oldest are dropped
const TRANSITION_CAPACITY: usize = 32;

/// One state change, in the order the orchestrator applied it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

/// The orchestrator's view of device discovery
pub trait DeviceWatcher: Send + Sync {
    /// Negotiate devices that are attached now or arrive later
    fn start_watching(&self);

    /// Stop negotiating new arrivals. Departures are still reported.
    fn cancel(&self);
}

/// Orchestrator configuration, consumed by [`App::spawn`]
pub struct App {
    factory: Arc<dyn ProtocolEntityFactory>,
    watcher: Arc<dyn DeviceWatcher>,
}

impl App {
    pub fn new(factory: Arc<dyn ProtocolEntityFactory>, watcher: Arc<dyn DeviceWatcher>) -> Self {
        Self { factory, watcher }
    }

    /// Start the owner task on `executor`
    pub fn spawn(self, executor: &Handle, events: AppEventSender, inbox: AppInbox) -> AppHandle {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);

        let orchestrator = Orchestrator {
            factory: self.factory,
            watcher: self.watcher,
            events: events.clone(),
            state: state_tx,
            transitions: transitions.clone(),
            session: None,
            next_session: 1,
            stopping: false,
        };
        let task = executor.spawn(orchestrator.run(inbox));

        AppHandle {
            events,
            state: state_rx,
            transitions,
            task,
        }
    }
}

/// Shell-side handle to a running orchestrator
pub struct AppHandle {
    events: AppEventSender,
    state: watch::Receiver<SessionState>,
    transitions: broadcast::Sender<Transition>,
    task: JoinHandle<()>,
}

impl AppHandle {
    /// Arm device watching
    pub fn wait_for_device(&self) -> common::Result<()> {
        self.events.post(AppEvent::WaitForDevice)
    }

    /// Offer a transport obtained outside USB discovery, e.g. a manual
    /// network connection
    pub fn start(&self, transport: Transport) -> common::Result<()> {
        self.events.transport_ready(transport)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the orchestrator reports `target`
    pub async fn wait_for_state(&self, target: SessionState) -> common::Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|e| common::Error::Channel(e.to_string()))
    }

    /// Every state change from now on
    ///
    /// Unlike [`AppHandle::state`], short-lived states are not collapsed.
    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Sender for components that report to this orchestrator
    pub fn events(&self) -> AppEventSender {
        self.events.clone()
    }

    /// Tear down any session and wait for the owner task to exit
    pub async fn stop(self) {
        if let Err(e) = self.events.post(AppEvent::Stop) {
            debug!("Orchestrator already gone: {}", e);
        }
        if let Err(e) = self.task.await {
            error!("Orchestrator task failed: {}", e);
        }
    }
}

struct Orchestrator {
    factory: Arc<dyn ProtocolEntityFactory>,
    watcher: Arc<dyn DeviceWatcher>,
    events: AppEventSender,
    state: watch::Sender<SessionState>,
    transitions: broadcast::Sender<Transition>,
    session: Option<Session>,
    next_session: u64,
    stopping: bool,
}

impl Orchestrator {
    async fn run(mut self, inbox: AppInbox) {
        debug!("Orchestrator started");

        loop {
            let event = match inbox.recv().await {
                Ok(event) => event,
                Err(e) => {
                    debug!("Orchestrator inbox closed: {}", e);
                    break;
                }
            };
            if !self.handle(event).await {
                break;
            }
        }

        self.stopping = true;
        self.teardown("orchestrator stopped").await;
        info!("Orchestrator stopped");
    }

    /// Apply one event. Returns `false` once the orchestrator should exit.
    async fn handle(&mut self, event: AppEvent) -> bool {
        match event {
            AppEvent::WaitForDevice => {
                if self.current() == SessionState::Idle {
                    info!("Waiting for a device");
                    self.watcher.start_watching();
                } else {
                    debug!("Not watching for devices while {}", self.current());
                }
            }
            AppEvent::TransportReady(transport) => {
                if self.current() == SessionState::Idle {
                    self.start_session(transport).await;
                } else {
                    warn!(
                        "Dropping {}: a session is {}",
                        transport.info().kind,
                        self.current()
                    );
                    transport.close();
                }
            }
            AppEvent::DeviceLeft(device) => {
                if self.session.as_ref().is_some_and(|s| s.uses_device(device)) {
                    info!("Device {} left", device);
                    self.teardown("device left").await;
                } else {
                    debug!("Device {} left; no session uses it", device);
                }
            }
            AppEvent::EntityTerminated { session, error } => {
                if self.session.as_ref().is_some_and(|s| s.id == session) {
                    match &error {
                        Some(e) => warn!("Session {} ended: {}", session, e),
                        None => info!("Session {} ended", session),
                    }
                    self.teardown("protocol entity ended").await;
                } else {
                    debug!("Ignoring end of stale session {}", session);
                }
            }
            AppEvent::Stop => {
                info!("Stopping orchestrator");
                self.stopping = true;
                self.watcher.cancel();
                return false;
            }
        }
        true
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session state {} -> {}", previous, state);
            // No subscribers is fine
            let _ = self.transitions.send(Transition {
                from: previous,
                to: state,
            });
        }
    }

    async fn start_session(&mut self, transport: Transport) {
        self.set_state(SessionState::Negotiating);
        self.watcher.cancel();

        let id = SessionId(self.next_session);
        self.next_session += 1;

        let info = transport.info().clone();
        let closer = transport.closer();
        info!("Starting session {} on {}", id, info.kind);

        let observer = SessionObserver::new(id, self.events.clone());
        match self.factory.start(transport, observer) {
            Ok(entity) => {
                self.session = Some(Session {
                    id,
                    transport: info,
                    closer,
                    entity,
                });
                self.set_state(SessionState::Active);
            }
            Err(e) => {
                warn!("Failed to start session {}: {}", id, e);
                closer.close();
                wait_released(&closer).await;
                self.set_state(SessionState::Idle);
                self.rearm();
            }
        }
    }

    async fn teardown(&mut self, reason: &str) {
        let Some(session) = self.session.take() else {
            return;
        };

        self.set_state(SessionState::ShuttingDown);
        info!("Tearing down session {} ({})", session.id, reason);
        let closer = session.closer.clone();
        session.shut_down();
        wait_released(&closer).await;
        self.set_state(SessionState::Idle);
        self.rearm();
    }

    fn rearm(&self) {
        if !self.stopping {
            self.watcher.start_watching();
        }
    }
}

/// Wait for a closed transport to let go of its device
async fn wait_released(closer: &TransportCloser) {
    if tokio::time::timeout(RELEASE_TIMEOUT, closer.released())
        .await
        .is_err()
    {
        warn!(
            "Transport {} not released after {:?}",
            closer.info().kind,
            RELEASE_TIMEOUT
        );
    }
}
