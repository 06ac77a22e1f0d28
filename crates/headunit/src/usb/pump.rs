//! USB event pump
//!
//! A fixed set of plain threads that keep libusb's event queue drained so
//! hotplug callbacks and transfer completions are delivered promptly. Each
//! worker blocks in a bounded event wait and re-checks the stop signal
//! between waits; libusb serializes event handling internally, so running
//! several workers only means a slow callback on one of them cannot hold up
//! everybody else.
//!
//! The pump is kept apart from the executor pool so a long blocking wait
//! never occupies an async worker.

use common::StopSignal;
use rusb::UsbContext;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a failed wait before trying again
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Something whose events must be pumped from blocking threads
pub trait EventSource: Send + Sync + 'static {
    /// Wait at most `timeout` for events and dispatch them
    fn handle_events(&self, timeout: Duration) -> rusb::Result<()>;

    /// Wake workers blocked in [`EventSource::handle_events`]
    fn interrupt(&self) {}
}

impl EventSource for rusb::Context {
    fn handle_events(&self, timeout: Duration) -> rusb::Result<()> {
        UsbContext::handle_events(self, Some(timeout))
    }

    fn interrupt(&self) {
        self.interrupt_handle_events();
    }
}

/// Running pool of USB event workers
pub struct UsbEventPump<S: EventSource> {
    source: Arc<S>,
    stop: StopSignal,
    workers: Vec<JoinHandle<()>>,
}

impl<S: EventSource> UsbEventPump<S> {
    /// Spawn `workers` threads pumping `source` with waits bounded by `timeout`
    pub fn start(
        source: S,
        workers: usize,
        timeout: Duration,
        stop: StopSignal,
    ) -> io::Result<Self> {
        Self::start_with(source, workers, timeout, stop, |name, work| {
            std::thread::Builder::new().name(name).spawn(work)
        })
    }

    /// Like [`UsbEventPump::start`], creating threads through `spawn`
    ///
    /// If a thread cannot be created, the workers already running are stopped
    /// and joined before the error is returned.
    fn start_with<F>(
        source: S,
        workers: usize,
        timeout: Duration,
        stop: StopSignal,
        mut spawn: F,
    ) -> io::Result<Self>
    where
        F: FnMut(String, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>,
    {
        let source = Arc::new(source);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers.max(1) {
            let worker_source = source.clone();
            let worker_stop = stop.clone();
            let spawned = spawn(
                format!("usb-events-{}", index),
                Box::new(move || run_worker(index, worker_source.as_ref(), timeout, &worker_stop)),
            );

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Failed to start USB event worker {}: {}", index, e);
                    stop.raise();
                    for _ in 0..handles.len() {
                        source.interrupt();
                    }
                    for handle in handles {
                        if handle.join().is_err() {
                            error!("USB event worker panicked during startup unwind");
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!(
            "USB event pump started with {} workers (wait timeout {:?})",
            handles.len(),
            timeout
        );
        Ok(Self {
            source,
            stop,
            workers: handles,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Raise the stop signal, wake blocked waiters, and join every worker
    ///
    /// Returns the number of workers joined.
    pub fn shutdown(self) -> usize {
        self.stop.raise();
        for _ in 0..self.workers.len() {
            self.source.interrupt();
        }

        let mut joined = 0;
        for handle in self.workers {
            match handle.join() {
                Ok(()) => joined += 1,
                Err(e) => error!("USB event worker panicked: {:?}", e),
            }
        }

        info!("USB event pump stopped ({} workers joined)", joined);
        joined
    }
}

fn run_worker<S: EventSource>(index: usize, source: &S, timeout: Duration, stop: &StopSignal) {
    debug!("USB event worker {} started", index);

    while !stop.is_raised() {
        match source.handle_events(timeout) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                // Transient; keep pumping
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    debug!("USB event worker {} stopped", index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockEventSource;
    use std::time::Instant;

    #[test]
    fn test_workers_join_on_shutdown() {
        let stop = StopSignal::new();
        let pump = UsbEventPump::start(
            MockEventSource::new(),
            4,
            Duration::from_millis(20),
            stop.clone(),
        )
        .unwrap();
        assert_eq!(pump.worker_count(), 4);

        std::thread::sleep(Duration::from_millis(50));
        assert!(pump.source().calls() >= 4);

        let started = Instant::now();
        assert_eq!(pump.shutdown(), 4);
        assert!(stop.is_raised());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_errors_do_not_stop_the_pump() {
        let stop = StopSignal::new();
        let pump = UsbEventPump::start(
            MockEventSource::failing(),
            2,
            Duration::from_millis(5),
            stop,
        )
        .unwrap();

        // Each failure backs off 100ms; two rounds per worker prove it looped
        std::thread::sleep(Duration::from_millis(350));
        assert!(pump.source().calls() >= 4);
        assert_eq!(pump.shutdown(), 2);
    }

    #[test]
    fn test_spawn_failure_unwinds_started_workers() {
        let stop = StopSignal::new();
        let mut spawned = 0;
        let started = Instant::now();

        let result = UsbEventPump::start_with(
            MockEventSource::new(),
            4,
            Duration::from_secs(180),
            stop.clone(),
            |name, work| {
                spawned += 1;
                if spawned == 3 {
                    return Err(io::Error::other("thread limit reached"));
                }
                std::thread::Builder::new().name(name).spawn(work)
            },
        );

        let err = result.err().expect("third spawn fails");
        assert_eq!(err.to_string(), "thread limit reached");
        assert_eq!(spawned, 3);
        // The two running workers were woken from their 180s wait and joined
        assert!(stop.is_raised());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_interrupt_wakes_long_waits() {
        let stop = StopSignal::new();
        let pump = UsbEventPump::start(
            MockEventSource::new(),
            4,
            Duration::from_secs(180),
            stop,
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        assert_eq!(pump.shutdown(), 4);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
