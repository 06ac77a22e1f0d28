//! Protocol entity boundary
//!
//! The orchestrator does not speak the application protocol itself. Once a
//! transport is ready it asks a [`ProtocolEntityFactory`] to start an entity
//! on it; the entity reports its end through the [`SessionObserver`] it was
//! given and is stopped by the orchestrator on teardown.

use crate::app::events::{AppEvent, AppEventSender};
use crate::app::session::SessionId;
use crate::error::{ProtocolEntityError, TransportError};
use crate::transport::{Transport, TransportIo};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A running protocol session on one transport
pub trait ProtocolEntity: Send {
    /// Stop the entity. Called once by the orchestrator during teardown; the
    /// entity must not report termination afterwards.
    fn stop(&mut self);
}

/// Starts protocol entities on negotiated transports
pub trait ProtocolEntityFactory: Send + Sync {
    fn start(
        &self,
        transport: Transport,
        observer: SessionObserver,
    ) -> Result<Box<dyn ProtocolEntity>, ProtocolEntityError>;
}

/// Lets an entity report its own end to the orchestrator
#[derive(Debug, Clone)]
pub struct SessionObserver {
    session: SessionId,
    events: AppEventSender,
}

impl SessionObserver {
    pub fn new(session: SessionId, events: AppEventSender) -> Self {
        Self { session, events }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Report that the entity ended, cleanly (`None`) or with an error
    pub fn terminated(&self, error: Option<ProtocolEntityError>) {
        let event = AppEvent::EntityTerminated {
            session: self.session,
            error,
        };
        if let Err(e) = self.events.post(event) {
            debug!("Session {} ended after orchestrator stopped: {}", self.session, e);
        }
    }
}

/// Default entity: relays the transport to a local protocol stack
///
/// With a relay address every byte is copied both ways between the transport
/// and a TCP connection to that address. Without one, inbound bytes are
/// drained and counted so the phone side never stalls.
pub struct RelayEntityFactory {
    executor: Handle,
    relay_addr: Option<String>,
    connect_timeout: Duration,
}

impl RelayEntityFactory {
    pub fn new(executor: Handle, relay_addr: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            executor,
            relay_addr,
            connect_timeout,
        }
    }
}

impl ProtocolEntityFactory for RelayEntityFactory {
    fn start(
        &self,
        transport: Transport,
        observer: SessionObserver,
    ) -> Result<Box<dyn ProtocolEntity>, ProtocolEntityError> {
        let kind = transport.info().kind.clone();
        let io = transport.into_io();
        let relay_addr = self.relay_addr.clone();
        let connect_timeout = self.connect_timeout;
        let session = observer.session();

        info!("Session {} started on {}", session, kind);
        let task = self.executor.spawn(async move {
            let result = match relay_addr {
                Some(addr) => relay(io, &addr, connect_timeout).await,
                None => drain(io).await,
            };

            match result {
                Ok(()) => {
                    info!("Session {} transport closed by peer", session);
                    observer.terminated(None);
                }
                Err(e) => {
                    warn!("Session {} failed: {}", session, e);
                    observer.terminated(Some(e));
                }
            }
        });

        Ok(Box::new(RelayEntity {
            session,
            task: Some(task),
        }))
    }
}

struct RelayEntity {
    session: SessionId,
    task: Option<JoinHandle<()>>,
}

impl ProtocolEntity for RelayEntity {
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Session {} entity stopped", self.session);
        }
    }
}

impl Drop for RelayEntity {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn relay(
    mut io: Box<dyn TransportIo>,
    addr: &str,
    timeout: Duration,
) -> Result<(), ProtocolEntityError> {
    let mut upstream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            addr: addr.to_string(),
            timeout,
        })?
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    info!("Relaying session to {}", addr);

    match tokio::io::copy_bidirectional(&mut io, &mut upstream).await {
        Ok((to_stack, to_phone)) => {
            debug!(
                "Relay finished: {} bytes to {}, {} bytes to phone",
                to_stack, addr, to_phone
            );
            Ok(())
        }
        Err(e) => Err(TransportError::Io(e).into()),
    }
}

async fn drain(mut io: Box<dyn TransportIo>) -> Result<(), ProtocolEntityError> {
    let mut buf = vec![0u8; 16 * 1024];
    let mut total: u64 = 0;

    loop {
        match io.read(&mut buf).await {
            Ok(0) => {
                debug!("Drained {} bytes before EOF", total);
                return Ok(());
            }
            Ok(n) => total += n as u64,
            Err(e) => {
                error!("Transport read failed after {} bytes: {}", total, e);
                return Err(TransportError::Io(e).into());
            }
        }
    }
}
