//! TCP transport for phones reachable over the network

use crate::error::TransportError;
use crate::transport::{Transport, TransportKind};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Append `default_port` when `addr` names only a host
pub fn resolve_target(addr: &str, default_port: u16) -> Result<String, TransportError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(TransportError::InvalidAddress(addr.to_string()));
    }

    // Bracketed IPv6 with or without port, or host:port
    if addr.starts_with('[') {
        return if addr.contains("]:") {
            Ok(addr.to_string())
        } else if addr.ends_with(']') {
            Ok(format!("{}:{}", addr, default_port))
        } else {
            Err(TransportError::InvalidAddress(addr.to_string()))
        };
    }

    match addr.matches(':').count() {
        0 => Ok(format!("{}:{}", addr, default_port)),
        1 => {
            let (host, port) = addr.split_once(':').unwrap_or((addr, ""));
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(TransportError::InvalidAddress(addr.to_string()));
            }
            Ok(addr.to_string())
        }
        // Bare IPv6 literal
        _ => Ok(format!("[{}]:{}", addr, default_port)),
    }
}

/// Wrap an established connection
pub fn from_stream(stream: TcpStream) -> Result<Transport, TransportError> {
    let peer = stream.peer_addr()?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
    }
    Ok(Transport::new(TransportKind::Tcp { peer }, stream))
}

/// Connect to a phone and wrap the socket in a [`Transport`]
pub async fn connect(
    addr: &str,
    default_port: u16,
    timeout: Duration,
) -> Result<Transport, TransportError> {
    let target = resolve_target(addr, default_port)?;
    info!("Connecting to {}", target);

    let stream = tokio::time::timeout(timeout, TcpStream::connect(&target))
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            addr: target.clone(),
            timeout,
        })?
        .map_err(|source| TransportError::Connect {
            addr: target.clone(),
            source,
        })?;

    let transport = from_stream(stream)?;
    info!("Connected to {}", transport.info().kind);
    Ok(transport)
}
