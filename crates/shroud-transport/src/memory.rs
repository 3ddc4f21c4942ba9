// ============================================
// File: crates/shroud-transport/src/memory.rs
// ============================================
//! # In-Memory Network
//!
//! ## Creation Reason
//! Lets whole nodes talk to each other inside one test process without
//! opening sockets or needing privileges, including proxied dials.
//!
//! ## Main Functionality
//! - `MemoryNetwork`: Shared registry of listening addresses
//! - `MemoryListener`: `Acceptor` for one registered address
//! - `MemoryDialer`: `Dialer` that connects through the registry, running
//!   the real SOCKS5 client against a proxy listener when routed so
//!
//! ## Usage in Tests
//! ```
//! use shroud_common::PeerAddr;
//! use shroud_transport::memory::MemoryNetwork;
//! use shroud_transport::traits::{Acceptor, Dialer, Route};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let network = MemoryNetwork::new();
//! let server: PeerAddr = "10.0.0.2:8333".parse()?;
//! let listener = network.bind(server.clone())?;
//! let dialer = network.dialer("10.0.0.1".parse()?);
//!
//! let _outbound = dialer.connect(&server, &Route::Direct).await?;
//! let (_inbound, origin) = listener.accept().await?;
//! assert!(origin.to_string().starts_with("10.0.0.1:"));
//! # Ok(())
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing only - do not use in production
//! - Dropping a listener unregisters its address; later dials are refused
//!
//! ## Last Modified
//! v0.1.0 - Initial in-memory network

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{duplex, DuplexStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::trace;

use shroud_common::PeerAddr;

use crate::error::{Result, TransportError};
use crate::socks5;
use crate::traits::{Acceptor, BoxedStream, Dialer, Route};

// ============================================
// Constants
// ============================================

/// Bytes buffered per direction of an in-memory stream.
pub const MEMORY_BUFFER_SIZE: usize = 64 * 1024;

/// Pending connections per listener before dials wait.
const ACCEPT_BACKLOG: usize = 128;

/// First port handed out to dialing endpoints.
const EPHEMERAL_PORT_START: u16 = 49152;

type PendingConnection = (DuplexStream, PeerAddr);

// ============================================
// MemoryNetwork
// ============================================

#[derive(Debug)]
struct NetworkInner {
    listeners: Mutex<HashMap<PeerAddr, mpsc::Sender<PendingConnection>>>,
    next_port: AtomicU16,
}

/// Registry of in-process listeners.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                listeners: Mutex::new(HashMap::new()),
                next_port: AtomicU16::new(EPHEMERAL_PORT_START),
            }),
        }
    }

    /// Registers a listener at `addr`.
    ///
    /// Onion addresses may be bound too; they are only reachable through a
    /// proxy that forwards to them.
    ///
    /// # Errors
    /// `AddressInUse` if another listener holds the address.
    pub fn bind(&self, addr: PeerAddr) -> Result<MemoryListener> {
        let mut listeners = self.inner.listeners.lock();
        if listeners.contains_key(&addr) {
            return Err(TransportError::AddressInUse {
                addr: addr.to_string(),
            });
        }
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        listeners.insert(addr.clone(), tx);
        trace!(%addr, "Memory listener registered");

        Ok(MemoryListener {
            addr,
            incoming: AsyncMutex::new(rx),
            network: self.clone(),
        })
    }

    /// Creates a dialer whose connections originate from `ip`.
    #[must_use]
    pub fn dialer(&self, ip: IpAddr) -> MemoryDialer {
        MemoryDialer {
            network: self.clone(),
            ip,
        }
    }

    /// Returns `true` if a listener is registered at `addr`.
    #[must_use]
    pub fn is_listening(&self, addr: &PeerAddr) -> bool {
        self.inner.listeners.lock().contains_key(addr)
    }

    /// Opens a raw stream from `origin` to the listener at `target`.
    ///
    /// # Errors
    /// `ConnectFailed` if nothing listens at `target` or the listener is gone.
    pub async fn connect_raw(&self, origin: PeerAddr, target: &PeerAddr) -> Result<DuplexStream> {
        let sender = self
            .inner
            .listeners
            .lock()
            .get(target)
            .cloned()
            .ok_or_else(|| TransportError::connect_failed(target, "connection refused"))?;

        let (local, remote) = duplex(MEMORY_BUFFER_SIZE);
        sender
            .send((remote, origin))
            .await
            .map_err(|_| TransportError::connect_failed(target, "listener closed"))?;
        Ok(local)
    }

    fn ephemeral_port(&self) -> u16 {
        let port = self.inner.next_port.fetch_add(1, Ordering::Relaxed);
        if port == 0 {
            self.inner.next_port.store(EPHEMERAL_PORT_START, Ordering::Relaxed);
            EPHEMERAL_PORT_START
        } else {
            port
        }
    }

    fn unregister(&self, addr: &PeerAddr) {
        self.inner.listeners.lock().remove(addr);
        trace!(%addr, "Memory listener unregistered");
    }
}

// ============================================
// MemoryListener
// ============================================

/// In-memory `Acceptor` bound to one address.
#[derive(Debug)]
pub struct MemoryListener {
    addr: PeerAddr,
    incoming: AsyncMutex<mpsc::Receiver<PendingConnection>>,
    network: MemoryNetwork,
}

impl MemoryListener {
    /// Waits for the next raw inbound stream.
    ///
    /// # Errors
    /// `ShuttingDown` once every sender is gone.
    pub async fn accept_raw(&self) -> Result<(DuplexStream, PeerAddr)> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ShuttingDown)
    }
}

#[async_trait]
impl Acceptor for MemoryListener {
    async fn accept(&self) -> Result<(BoxedStream, PeerAddr)> {
        let (stream, origin) = self.accept_raw().await?;
        Ok((Box::new(stream), origin))
    }

    fn local_addr(&self) -> PeerAddr {
        self.addr.clone()
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.network.unregister(&self.addr);
    }
}

// ============================================
// MemoryDialer
// ============================================

/// In-memory `Dialer`.
#[derive(Debug, Clone)]
pub struct MemoryDialer {
    network: MemoryNetwork,
    ip: IpAddr,
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn connect(&self, target: &PeerAddr, route: &Route) -> Result<BoxedStream> {
        let origin = PeerAddr::Ip(SocketAddr::new(self.ip, self.network.ephemeral_port()));
        match route {
            Route::Direct => {
                if target.is_anonymized() {
                    return Err(TransportError::unreachable(
                        target,
                        "anonymized destination requires a proxy",
                    ));
                }
                Ok(Box::new(self.network.connect_raw(origin, target).await?))
            }
            Route::Proxy(proxy) => {
                let mut stream = self
                    .network
                    .connect_raw(origin, &PeerAddr::Ip(*proxy))
                    .await?;
                socks5::connect(&mut stream, target).await?;
                Ok(Box::new(stream))
            }
        }
    }
}

// ============================================
// Tests
// ============================================
