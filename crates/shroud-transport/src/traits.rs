// ============================================
// File: crates/shroud-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! Abstracts how a byte stream to a peer comes into existence so the
//! negotiation and connection logic never depends on real sockets.
//!
//! ## Main Functionality
//! - `AsyncStream`: Any duplex byte stream (TCP, proxied TCP, in-memory)
//! - `Route`: Direct or through a SOCKS5 proxy
//! - `Dialer`: Opens outbound streams
//! - `Acceptor`: Yields inbound streams
//!
//! ## Implementations
//! - `TcpDialer` / `TcpAcceptor`: Production sockets
//! - `MemoryDialer` / `MemoryListener`: In-process network for tests
//!
//! ## ⚠️ Important Note for Next Developer
//! - Streams handed out here are already connected (and already tunneled
//!   when a proxy route was used); nothing above this layer knows about
//!   SOCKS5
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use shroud_common::PeerAddr;

use crate::error::Result;

// ============================================
// AsyncStream
// ============================================

/// A connected duplex byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased stream as produced by dialers and acceptors.
pub type BoxedStream = Box<dyn AsyncStream>;

// ============================================
// Route
// ============================================

/// How an outbound stream reaches its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Connect straight to the destination.
    Direct,
    /// Tunnel through a SOCKS5 proxy at this address.
    Proxy(SocketAddr),
}

impl Route {
    /// Returns `true` when the route goes through a proxy.
    #[must_use]
    pub const fn is_proxied(&self) -> bool {
        matches!(self, Self::Proxy(_))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Proxy(addr) => write!(f, "socks5://{addr}"),
        }
    }
}

// ============================================
// Dialer / Acceptor
// ============================================

/// Opens outbound streams.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connects to `target` along `route`.
    ///
    /// # Errors
    /// - `Unreachable` for an anonymized target on a direct route
    /// - `ConnectFailed` / `Timeout` when the TCP connect fails
    /// - `Proxy` when the SOCKS5 exchange fails
    async fn connect(&self, target: &PeerAddr, route: &Route) -> Result<BoxedStream>;
}

/// Yields inbound streams.
#[async_trait]
pub trait Acceptor: Send + Sync {
    /// Waits for the next inbound stream and its origin.
    ///
    /// # Errors
    /// `Io` on accept failure, `ShuttingDown` once the listener is gone.
    async fn accept(&self) -> Result<(BoxedStream, PeerAddr)>;

    /// Address this acceptor listens on.
    fn local_addr(&self) -> PeerAddr;
}
