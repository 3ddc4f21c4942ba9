// ============================================
// File: crates/shroud-transport/src/lib.rs
// ============================================
//! # Shroud Transport - Socket Boundary
//!
//! ## Creation Reason
//! Provides the byte streams the node negotiates over: TCP for
//! production, SOCKS5 tunneling for anonymized destinations and an
//! in-memory network for tests.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `Dialer` / `Acceptor` abstractions and `Route`
//! - [`tcp`]: TCP listener and dialer
//! - [`socks5`]: SOCKS5 CONNECT client
//! - [`memory`]: In-process network with the same traits
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 shroud-node                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │    shroud-core         shroud-transport            │
//! │                        You are here ◄──            │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │              shroud-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dial Paths
//! ```text
//! Route::Direct        node ──TCP──► peer
//! Route::Proxy(addr)   node ──TCP──► SOCKS5 proxy ──► peer (clearnet or onion)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate knows nothing about v1/v2; it only moves bytes
//! - Always use traits for testability
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod memory;
pub mod socks5;
pub mod tcp;
pub mod traits;

// Re-export primary types
pub use error::{Result, TransportError};
pub use memory::{MemoryDialer, MemoryListener, MemoryNetwork};
pub use tcp::{TcpAcceptor, TcpDialer};
pub use traits::{Acceptor, AsyncStream, BoxedStream, Dialer, Route};
