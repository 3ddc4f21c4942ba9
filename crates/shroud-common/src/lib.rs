// ============================================
// File: crates/shroud-common/src/lib.rs
// ============================================
//! # Shroud Common - Shared Types Library
//!
//! ## Creation Reason
//! Provides the identifiers and error types every shroud crate agrees on,
//! so a connection is described the same way by the codec, the dialer and
//! the connection manager.
//!
//! ## Main Functionality
//! - [`types`]: Connection identifiers, direction, transport version, peer addresses
//! - [`time`]: Wall-clock timestamps for peer reports
//! - [`error`]: Common error types and result aliases
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 shroud-node                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │    shroud-core         shroud-transport            │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │              shroud-common  ◄── You are here       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the foundation - changes ripple into every other crate
//! - Keep dependencies minimal (no async runtime here)
//! - `Display` output of the types below is part of the observability
//!   surface (`"v1"`, `"inbound"`, `"peer-7"`); do not change it casually
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use types::{ConnectionId, Direction, PeerAddr, SessionId, TransportVersion};
