// ============================================
// File: crates/shroud-node/src/lib.rs
// ============================================
//! # Shroud Node Library
//!
//! ## Creation Reason
//! Runs peer connections over either the plaintext v1 transport or the
//! encrypted v2 transport, deciding per connection which one applies.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: TOML node configuration
//! - [`node`]: Node orchestration and background tasks
//! - [`services`]: Connection-level logic
//!   - [`services::policy`]: Dial rules and capability strategies
//!   - [`services::slots`]: Inbound/outbound limits
//!   - [`services::negotiator`]: Transport negotiation
//!   - [`services::peer`]: Peer connection send/receive
//!   - [`services::manager`]: Connection manager
//! - [`error`]: Node error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Shroud Node                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐   │
//! │  │   Config    │────►│    Node     │────►│ Connection      │   │
//! │  │             │     │ Orchestrator│     │ Manager         │   │
//! │  └─────────────┘     └─────────────┘     └────────┬────────┘   │
//! │                                                   │            │
//! │         ┌─────────────────────┬───────────────────┤            │
//! │         ▼                     ▼                   ▼            │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐      │
//! │  │   Policy    │     │ Negotiator  │     │    Peer     │      │
//! │  │   + Slots   │     │             │     │ Connection  │      │
//! │  └─────────────┘     └─────────────┘     └─────────────┘      │
//! │                                                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                      Transport Layer                            │
//! │  ┌─────────────────────┐     ┌─────────────────────────────┐   │
//! │  │ TCP / SOCKS5 dialer │     │  In-memory network (tests)  │   │
//! │  └─────────────────────┘     └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! App → send → [envelope → seal] → frame → socket
//! App ← deliveries ← receive ← [open → drop decoys] ← frame ← socket
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Configuration changes require restart (no hot-reload)
//! - Connection policy is read-only once the node is built
//!
//! ## Last Modified
//! v0.1.0 - Initial node library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod node;
pub mod services;

// Re-export primary types
pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::Node;
pub use services::{ConnectionManager, ConnectionPolicy, DialHint, PeerConnection, PeerInfo};
