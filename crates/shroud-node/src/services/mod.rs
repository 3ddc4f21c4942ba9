// ============================================
// File: crates/shroud-node/src/services/mod.rs
// ============================================
//! # Node Services
//!
//! ## Creation Reason
//! Connection-level logic of the node, separated from the wire formats
//! and cryptography in `shroud-core` and the sockets in
//! `shroud-transport`.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`policy`]: Dial rules and v2 capability strategies
//! - [`slots`]: Inbound/outbound slot accounting
//! - [`negotiator`]: v1/v2 negotiation over a fresh stream
//! - [`peer`]: Uniform send/receive over either transport
//! - [`manager`]: Owns all connections, reader tasks, reports
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ConnectionManager                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────┐   ┌──────────────────────────────┐   │
//! │  │ ConnectionPolicy │   │      ConnectionSlots         │   │
//! │  │  - route         │   │  - reserve before handshake  │   │
//! │  │  - advertise v2? │   │  - release on drop           │   │
//! │  └────────┬─────────┘   └──────────────────────────────┘   │
//! │           ▼                                                 │
//! │  ┌──────────────────┐   ┌──────────────────────────────┐   │
//! │  │   Negotiator     │──►│      PeerConnection          │   │
//! │  │  - peek / key    │   │  - send / send_decoy         │   │
//! │  │  - downgrade     │   │  - receive (decoys dropped)  │   │
//! │  └──────────────────┘   └──────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod manager;
pub mod negotiator;
pub mod peer;
pub mod policy;
pub mod slots;

// Re-export primary types
pub use manager::{ConnectionCounts, ConnectionManager, Delivery};
pub use negotiator::{NegotiationState, Negotiated, Negotiator};
pub use peer::{ConnectionState, PeerConnection, PeerInfo, TrafficStats};
pub use policy::{
    CachedCapabilityStrategy, ConnectionPolicy, DialHint, DialPlan, OptimisticStrategy,
    V2CapabilityStrategy,
};
pub use slots::{ConnectionSlots, SlotReservation};
