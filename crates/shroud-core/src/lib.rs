// ============================================
// File: crates/shroud-core/src/lib.rs
// ============================================
//! # Shroud Core - Framing & Session Cryptography
//!
//! ## Creation Reason
//! Holds everything about the two wire transports that can be expressed
//! without sockets: how frames look, how packets are sealed and opened,
//! how keys rotate, and how the v2 handshake bytes are built and checked.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - `FrameCodec`: v1 (magic, command, length, checksum) and v2 (u24 length) framing
//! - `Command` / `NetMessage`: opaque application messages and the v2 envelope
//! - Negotiation decision table
//!
//! ### Crypto Module ([`crypto`])
//! - `AeadSession`: per-connection cipher state, decoy marker, rekey schedule
//! - `V2Handshake` / `KeyedHandshake`: sans-IO handshake
//! - X25519 key agreement, HKDF-SHA256 key schedule
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 shroud-node                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │    shroud-core  ◄──    shroud-transport            │
//! │    You are here               │                    │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │              shroud-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Guarantees
//! - **Confidentiality**: ChaCha20-Poly1305 authenticated encryption
//! - **Integrity**: Poly1305 MAC over every packet, including the decoy flag
//! - **Forward Secrecy**: Ephemeral X25519 per connection, periodic rekey
//! - **Ordering**: Counter nonces; any gap or replay fails authentication
//!
//! ## ⚠️ Important Note for Next Developer
//! - No async, no IO in this crate
//! - ALL keys MUST implement Zeroize
//! - Wire format changes break interop with every deployed peer
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod protocol;

// Re-export commonly used items
pub use crypto::{
    AeadSession, HandshakeProgress, KeyedHandshake, Opened, PacketOpener, PacketSealer, Role,
    V2Handshake, DEFAULT_REKEY_INTERVAL,
};
pub use error::{CoreError, Result};
pub use protocol::{Command, Decoded, FrameCodec, NegotiationPath, NetMessage};
