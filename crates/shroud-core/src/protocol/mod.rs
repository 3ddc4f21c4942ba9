// ============================================
// File: crates/shroud-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines everything about the wire that is not cryptography: frame
//! layouts for both transports, the application message envelope, and
//! the version negotiation table.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`codec`]: v1 and v2 framing
//! - [`messages`]: `Command`, `NetMessage`, v2 inner envelope
//! - [`version`]: Four-case negotiation table
//!
//! ## Layering
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ NetMessage (command, payload)                 │
//! ├──────────────────────┬────────────────────────┤
//! │ v1: header + payload │ v2: envelope           │
//! │                      │   → AEAD seal          │
//! │                      │   → u24 length prefix  │
//! └──────────────────────┴────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Nothing in here holds state across calls; keep it that way so the
//!   codec can be shared by reader and writer halves
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod codec;
pub mod messages;
pub mod version;

// Re-export primary types
pub use codec::{Decoded, FrameCodec, DEFAULT_MAGIC, MAX_MESSAGE_SIZE};
pub use messages::{decode_envelope, encode_envelope, Command, NetMessage};
pub use version::{negotiated_version, negotiation_path, NegotiationPath};
