// ============================================
// File: crates/shroud-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Centralizes all cryptographic operations of the v2 transport, using
//! audited RustCrypto and dalek implementations.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keys`]: Ephemeral X25519 keys and symmetric packet keys
//! - [`kdf`]: HKDF-SHA256 key schedule
//! - [`transport`]: Per-direction ChaCha20-Poly1305 cipher with rekey
//! - [`session`]: `AeadSession` (both directions, decoy header)
//! - [`handshake`]: Sans-IO v2 handshake state machine
//!
//! ## Cryptographic Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Handshake Phase                          │
//! │  Initiator                                    Responder     │
//! │    │  X25519 key | garbage ───────────────────────► │       │
//! │    │ ◄─────── X25519 key | garbage | term | version │       │
//! │    │  term | version ─────────────────────────────► │       │
//! │    │                                                │       │
//! │    │      X25519 ──► HKDF-SHA256 ──► initiator_P    │       │
//! │    │                             ├─► responder_P    │       │
//! │    │                             ├─► terminators    │       │
//! │    │                             └─► session_id     │       │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Transport Phase                          │
//! │  packet key + counter ──► ChaCha20-Poly1305 ──► packet      │
//! │  every R packets: key ──► ChaCha20(key, ff..ff|epoch) ──► key│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//! - **Forward Secrecy**: Fresh ephemeral keys per connection, key ratchet
//!   every R packets
//! - **Confidentiality**: ChaCha20 stream cipher
//! - **Integrity**: Poly1305 tag over header, contents and garbage
//! - **Ordering**: Counter-derived nonces reject replays and reordering
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER roll your own crypto
//! - ALL sensitive keys implement Zeroize
//! - There is no peer authentication; the session id is what users
//!   compare out of band
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod handshake;
pub mod kdf;
pub mod keys;
pub mod session;
pub mod transport;

// Re-export primary types at module level
pub use handshake::{HandshakeProgress, KeyedHandshake, V2Handshake, MAX_GARBAGE_LEN};
pub use keys::{EphemeralKeyPair, SessionKey};
pub use session::{AeadSession, DirectionStats, Opened, PacketOpener, PacketSealer, Role, SessionContext};
pub use transport::{PacketCipher, DEFAULT_REKEY_INTERVAL};

// ============================================
// Constants
// ============================================

/// Size of X25519 public key in bytes.
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of the X25519 shared secret in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Size of ChaCha20-Poly1305 key in bytes.
pub const CHACHA20_KEY_SIZE: usize = 32;

/// Size of ChaCha20-Poly1305 nonce in bytes.
pub const CHACHA20_NONCE_SIZE: usize = 12;

/// Size of Poly1305 authentication tag in bytes.
pub const POLY1305_TAG_SIZE: usize = 16;

/// Size of a garbage terminator in bytes.
pub const GARBAGE_TERMINATOR_SIZE: usize = 16;
