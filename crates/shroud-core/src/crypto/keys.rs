// ============================================
// File: crates/shroud-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Defines the key types used by the v2 transport with proper security
//! properties (zeroize on drop, constant-time comparison, no key bytes
//! in `Debug` output).
//!
//! ## Main Functionality
//! - `EphemeralKeyPair`: Per-connection X25519 key agreement keys
//! - `SessionKey`: Symmetric ChaCha20-Poly1305 packet key
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  EphemeralKeyPair (per connection)                         │
//! │  ├─ Generated fresh for each handshake                     │
//! │  ├─ Public half sent in the clear (32 bytes)               │
//! │  └─ Consumed by `exchange`, cannot be reused               │
//! │                                                            │
//! │  SessionKey (per direction)                                │
//! │  ├─ Derived from the shared secret via HKDF                │
//! │  ├─ Replaced in place every REKEY_INTERVAL packets         │
//! │  └─ Zeroized when replaced and when the connection ends    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL key types MUST implement Zeroize
//! - Private keys should NEVER be logged or serialized
//! - A public key that starts with the v1 magic would make the v2 stream
//!   look like v1 to the responder; `generate_avoiding_prefix` exists for that
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{CHACHA20_KEY_SIZE, SHARED_SECRET_SIZE, X25519_PUBLIC_KEY_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// EphemeralKeyPair (X25519)
// ============================================

/// Ephemeral X25519 key pair for Diffie-Hellman key agreement.
///
/// # Example
/// ```
/// use shroud_core::crypto::EphemeralKeyPair;
///
/// let alice = EphemeralKeyPair::generate();
/// let bob = EphemeralKeyPair::generate();
///
/// let alice_public = alice.public_key_bytes();
/// let bob_public = bob.public_key_bytes();
///
/// let alice_shared = alice.exchange(&bob_public).unwrap();
/// let bob_shared = bob.exchange(&alice_public).unwrap();
/// assert_eq!(*alice_shared, *bob_shared);
/// ```
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    /// Generates a new random ephemeral key pair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Generates a key pair whose public encoding does not start with `prefix`.
    #[must_use]
    pub fn generate_avoiding_prefix(prefix: &[u8]) -> Self {
        loop {
            let candidate = Self::generate();
            if !candidate.public.as_bytes().starts_with(prefix) {
                return candidate;
            }
        }
    }

    /// Returns the public key bytes.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Performs key agreement with a peer's public key.
    ///
    /// Consumes the key pair so the private key cannot be reused.
    ///
    /// # Errors
    /// Returns `KeyExchange` if the peer key is a low-order point, which
    /// would let the peer force a known shared secret.
    pub fn exchange(
        self,
        peer_public: &[u8; X25519_PUBLIC_KEY_SIZE],
    ) -> Result<Zeroizing<[u8; SHARED_SECRET_SIZE]>> {
        let peer_key = X25519PublicKey::from(*peer_public);
        let shared = self.secret.diffie_hellman(&peer_key);
        if !shared.was_contributory() {
            return Err(CoreError::key_exchange("peer key is not contributory"));
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &format_args!("{}...", hex::encode(&self.public.as_bytes()[..4])))
            .finish_non_exhaustive()
    }
}

// ============================================
// SessionKey
// ============================================

/// Symmetric packet key for one direction of a v2 session.
///
/// # Security
/// - Zeroed on drop
/// - Never logged or serialized
/// - Constant-time comparison
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; CHACHA20_KEY_SIZE]);

impl SessionKey {
    /// Creates a session key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; CHACHA20_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    ///
    /// # Security Warning
    /// Do not log or store the returned key material.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CHACHA20_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        write!(f, "SessionKey([REDACTED])")
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SessionKey {}

// ============================================
// Tests
// ============================================
