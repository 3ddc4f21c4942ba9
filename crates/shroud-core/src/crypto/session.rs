// ============================================
// File: crates/shroud-core/src/crypto/session.rs
// ============================================
//! # AEAD Session
//!
//! ## Creation Reason
//! Owns the two directional cipher states of one v2 connection and turns
//! plaintext contents into authenticated packets and back, including the
//! decoy marker.
//!
//! ## Main Functionality
//! - `AeadSession::initialize`: Role-aware key selection from the shared secret
//! - `seal` / `open`: One packet each, counter driven, rekeying automatically
//! - `into_split`: Independent `PacketSealer` / `PacketOpener` for concurrent IO
//!
//! ## Packet Plaintext
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ header (1 B) │ contents (envelope or decoy) │
//! └──────────────┴──────────────────────────────┘
//!   header bit 0x80 = decoy, other bits reserved and ignored
//! ```
//! The header is encrypted and covered by the tag, so the decoy marker
//! is authenticated and invisible on the wire.
//!
//! ## Key Asymmetry
//! ```text
//!             send key       receive key
//! initiator   initiator_P    responder_P
//! responder   responder_P    initiator_P
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A failed `open` poisons the receive direction for good; there is no
//!   way to resynchronize a ChaCha20 stream after a lost packet
//! - Each session is owned by exactly one connection; never share one
//!   between connections
//!
//! ## Last Modified
//! v0.1.0 - Initial session implementation

use std::fmt;

use shroud_common::{Direction, SessionId};

use super::kdf::derive_key_material;
use super::keys::SessionKey;
use super::transport::PacketCipher;
use super::{GARBAGE_TERMINATOR_SIZE, POLY1305_TAG_SIZE, SHARED_SECRET_SIZE, X25519_PUBLIC_KEY_SIZE};
use crate::error::{CoreError, Result};
use crate::protocol::codec::MAGIC_SIZE;

// ============================================
// Constants
// ============================================

/// Header flag that marks a decoy packet.
pub const DECOY_FLAG: u8 = 0x80;

/// Size of the encrypted packet header.
pub const PACKET_HEADER_SIZE: usize = 1;

/// Ciphertext bytes added to the contents of every packet.
pub const PACKET_OVERHEAD: usize = PACKET_HEADER_SIZE + POLY1305_TAG_SIZE;

// ============================================
// Role
// ============================================

/// Which side of the handshake this endpoint played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sent the first key (the dialer).
    Initiator,
    /// Answered the first key (the listener).
    Responder,
}

impl Role {
    /// Maps a connection direction to its handshake role.
    #[must_use]
    pub const fn from_direction(direction: Direction) -> Self {
        match direction {
            Direction::Outbound => Self::Initiator,
            Direction::Inbound => Self::Responder,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
        }
    }
}

// ============================================
// SessionContext
// ============================================

/// Public inputs bound into the key schedule.
#[derive(Debug, Clone, Copy)]
pub struct SessionContext {
    /// Network magic.
    pub network_magic: [u8; MAGIC_SIZE],
    /// Initiator's public key as sent on the wire.
    pub initiator_key: [u8; X25519_PUBLIC_KEY_SIZE],
    /// Responder's public key as sent on the wire.
    pub responder_key: [u8; X25519_PUBLIC_KEY_SIZE],
    /// Packets between key rotations.
    pub rekey_interval: u32,
}

// ============================================
// Opened / DirectionStats
// ============================================

/// A successfully authenticated packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// Packet contents without the header byte.
    pub contents: Vec<u8>,
    /// Whether the sender marked the packet as a decoy.
    pub is_decoy: bool,
}

/// Counters of one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionStats {
    /// Packets processed.
    pub packets: u64,
    /// Key rotations performed.
    pub rekeys: u64,
}

// ============================================
// PacketSealer
// ============================================

/// Send direction of a session.
#[derive(Debug)]
pub struct PacketSealer {
    cipher: PacketCipher,
}

impl PacketSealer {
    /// Seals one packet.
    ///
    /// # Errors
    /// `CounterExhausted` or `Encryption`; both are fatal for the connection.
    pub fn seal(&mut self, contents: &[u8], is_decoy: bool) -> Result<Vec<u8>> {
        self.seal_with_aad(&[], contents, is_decoy)
    }

    /// Seals one packet, also authenticating `aad`.
    ///
    /// # Errors
    /// Same as [`PacketSealer::seal`].
    pub fn seal_with_aad(&mut self, aad: &[u8], contents: &[u8], is_decoy: bool) -> Result<Vec<u8>> {
        let mut plaintext = Vec::with_capacity(PACKET_HEADER_SIZE + contents.len());
        plaintext.push(if is_decoy { DECOY_FLAG } else { 0 });
        plaintext.extend_from_slice(contents);
        self.cipher.encrypt(aad, &plaintext)
    }

    /// Returns the send direction counters.
    #[must_use]
    pub const fn stats(&self) -> DirectionStats {
        DirectionStats {
            packets: self.cipher.packet_counter(),
            rekeys: self.cipher.rekeys(),
        }
    }

    #[cfg(test)]
    pub(crate) fn cipher_mut(&mut self) -> &mut PacketCipher {
        &mut self.cipher
    }
}

// ============================================
// PacketOpener
// ============================================

/// Receive direction of a session.
#[derive(Debug)]
pub struct PacketOpener {
    cipher: PacketCipher,
    poisoned: bool,
}

impl PacketOpener {
    /// Opens one packet.
    ///
    /// # Errors
    /// `Authentication` on any tag or counter mismatch, and on every call
    /// after the first failure.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Opened> {
        self.open_with_aad(&[], ciphertext)
    }

    /// Opens one packet that was sealed with `aad`.
    ///
    /// # Errors
    /// Same as [`PacketOpener::open`].
    pub fn open_with_aad(&mut self, aad: &[u8], ciphertext: &[u8]) -> Result<Opened> {
        if self.poisoned {
            return Err(CoreError::Authentication);
        }
        let result = self.cipher.decrypt(aad, ciphertext).and_then(|mut plaintext| {
            if plaintext.is_empty() {
                return Err(CoreError::format("packet without header byte"));
            }
            let header = plaintext.remove(0);
            Ok(Opened {
                contents: plaintext,
                is_decoy: header & DECOY_FLAG != 0,
            })
        });
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Returns `true` once a packet has failed to open.
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Returns the receive direction counters.
    #[must_use]
    pub const fn stats(&self) -> DirectionStats {
        DirectionStats {
            packets: self.cipher.packet_counter(),
            rekeys: self.cipher.rekeys(),
        }
    }
}

// ============================================
// AeadSession
// ============================================

/// Encrypted session state of one v2 connection.
///
/// # Example
/// ```
/// use shroud_core::crypto::{AeadSession, Role, SessionContext};
///
/// let ctx = SessionContext {
///     network_magic: [0xf9, 0xbe, 0xb4, 0xd9],
///     initiator_key: [1; 32],
///     responder_key: [2; 32],
///     rekey_interval: 224,
/// };
/// let mut alice = AeadSession::initialize(&[9; 32], Role::Initiator, &ctx).unwrap();
/// let mut bob = AeadSession::initialize(&[9; 32], Role::Responder, &ctx).unwrap();
///
/// let packet = alice.seal(b"hi", false).unwrap();
/// let opened = bob.open(&packet).unwrap();
/// assert_eq!(opened.contents, b"hi");
/// assert!(!opened.is_decoy);
/// ```
#[derive(Debug)]
pub struct AeadSession {
    role: Role,
    session_id: SessionId,
    local_terminator: [u8; GARBAGE_TERMINATOR_SIZE],
    remote_terminator: [u8; GARBAGE_TERMINATOR_SIZE],
    sealer: PacketSealer,
    opener: PacketOpener,
}

impl AeadSession {
    /// Derives both directions from the shared secret.
    ///
    /// Both packet counters start at zero.
    ///
    /// # Errors
    /// - `KeyDerivation` if HKDF fails
    /// - `InvalidInput` if the rekey interval is zero
    pub fn initialize(
        shared_secret: &[u8; SHARED_SECRET_SIZE],
        role: Role,
        context: &SessionContext,
    ) -> Result<Self> {
        let material = derive_key_material(
            shared_secret,
            &context.network_magic,
            &context.initiator_key,
            &context.responder_key,
        )?;

        let (send_key, recv_key, local_terminator, remote_terminator): (
            SessionKey,
            SessionKey,
            _,
            _,
        ) = match role {
            Role::Initiator => (
                material.initiator_packet_key.clone(),
                material.responder_packet_key.clone(),
                material.initiator_terminator,
                material.responder_terminator,
            ),
            Role::Responder => (
                material.responder_packet_key.clone(),
                material.initiator_packet_key.clone(),
                material.responder_terminator,
                material.initiator_terminator,
            ),
        };

        Ok(Self {
            role,
            session_id: material.session_id,
            local_terminator,
            remote_terminator,
            sealer: PacketSealer {
                cipher: PacketCipher::new(send_key, context.rekey_interval)?,
            },
            opener: PacketOpener {
                cipher: PacketCipher::new(recv_key, context.rekey_interval)?,
                poisoned: false,
            },
        })
    }

    /// Seals one packet in the send direction.
    ///
    /// # Errors
    /// See [`PacketSealer::seal`].
    pub fn seal(&mut self, contents: &[u8], is_decoy: bool) -> Result<Vec<u8>> {
        self.sealer.seal(contents, is_decoy)
    }

    /// Seals one packet, also authenticating `aad`.
    ///
    /// # Errors
    /// See [`PacketSealer::seal`].
    pub fn seal_with_aad(&mut self, aad: &[u8], contents: &[u8], is_decoy: bool) -> Result<Vec<u8>> {
        self.sealer.seal_with_aad(aad, contents, is_decoy)
    }

    /// Opens one packet in the receive direction.
    ///
    /// # Errors
    /// See [`PacketOpener::open`].
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Opened> {
        self.opener.open(ciphertext)
    }

    /// Opens one packet that was sealed with `aad`.
    ///
    /// # Errors
    /// See [`PacketOpener::open`].
    pub fn open_with_aad(&mut self, aad: &[u8], ciphertext: &[u8]) -> Result<Opened> {
        self.opener.open_with_aad(aad, ciphertext)
    }

    /// Returns this endpoint's role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the session identifier (equal on both ends).
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Terminator this endpoint sends after its garbage.
    #[must_use]
    pub const fn local_terminator(&self) -> &[u8; GARBAGE_TERMINATOR_SIZE] {
        &self.local_terminator
    }

    /// Terminator expected after the peer's garbage.
    #[must_use]
    pub const fn remote_terminator(&self) -> &[u8; GARBAGE_TERMINATOR_SIZE] {
        &self.remote_terminator
    }

    /// Send direction counters.
    #[must_use]
    pub const fn send_stats(&self) -> DirectionStats {
        self.sealer.stats()
    }

    /// Receive direction counters.
    #[must_use]
    pub const fn recv_stats(&self) -> DirectionStats {
        self.opener.stats()
    }

    /// Splits into independently owned send and receive halves.
    #[must_use]
    pub fn into_split(self) -> (PacketSealer, PacketOpener) {
        (self.sealer, self.opener)
    }
}

// ============================================
// Tests
// ============================================
