// ============================================
// File: crates/shroud-core/src/crypto/handshake.rs
// ============================================
//! # v2 Handshake Cryptography
//!
//! ## Creation Reason
//! Builds and verifies the byte sequences of the encrypted transport's
//! handshake without touching sockets. The node's negotiator drives this
//! state machine with whatever bytes it has read so far.
//!
//! ## Main Functionality
//! - `V2Handshake`: Local ephemeral key plus random garbage
//! - `KeyedHandshake`: After the peer key arrived; emits terminator and
//!   version packet, consumes the peer's garbage, decoys and version packet
//! - `HandshakeProgress`: `NeedMore` or `Complete { consumed }`
//!
//! ## Handshake Flow
//! ```text
//! Initiator                                         Responder
//!   │  key[32] | garbage[0..=4095]  ──────────────►  │
//!   │                                                │ receive_key
//!   │  ◄──── key[32] | garbage | terminator |        │
//!   │        (decoys) | version packet               │
//!   │ receive_key                                    │
//!   │  terminator | (decoys) | version packet  ────► │
//!   │                                                │
//!   │ process(): find responder terminator,          │ process(): find initiator
//!   │ open packets until version                     │ terminator, open until version
//!   │ ═══════════════ AeadSession ══════════════════ │
//! ```
//!
//! The first packet after a terminator (decoy or version) carries the
//! sender's garbage as associated data, so garbage cannot be altered in
//! flight without failing authentication.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `process` must be called with the SAME growing buffer each time; it
//!   remembers how far it got so cipher state is never advanced twice
//! - Terminator search is constant-time per window
//!
//! ## Last Modified
//! v0.1.0 - Initial handshake implementation

use rand::{Rng, RngCore};
use subtle::ConstantTimeEq;
use tracing::{debug, trace};

use super::keys::EphemeralKeyPair;
use super::session::{AeadSession, Role, SessionContext};
use super::{GARBAGE_TERMINATOR_SIZE, X25519_PUBLIC_KEY_SIZE};
use crate::error::{CoreError, Result};
use crate::protocol::codec::FrameCodec;
use crate::protocol::version::VERSION_CONTENTS;

// ============================================
// Constants
// ============================================

/// Maximum number of garbage bytes before the terminator.
pub const MAX_GARBAGE_LEN: usize = 4095;

/// Bytes scanned for a terminator before the handshake fails.
pub const MAX_TERMINATOR_SCAN: usize = MAX_GARBAGE_LEN + GARBAGE_TERMINATOR_SIZE;

// ============================================
// HandshakeProgress
// ============================================

/// Result of feeding bytes into [`KeyedHandshake::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProgress {
    /// Read more bytes and call again with the extended buffer.
    NeedMore,
    /// Version packet authenticated; bytes after `consumed` are
    /// application packets.
    Complete {
        /// Bytes of the buffer used by garbage, terminator, decoys and version
        consumed: usize,
    },
}

// ============================================
// V2Handshake
// ============================================

/// Local half of a v2 handshake before the peer key is known.
#[derive(Debug)]
pub struct V2Handshake {
    role: Role,
    codec: FrameCodec,
    rekey_interval: u32,
    keypair: EphemeralKeyPair,
    garbage: Vec<u8>,
}

impl V2Handshake {
    /// Starts a handshake with random garbage of random length.
    ///
    /// The ephemeral key is regenerated until its encoding does not start
    /// with the network magic.
    #[must_use]
    pub fn new(role: Role, codec: FrameCodec, rekey_interval: u32) -> Self {
        let mut rng = rand::thread_rng();
        let mut garbage = vec![0u8; rng.gen_range(0..=MAX_GARBAGE_LEN)];
        rng.fill_bytes(&mut garbage);
        Self::build(role, codec, rekey_interval, garbage)
    }

    /// Starts a handshake with caller-chosen garbage.
    ///
    /// # Errors
    /// `Handshake` if the garbage is longer than [`MAX_GARBAGE_LEN`].
    pub fn with_garbage(
        role: Role,
        codec: FrameCodec,
        rekey_interval: u32,
        garbage: Vec<u8>,
    ) -> Result<Self> {
        if garbage.len() > MAX_GARBAGE_LEN {
            return Err(CoreError::handshake(format!(
                "garbage of {} bytes exceeds {MAX_GARBAGE_LEN}",
                garbage.len()
            )));
        }
        Ok(Self::build(role, codec, rekey_interval, garbage))
    }

    fn build(role: Role, codec: FrameCodec, rekey_interval: u32, garbage: Vec<u8>) -> Self {
        let keypair = EphemeralKeyPair::generate_avoiding_prefix(&codec.magic());
        Self {
            role,
            codec,
            rekey_interval,
            keypair,
            garbage,
        }
    }

    /// Returns this side's role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the local public key.
    #[must_use]
    pub fn public_key(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.keypair.public_key_bytes()
    }

    /// Returns the garbage this side will send.
    #[must_use]
    pub fn garbage(&self) -> &[u8] {
        &self.garbage
    }

    /// Returns `key | garbage`, the first bytes this side sends.
    #[must_use]
    pub fn key_and_garbage(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(X25519_PUBLIC_KEY_SIZE + self.garbage.len());
        out.extend_from_slice(&self.public_key());
        out.extend_from_slice(&self.garbage);
        out
    }

    /// Completes key agreement with the peer's public key.
    ///
    /// # Errors
    /// - `KeyExchange` for a non-contributory peer key
    /// - `KeyDerivation` / `InvalidInput` from session initialization
    pub fn receive_key(self, peer_key: &[u8; X25519_PUBLIC_KEY_SIZE]) -> Result<KeyedHandshake> {
        let local_key = self.public_key();
        let (initiator_key, responder_key) = match self.role {
            Role::Initiator => (local_key, *peer_key),
            Role::Responder => (*peer_key, local_key),
        };

        let shared = self.keypair.exchange(peer_key)?;
        let context = SessionContext {
            network_magic: self.codec.magic(),
            initiator_key,
            responder_key,
            rekey_interval: self.rekey_interval,
        };
        let session = AeadSession::initialize(&shared, self.role, &context)?;
        debug!(role = %self.role, session_id = ?session.session_id(), "Handshake keys derived");

        Ok(KeyedHandshake {
            codec: self.codec,
            session,
            local_garbage: self.garbage,
            remote_garbage: None,
            offset: 0,
            version_received: false,
            decoys_received: 0,
        })
    }
}

// ============================================
// KeyedHandshake
// ============================================

/// Handshake state after key agreement.
#[derive(Debug)]
pub struct KeyedHandshake {
    codec: FrameCodec,
    session: AeadSession,
    local_garbage: Vec<u8>,
    /// Peer garbage, once its terminator has been found
    remote_garbage: Option<Vec<u8>>,
    /// Position in the peer buffer up to which packets were opened
    offset: usize,
    version_received: bool,
    decoys_received: u64,
}

impl KeyedHandshake {
    /// Builds `terminator | decoys | version packet`.
    ///
    /// The first packet authenticates the local garbage.
    ///
    /// # Errors
    /// Sealing or framing errors; fatal for the handshake.
    pub fn terminator_and_version(&mut self, decoys: &[&[u8]]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(GARBAGE_TERMINATOR_SIZE + 64);
        out.extend_from_slice(self.session.local_terminator());

        let garbage = std::mem::take(&mut self.local_garbage);
        let packets = decoys
            .iter()
            .map(|decoy| (*decoy, true))
            .chain(std::iter::once((&VERSION_CONTENTS[..], false)));
        for (index, (contents, is_decoy)) in packets.enumerate() {
            let aad: &[u8] = if index == 0 { &garbage } else { &[] };
            let ciphertext = self.session.seal_with_aad(aad, contents, is_decoy)?;
            out.extend_from_slice(&self.codec.encode_v2_packet(&ciphertext)?);
        }
        Ok(out)
    }

    /// Consumes the peer's garbage, terminator, decoys and version packet.
    ///
    /// `buf` holds every byte received after the peer's public key.
    ///
    /// # Errors
    /// - `GarbageTooLong` if no terminator appears within the limit
    /// - `Authentication` if a packet fails to open
    /// - `Format` on an impossible packet length
    pub fn process(&mut self, buf: &[u8]) -> Result<HandshakeProgress> {
        if self.version_received {
            return Ok(HandshakeProgress::Complete {
                consumed: self.offset,
            });
        }

        if self.remote_garbage.is_none() {
            match find_terminator(buf, self.session.remote_terminator()) {
                Some(pos) => {
                    trace!(garbage_len = pos, "Peer garbage terminator found");
                    self.remote_garbage = Some(buf[..pos].to_vec());
                    self.offset = pos + GARBAGE_TERMINATOR_SIZE;
                }
                None if buf.len() >= MAX_TERMINATOR_SCAN => {
                    return Err(CoreError::GarbageTooLong {
                        max: MAX_TERMINATOR_SCAN,
                    });
                }
                None => return Ok(HandshakeProgress::NeedMore),
            }
        }

        loop {
            let Some((ciphertext, consumed)) =
                self.codec.decode_v2_packet(&buf[self.offset..])?.into_frame()
            else {
                return Ok(HandshakeProgress::NeedMore);
            };

            // Only the first packet after the terminator carries the garbage
            let first = self.session.recv_stats().packets == 0;
            let aad: &[u8] = if first {
                self.remote_garbage.as_deref().unwrap_or_default()
            } else {
                &[]
            };
            let opened = self.session.open_with_aad(aad, &ciphertext)?;
            self.offset += consumed;

            if opened.is_decoy {
                self.decoys_received += 1;
                trace!(len = opened.contents.len(), "Handshake decoy discarded");
                continue;
            }

            // Version contents are ignored
            self.version_received = true;
            debug!(
                consumed = self.offset,
                decoys = self.decoys_received,
                "Peer version packet authenticated"
            );
            return Ok(HandshakeProgress::Complete {
                consumed: self.offset,
            });
        }
    }

    /// Decoys received before the version packet.
    #[must_use]
    pub const fn decoys_received(&self) -> u64 {
        self.decoys_received
    }

    /// Returns the established session.
    ///
    /// # Errors
    /// `Handshake` if the peer's version packet has not been processed.
    pub fn finish(self) -> Result<AeadSession> {
        if !self.version_received {
            return Err(CoreError::handshake("version packet not yet received"));
        }
        Ok(self.session)
    }
}

/// Finds `terminator` in the scan window of `buf`.
fn find_terminator(buf: &[u8], terminator: &[u8; GARBAGE_TERMINATOR_SIZE]) -> Option<usize> {
    let window = &buf[..buf.len().min(MAX_TERMINATOR_SCAN)];
    window
        .windows(GARBAGE_TERMINATOR_SIZE)
        .position(|w| bool::from(w.ct_eq(terminator)))
}

// ============================================
// Tests
// ============================================
