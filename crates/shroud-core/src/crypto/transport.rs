// ============================================
// File: crates/shroud-core/src/crypto/transport.rs
// ============================================
//! # Packet Cipher
//!
//! ## Creation Reason
//! Provides authenticated encryption for one direction of a v2 session
//! using ChaCha20-Poly1305, with a packet-count driven key ratchet.
//!
//! ## Main Functionality
//! - `PacketCipher`: Key, packet counter and rekey interval of one direction
//! - Nonce construction from the counter
//! - Forward-secure rekey every `rekey_interval` packets
//!
//! ## Nonce Construction
//! ```text
//! c = packet counter, R = rekey interval
//! nonce (12 bytes) = (c mod R) as u32 LE || (c div R) as u64 LE
//! ```
//!
//! ## Rekey
//! ```text
//! after using counter c, if (c + 1) mod R == 0:
//!     key = ChaCha20Poly1305(key).encrypt(
//!               nonce = ff ff ff ff || (c div R) as u64 LE,
//!               msg   = [0u8; 32])[..32]
//! ```
//! The old key is zeroized; packets sealed before the rekey cannot be
//! decrypted with the state that exists after it.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Counter MUST be unique per packet per key - reuse is catastrophic
//! - The counter never wraps; `CounterExhausted` closes the connection
//! - Both ends must use the same interval or the session desyncs at the
//!   first rekey
//!
//! ## Last Modified
//! v0.1.0 - Initial packet cipher implementation

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use tracing::debug;
use zeroize::Zeroize;

use shroud_common::CommonError;

use super::keys::SessionKey;
use super::{CHACHA20_KEY_SIZE, CHACHA20_NONCE_SIZE, POLY1305_TAG_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Default number of packets between key rotations.
pub const DEFAULT_REKEY_INTERVAL: u32 = 224;

/// Overhead added by encryption (auth tag).
pub const ENCRYPTION_OVERHEAD: usize = POLY1305_TAG_SIZE;

/// Nonce prefix used only for key rotation.
const REKEY_NONCE_PREFIX: [u8; 4] = [0xff; 4];

// ============================================
// PacketCipher
// ============================================

/// Cipher state for one direction of a session.
///
/// # Example
/// ```
/// use shroud_core::crypto::{PacketCipher, SessionKey};
///
/// let mut sender = PacketCipher::new(SessionKey::from_bytes([7; 32]), 224).unwrap();
/// let mut receiver = PacketCipher::new(SessionKey::from_bytes([7; 32]), 224).unwrap();
///
/// let ct = sender.encrypt(b"", b"hello").unwrap();
/// assert_eq!(receiver.decrypt(b"", &ct).unwrap(), b"hello");
/// ```
pub struct PacketCipher {
    key: SessionKey,
    packet_counter: u64,
    rekey_interval: u32,
    rekeys: u64,
}

impl PacketCipher {
    /// Creates a cipher with its counter at zero.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `rekey_interval` is zero.
    pub fn new(key: SessionKey, rekey_interval: u32) -> Result<Self> {
        if rekey_interval == 0 {
            return Err(CommonError::invalid_input("rekey_interval", "must be greater than 0").into());
        }
        Ok(Self {
            key,
            packet_counter: 0,
            rekey_interval,
            rekeys: 0,
        })
    }

    /// Number of packets processed with this cipher.
    #[must_use]
    pub const fn packet_counter(&self) -> u64 {
        self.packet_counter
    }

    /// Number of key rotations performed.
    #[must_use]
    pub const fn rekeys(&self) -> u64 {
        self.rekeys
    }

    /// Configured rekey interval.
    #[must_use]
    pub const fn rekey_interval(&self) -> u32 {
        self.rekey_interval
    }

    /// Encrypts one packet and advances the counter.
    ///
    /// # Errors
    /// - `CounterExhausted` if the counter space is used up
    /// - `Encryption` on an internal cipher failure
    pub fn encrypt(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_counter()?;
        let ciphertext = self
            .cipher()
            .encrypt(&self.nonce(), Payload { msg: plaintext, aad })
            .map_err(|_| CoreError::encryption("ChaCha20-Poly1305 encryption failed"))?;
        self.advance()?;
        Ok(ciphertext)
    }

    /// Decrypts one packet and advances the counter.
    ///
    /// The counter only advances on success.
    ///
    /// # Errors
    /// - `CounterExhausted` if the counter space is used up
    /// - `Authentication` on tag mismatch (tamper, wrong key, wrong counter)
    pub fn decrypt(&mut self, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_counter()?;
        if ciphertext.len() < POLY1305_TAG_SIZE {
            return Err(CoreError::Authentication);
        }
        let plaintext = self
            .cipher()
            .decrypt(&self.nonce(), Payload { msg: ciphertext, aad })
            .map_err(|_| CoreError::Authentication)?;
        self.advance()?;
        Ok(plaintext)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.key.as_bytes()))
    }

    /// Nonce for the current counter.
    fn nonce(&self) -> Nonce {
        let interval = u64::from(self.rekey_interval);
        // The remainder is below the u32 interval, so the cast is lossless
        #[allow(clippy::cast_possible_truncation)]
        let within = (self.packet_counter % interval) as u32;
        let epoch = self.packet_counter / interval;

        let mut nonce = [0u8; CHACHA20_NONCE_SIZE];
        nonce[..4].copy_from_slice(&within.to_le_bytes());
        nonce[4..].copy_from_slice(&epoch.to_le_bytes());
        Nonce::from(nonce)
    }

    fn check_counter(&self) -> Result<()> {
        if self.packet_counter == u64::MAX {
            return Err(CoreError::CounterExhausted);
        }
        Ok(())
    }

    /// Moves past the counter just used, rotating the key at the interval.
    fn advance(&mut self) -> Result<()> {
        let used = self.packet_counter;
        self.packet_counter += 1;
        if self.packet_counter % u64::from(self.rekey_interval) == 0 {
            self.rekey(used / u64::from(self.rekey_interval))?;
        }
        Ok(())
    }

    fn rekey(&mut self, epoch: u64) -> Result<()> {
        let mut nonce = [0u8; CHACHA20_NONCE_SIZE];
        nonce[..4].copy_from_slice(&REKEY_NONCE_PREFIX);
        nonce[4..].copy_from_slice(&epoch.to_le_bytes());

        let mut stream = self
            .cipher()
            .encrypt(&Nonce::from(nonce), [0u8; CHACHA20_KEY_SIZE].as_slice())
            .map_err(|_| CoreError::encryption("rekey"))?;

        let mut next = [0u8; CHACHA20_KEY_SIZE];
        next.copy_from_slice(&stream[..CHACHA20_KEY_SIZE]);
        stream.zeroize();

        // Dropping the old key zeroizes it
        self.key = SessionKey::from_bytes(next);
        next.zeroize();
        self.rekeys += 1;

        debug!(
            packet_counter = self.packet_counter,
            rekeys = self.rekeys,
            "Packet key rotated"
        );
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn key(&self) -> &SessionKey {
        &self.key
    }

    #[cfg(test)]
    pub(crate) fn set_packet_counter(&mut self, counter: u64) {
        self.packet_counter = counter;
    }
}

impl std::fmt::Debug for PacketCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCipher")
            .field("packet_counter", &self.packet_counter)
            .field("rekey_interval", &self.rekey_interval)
            .field("rekeys", &self.rekeys)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(interval: u32) -> (PacketCipher, PacketCipher) {
        (
            PacketCipher::new(SessionKey::from_bytes([0x42; 32]), interval).unwrap(),
            PacketCipher::new(SessionKey::from_bytes([0x42; 32]), interval).unwrap(),
        )
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let (mut tx, mut rx) = pair(DEFAULT_REKEY_INTERVAL);
        let ct = tx.encrypt(b"aad", b"Hello, shroud!").unwrap();
        assert_eq!(ct.len(), 14 + ENCRYPTION_OVERHEAD);
        assert_eq!(rx.decrypt(b"aad", &ct).unwrap(), b"Hello, shroud!");
        assert_eq!(tx.packet_counter(), 1);
        assert_eq!(rx.packet_counter(), 1);
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(PacketCipher::new(SessionKey::from_bytes([0; 32]), 0).is_err());
    }

    #[test]
    fn test_nonce_layout() {
        let (mut tx, _) = pair(4);
        tx.set_packet_counter(9);
        let nonce = tx.nonce();
        // 9 = 2 * 4 + 1
        assert_eq!(nonce.as_slice(), &[1, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_same_plaintext_differs_per_counter() {
        let (mut tx, _) = pair(DEFAULT_REKEY_INTERVAL);
        let a = tx.encrypt(b"", b"same").unwrap();
        let b = tx.encrypt(b"", b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_aad_or_order_fails() {
        let (mut tx, mut rx) = pair(DEFAULT_REKEY_INTERVAL);
        let first = tx.encrypt(b"", b"one").unwrap();
        let second = tx.encrypt(b"", b"two").unwrap();

        assert!(matches!(rx.decrypt(b"x", &first), Err(CoreError::Authentication)));
        // Out of order: receiver still expects counter 0
        assert!(matches!(rx.decrypt(b"", &second), Err(CoreError::Authentication)));
        assert_eq!(rx.packet_counter(), 0);
        assert_eq!(rx.decrypt(b"", &first).unwrap(), b"one");
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let (mut tx, mut rx) = pair(DEFAULT_REKEY_INTERVAL);
        let mut ct = tx.encrypt(b"", b"payload").unwrap();
        ct[0] ^= 0x01;
        assert!(matches!(rx.decrypt(b"", &ct), Err(CoreError::Authentication)));
        assert!(matches!(rx.decrypt(b"", &[0u8; 3]), Err(CoreError::Authentication)));
    }

    #[test]
    fn test_rekey_boundary() {
        let interval = 8;
        let (mut tx, mut rx) = pair(interval);

        for _ in 0..interval - 1 {
            tx.encrypt(b"", b"x").unwrap();
        }
        let before = tx.key().clone();
        assert_eq!(tx.rekeys(), 0);

        // Packet R-1 is the last under the first key
        tx.encrypt(b"", b"x").unwrap();
        assert_eq!(tx.rekeys(), 1);
        assert_ne!(tx.key(), &before);

        // Receiver follows the same schedule
        let mut sender = PacketCipher::new(SessionKey::from_bytes([0x42; 32]), interval).unwrap();
        for i in 0..=interval {
            let ct = sender.encrypt(b"", &[u8::try_from(i).unwrap()]).unwrap();
            assert_eq!(rx.decrypt(b"", &ct).unwrap(), vec![u8::try_from(i).unwrap()]);
        }
        assert_eq!(rx.rekeys(), 1);
    }

    #[test]
    fn test_old_key_cannot_read_after_rekey() {
        let (mut tx, mut rx) = pair(2);
        let a = tx.encrypt(b"", b"a").unwrap();
        let b = tx.encrypt(b"", b"b").unwrap();
        let c = tx.encrypt(b"", b"c").unwrap();

        let mut stale = PacketCipher::new(SessionKey::from_bytes([0x42; 32]), 2).unwrap();
        stale.set_packet_counter(2);
        assert!(stale.decrypt(b"", &c).is_err());

        rx.decrypt(b"", &a).unwrap();
        rx.decrypt(b"", &b).unwrap();
        assert_eq!(rx.decrypt(b"", &c).unwrap(), b"c");
    }

    #[test]
    fn test_counter_exhaustion() {
        let (mut tx, mut rx) = pair(DEFAULT_REKEY_INTERVAL);
        tx.set_packet_counter(u64::MAX - 1);
        assert!(tx.encrypt(b"", b"last").is_ok());
        assert_eq!(tx.packet_counter(), u64::MAX);
        assert!(matches!(tx.encrypt(b"", b"over"), Err(CoreError::CounterExhausted)));

        rx.set_packet_counter(u64::MAX);
        assert!(matches!(rx.decrypt(b"", &[0u8; 17]), Err(CoreError::CounterExhausted)));
    }
}
