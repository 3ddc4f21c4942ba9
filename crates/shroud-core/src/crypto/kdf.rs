// ============================================
// File: crates/shroud-core/src/crypto/kdf.rs
// ============================================
//! # Key Schedule
//!
//! ## Creation Reason
//! Turns the X25519 shared secret into everything a v2 session needs:
//! one packet key per direction, one garbage terminator per direction,
//! and a session id both ends can compare.
//!
//! ## Derivation
//! ```text
//! salt = "shroud_v2_shared_secret" || magic
//! ikm  = shared_secret || initiator_key || responder_key
//! prk  = HKDF-Extract(salt, ikm)
//!
//! initiator_P          = Expand(prk, "initiator_P", 32)
//! responder_P          = Expand(prk, "responder_P", 32)
//! garbage_terminators  = Expand(prk, "garbage_terminators", 32)
//!                        [..16] initiator, [16..] responder
//! session_id           = Expand(prk, "session_id", 32)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Binding both public keys into the IKM ties the keys to this exact
//!   exchange; a relay that swaps keys ends up with mismatched sessions
//! - Binding the magic keeps sessions from different networks apart
//!
//! ## Last Modified
//! v0.1.0 - Initial key schedule

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use shroud_common::SessionId;

use super::keys::SessionKey;
use super::{
    CHACHA20_KEY_SIZE, GARBAGE_TERMINATOR_SIZE, SHARED_SECRET_SIZE, X25519_PUBLIC_KEY_SIZE,
};
use crate::error::{CoreError, Result};
use crate::protocol::codec::MAGIC_SIZE;

// ============================================
// Constants
// ============================================

/// HKDF salt prefix; the network magic is appended.
pub const HKDF_SALT_PREFIX: &[u8] = b"shroud_v2_shared_secret";

const INFO_INITIATOR_PACKET: &[u8] = b"initiator_P";
const INFO_RESPONDER_PACKET: &[u8] = b"responder_P";
const INFO_GARBAGE_TERMINATORS: &[u8] = b"garbage_terminators";
const INFO_SESSION_ID: &[u8] = b"session_id";

// ============================================
// KeyMaterial
// ============================================

/// Output of the key schedule.
#[derive(Clone)]
pub struct KeyMaterial {
    /// Key for packets sent by the initiator.
    pub initiator_packet_key: SessionKey,
    /// Key for packets sent by the responder.
    pub responder_packet_key: SessionKey,
    /// Terminator that ends the initiator's garbage.
    pub initiator_terminator: [u8; GARBAGE_TERMINATOR_SIZE],
    /// Terminator that ends the responder's garbage.
    pub responder_terminator: [u8; GARBAGE_TERMINATOR_SIZE],
    /// Session identifier.
    pub session_id: SessionId,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Runs the key schedule.
///
/// # Errors
/// `KeyDerivation` if HKDF refuses an output length (cannot happen for
/// the fixed 32-byte outputs used here).
pub fn derive_key_material(
    shared_secret: &[u8; SHARED_SECRET_SIZE],
    magic: &[u8; MAGIC_SIZE],
    initiator_key: &[u8; X25519_PUBLIC_KEY_SIZE],
    responder_key: &[u8; X25519_PUBLIC_KEY_SIZE],
) -> Result<KeyMaterial> {
    let mut salt = Vec::with_capacity(HKDF_SALT_PREFIX.len() + MAGIC_SIZE);
    salt.extend_from_slice(HKDF_SALT_PREFIX);
    salt.extend_from_slice(magic);

    let mut ikm = Zeroizing::new(Vec::with_capacity(
        SHARED_SECRET_SIZE + 2 * X25519_PUBLIC_KEY_SIZE,
    ));
    ikm.extend_from_slice(shared_secret);
    ikm.extend_from_slice(initiator_key);
    ikm.extend_from_slice(responder_key);

    let hk = Hkdf::<Sha256>::new(Some(&salt), &ikm);

    let initiator_packet_key = expand_key(&hk, INFO_INITIATOR_PACKET)?;
    let responder_packet_key = expand_key(&hk, INFO_RESPONDER_PACKET)?;

    let terminators = expand(&hk, INFO_GARBAGE_TERMINATORS)?;
    let mut initiator_terminator = [0u8; GARBAGE_TERMINATOR_SIZE];
    let mut responder_terminator = [0u8; GARBAGE_TERMINATOR_SIZE];
    initiator_terminator.copy_from_slice(&terminators[..GARBAGE_TERMINATOR_SIZE]);
    responder_terminator.copy_from_slice(&terminators[GARBAGE_TERMINATOR_SIZE..]);

    let session_id = SessionId::new(*expand(&hk, INFO_SESSION_ID)?);

    Ok(KeyMaterial {
        initiator_packet_key,
        responder_packet_key,
        initiator_terminator,
        responder_terminator,
        session_id,
    })
}

fn expand(hk: &Hkdf<Sha256>, info: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let mut out = Zeroizing::new([0u8; 32]);
    hk.expand(info, out.as_mut_slice())
        .map_err(|_| CoreError::KeyDerivation {
            reason: "HKDF expansion failed".into(),
        })?;
    Ok(out)
}

fn expand_key(hk: &Hkdf<Sha256>, info: &[u8]) -> Result<SessionKey> {
    let bytes: Zeroizing<[u8; CHACHA20_KEY_SIZE]> = expand(hk, info)?;
    Ok(SessionKey::from_bytes(*bytes))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::DEFAULT_MAGIC;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_key_material(&[1; 32], &DEFAULT_MAGIC, &[2; 32], &[3; 32]).unwrap();
        let b = derive_key_material(&[1; 32], &DEFAULT_MAGIC, &[2; 32], &[3; 32]).unwrap();

        assert_eq!(a.initiator_packet_key, b.initiator_packet_key);
        assert_eq!(a.responder_packet_key, b.responder_packet_key);
        assert_eq!(a.session_id, b.session_id);
    }

    #[test]
    fn test_directions_are_distinct() {
        let m = derive_key_material(&[1; 32], &DEFAULT_MAGIC, &[2; 32], &[3; 32]).unwrap();
        assert_ne!(m.initiator_packet_key, m.responder_packet_key);
        assert_ne!(m.initiator_terminator, m.responder_terminator);
    }

    #[test]
    fn test_inputs_are_bound() {
        let base = derive_key_material(&[1; 32], &DEFAULT_MAGIC, &[2; 32], &[3; 32]).unwrap();

        let swapped = derive_key_material(&[1; 32], &DEFAULT_MAGIC, &[3; 32], &[2; 32]).unwrap();
        assert_ne!(base.session_id, swapped.session_id);

        let other_net = derive_key_material(&[1; 32], &[0, 1, 2, 3], &[2; 32], &[3; 32]).unwrap();
        assert_ne!(base.session_id, other_net.session_id);
    }

    #[test]
    fn test_debug_hides_keys() {
        let m = derive_key_material(&[1; 32], &DEFAULT_MAGIC, &[2; 32], &[3; 32]).unwrap();
        let text = format!("{m:?}");
        assert!(text.contains("session_id"));
        assert!(!text.contains("packet_key"));
    }
}
