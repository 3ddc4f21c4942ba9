// ============================================
// File: crates/shroud-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types for framing, sealing and handshake operations in
//! the shroud core crate.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//! - Classifiers that map each variant onto the transport error taxonomy
//!
//! ## Error Categories
//! ```text
//! FormatError          → Format, MessageTooLarge, InvalidCommand
//! AuthenticationError  → Authentication
//! HandshakeError       → Handshake, GarbageTooLong, KeyExchange
//! Fatal crypto faults  → Encryption, KeyDerivation, CounterExhausted
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material, garbage or plaintext in error messages
//! - `Authentication` deliberately carries no detail; tag mismatch, wrong
//!   nonce and poisoned receivers all look the same to the caller
//! - Every error here is fatal for the connection it happened on
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use shroud_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for framing and cryptographic operations.
///
/// # Security Note
/// Error messages are informative for debugging without revealing
/// sensitive information like key material.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Cryptographic Errors
    // ========================================

    /// Failed to generate cryptographic key.
    #[error("Key generation failed: {context}")]
    KeyGeneration {
        /// What key was being generated
        context: String,
    },

    /// Key exchange operation failed.
    #[error("Key exchange failed: {reason}")]
    KeyExchange {
        /// Why key exchange failed
        reason: String,
    },

    /// Encryption operation failed.
    #[error("Encryption failed: {context}")]
    Encryption {
        /// What was being encrypted
        context: String,
    },

    /// Packet failed authentication (tag mismatch, desync or tamper).
    #[error("Packet authentication failed")]
    Authentication,

    /// Key derivation failed.
    #[error("Key derivation failed: {reason}")]
    KeyDerivation {
        /// Why derivation failed
        reason: String,
    },

    /// The packet counter of one direction reached its limit.
    #[error("Packet counter exhausted, connection must be closed")]
    CounterExhausted,

    // ========================================
    // Framing Errors
    // ========================================

    /// Frame is malformed (bad magic, bad checksum, truncated ciphertext).
    #[error("Malformed frame: {reason}")]
    Format {
        /// What's wrong with the frame
        reason: String,
    },

    /// Message exceeds maximum allowed size.
    #[error("Message too large: max {max} bytes, got {actual}")]
    MessageTooLarge {
        /// Maximum allowed size
        max: usize,
        /// Actual size
        actual: usize,
    },

    /// Command field is not a valid command name.
    #[error("Invalid command: {reason}")]
    InvalidCommand {
        /// Why the command was rejected
        reason: String,
    },

    // ========================================
    // Handshake Errors
    // ========================================

    /// Handshake bytes were malformed or arrived out of order.
    #[error("Handshake failed: {reason}")]
    Handshake {
        /// What went wrong
        reason: String,
    },

    /// Peer sent more garbage than allowed before its terminator.
    #[error("Garbage terminator not found within {max} bytes")]
    GarbageTooLong {
        /// Maximum garbage plus terminator length scanned
        max: usize,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `KeyGeneration` error.
    pub fn key_generation(context: impl Into<String>) -> Self {
        Self::KeyGeneration {
            context: context.into(),
        }
    }

    /// Creates a `KeyExchange` error.
    pub fn key_exchange(reason: impl Into<String>) -> Self {
        Self::KeyExchange {
            reason: reason.into(),
        }
    }

    /// Creates an `Encryption` error.
    pub fn encryption(context: impl Into<String>) -> Self {
        Self::Encryption {
            context: context.into(),
        }
    }

    /// Creates a `Format` error.
    pub fn format(reason: impl Into<String>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }

    /// Creates a `MessageTooLarge` error.
    #[must_use]
    pub const fn too_large(max: usize, actual: usize) -> Self {
        Self::MessageTooLarge { max, actual }
    }

    /// Creates an `InvalidCommand` error.
    pub fn invalid_command(reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            reason: reason.into(),
        }
    }

    /// Creates a `Handshake` error.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake {
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` for malformed framing (`FormatError`).
    #[must_use]
    pub const fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::Format { .. } | Self::MessageTooLarge { .. } | Self::InvalidCommand { .. }
        )
    }

    /// Returns `true` for AEAD failures (`AuthenticationError`).
    #[must_use]
    pub const fn is_authentication_error(&self) -> bool {
        matches!(self, Self::Authentication)
    }

    /// Returns `true` for handshake failures (`HandshakeError`).
    #[must_use]
    pub const fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::Handshake { .. } | Self::GarbageTooLong { .. } | Self::KeyExchange { .. }
        )
    }

    /// Returns `true` if this is a cryptographic error.
    #[must_use]
    pub const fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::KeyGeneration { .. }
                | Self::KeyExchange { .. }
                | Self::Encryption { .. }
                | Self::Authentication
                | Self::KeyDerivation { .. }
                | Self::CounterExhausted
        )
    }

    /// Returns `true` if this error might indicate an attack.
    ///
    /// These errors warrant warn-level logging.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::Authentication | Self::GarbageTooLong { .. } | Self::KeyExchange { .. }
        )
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::too_large(4_000_000, 4_000_001);
        assert!(err.to_string().contains("4000000"));
        assert!(err.to_string().contains("4000001"));

        let err = CoreError::GarbageTooLong { max: 4111 };
        assert!(err.to_string().contains("4111"));
    }

    #[test]
    fn test_error_taxonomy() {
        assert!(CoreError::format("bad magic").is_format_error());
        assert!(CoreError::too_large(1, 2).is_format_error());
        assert!(CoreError::invalid_command("empty").is_format_error());

        assert!(CoreError::Authentication.is_authentication_error());
        assert!(CoreError::Authentication.is_suspicious());
        assert!(!CoreError::Authentication.is_format_error());

        assert!(CoreError::handshake("short key").is_handshake_error());
        assert!(CoreError::GarbageTooLong { max: 10 }.is_handshake_error());
        assert!(CoreError::key_exchange("low order").is_handshake_error());

        assert!(CoreError::CounterExhausted.is_crypto_error());
        assert!(!CoreError::CounterExhausted.is_handshake_error());
    }

    #[test]
    fn test_common_error_conversion() {
        let common = CommonError::invalid_input("field", "bad value");
        let core: CoreError = common.into();
        assert!(matches!(core, CoreError::Common(_)));
    }
}
