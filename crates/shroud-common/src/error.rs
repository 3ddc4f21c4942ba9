// ============================================
// File: crates/shroud-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Provides the base error type shared by all shroud crates. Crate-level
//! errors (`CoreError`, `TransportError`, `NodeError`) wrap it transparently.
//!
//! ## Main Functionality
//! - `CommonError`: Base error enum for parsing and IO failures
//! - `Result<T>`: Type alias using `CommonError`
//! - Conversions from `std::io::Error` and `hex::FromHexError`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never put key material or garbage bytes into error messages
//! - Peer addresses are fine to include, they are already logged
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

// ============================================
// Result Type Alias
// ============================================

/// Common result type for operations that may fail.
pub type Result<T> = std::result::Result<T, CommonError>;

// ============================================
// CommonError
// ============================================

/// Common error types shared across shroud crates.
///
/// # Example
/// ```
/// use shroud_common::error::{CommonError, Result};
///
/// fn validate_port(port: u16) -> Result<()> {
///     if port == 0 {
///         return Err(CommonError::invalid_input("port", "cannot be 0"));
///     }
///     Ok(())
/// }
///
/// assert!(validate_port(0).is_err());
/// ```
#[derive(Error, Debug)]
pub enum CommonError {
    // ========================================
    // Validation Errors
    // ========================================

    /// Invalid input data provided.
    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput {
        /// Name of the field or parameter
        field: String,
        /// Description of what's wrong
        reason: String,
    },

    /// Data length doesn't match expected size.
    #[error("Invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    // ========================================
    // IO Errors
    // ========================================

    /// System I/O error occurred.
    #[error("I/O error: {context}")]
    Io {
        /// What operation was being performed
        context: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Failed to decode textual data (hex, addresses).
    #[error("Decoding error: {context}: {details}")]
    Decoding {
        /// What was being decoded
        context: String,
        /// Error details
        details: String,
    },
}

impl CommonError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates an `InvalidInput` error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidLength` error.
    #[must_use]
    pub const fn invalid_length(expected: usize, actual: usize) -> Self {
        Self::InvalidLength { expected, actual }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a `Decoding` error.
    pub fn decoding(context: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Decoding {
            context: context.into(),
            details: details.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error came from the operating system.
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Returns `true` if this error was caused by bad caller input.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::InvalidLength { .. } | Self::Decoding { .. }
        )
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
    }
}

impl From<hex::FromHexError> for CommonError {
    fn from(err: hex::FromHexError) -> Self {
        Self::decoding("hex decode", err.to_string())
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
        let err = CommonError::invalid_input("magic", "must be 4 bytes");
        assert!(err.to_string().contains("magic"));
        assert!(err.to_string().contains("4 bytes"));
    }

    #[test]
    fn test_error_classification() {
        let client_err = CommonError::invalid_input("field", "bad");
        assert!(client_err.is_client_error());
        assert!(!client_err.is_io_error());

        let io_err = CommonError::io("reading config", std::io::Error::other("disk"));
        assert!(io_err.is_io_error());
        assert!(!io_err.is_client_error());
    }

    #[test]
    fn test_hex_error_conversion() {
        let err: CommonError = hex::decode("zz").unwrap_err().into();
        assert!(matches!(err, CommonError::Decoding { .. }));
        assert!(err.is_client_error());
    }
}
