// ============================================
// File: crates/shroud-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Defines error types for the socket boundary: binding listeners,
//! dialing peers directly or through a SOCKS5 proxy.
//!
//! ## Main Functionality
//! - `TransportError`: Primary error enum for transport operations
//! - Error conversion from system errors
//! - Categorization of retryable vs fatal errors
//!
//! ## Error Categories
//! 1. **Listener Errors**: bind failures, address in use
//! 2. **Dial Errors**: refused, unreachable, timeout
//! 3. **Proxy Errors**: SOCKS5 negotiation or reply failures
//! 4. **Configuration Errors**: invalid addresses
//!
//! ## ⚠️ Important Note for Next Developer
//! - Dial errors are usually transient; the caller decides whether to retry
//! - Proxy replies are mapped to text; never echo raw proxy bytes
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use shroud_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Listener Errors
    // ========================================

    /// Failed to bind to address.
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind to
        addr: String,
        /// Why binding failed
        reason: String,
    },

    /// Address already in use.
    #[error("Address {addr} already in use")]
    AddressInUse {
        /// The address that's in use
        addr: String,
    },

    // ========================================
    // Dial Errors
    // ========================================

    /// Connecting to the target failed.
    #[error("Failed to connect to {target}: {reason}")]
    ConnectFailed {
        /// Dial target
        target: String,
        /// Why the connection failed
        reason: String,
    },

    /// Target cannot be reached on the requested route.
    #[error("Target {target} is unreachable: {reason}")]
    Unreachable {
        /// Dial target
        target: String,
        /// Why it cannot be reached
        reason: String,
    },

    /// SOCKS5 proxy negotiation failed.
    #[error("Proxy error: {reason}")]
    Proxy {
        /// What the proxy reported or what went wrong
        reason: String,
    },

    /// Operation timed out.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// What operation timed out
        operation: String,
    },

    // ========================================
    // Configuration Errors
    // ========================================

    /// Invalid configuration.
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig {
        /// Configuration field name
        field: String,
        /// Why it's invalid
        reason: String,
    },

    /// Listener or network is shutting down.
    #[error("Transport is shutting down")]
    ShuttingDown,

    // ========================================
    // Wrapped Errors
    // ========================================

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr: addr.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConnectFailed` error.
    pub fn connect_failed(target: impl ToString, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an `Unreachable` error.
    pub fn unreachable(target: impl ToString, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a `Proxy` error.
    pub fn proxy(reason: impl Into<String>) -> Self {
        Self::Proxy {
            reason: reason.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an `InvalidConfig` error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error is transient and retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::ConnectFailed { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Returns `true` if the failure happened inside the proxy tunnel.
    #[must_use]
    pub const fn is_proxy_error(&self) -> bool {
        matches!(self, Self::Proxy { .. })
    }

    /// Returns `true` if this is a dial-side network error.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. }
                | Self::Unreachable { .. }
                | Self::Proxy { .. }
                | Self::Timeout { .. }
        )
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
    }
}

// ============================================
// Tests
// ============================================
