// ============================================
// File: crates/shroud-node/src/error.rs
// ============================================
//! # Node Error Types
//!
//! ## Last Modified
//! v0.1.0 - Initial node error definitions

use thiserror::Error;

use shroud_common::error::CommonError;
use shroud_common::{ConnectionId, Direction};
use shroud_core::error::CoreError;
use shroud_transport::error::TransportError;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Node error types.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    /// Configuration value out of range.
    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid { field: String, reason: String },

    /// Inbound or outbound slot limit reached.
    #[error("No free {direction} slot: limit {limit} reached")]
    Capacity { direction: Direction, limit: usize },

    /// Connection policy forbids the requested dial.
    #[error("Rejected by connection policy: {reason}")]
    Policy { reason: String },

    /// Peer did not finish the handshake in time.
    #[error("Handshake timed out after {millis} ms")]
    HandshakeTimeout { millis: u64 },

    /// Connection was closed while an operation was pending.
    #[error("Connection closed")]
    Closed,

    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// Operation not allowed in the connection's current state.
    #[error("Invalid connection state: {reason}")]
    InvalidState { reason: String },

    /// Decoys require the encrypted transport.
    #[error("Decoy packets are only supported on v2 connections")]
    DecoyUnsupported,

    #[error("Node failed to start: {reason}")]
    StartupFailed { reason: String },

    #[error("Node is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn policy(reason: impl Into<String>) -> Self {
        Self::Policy {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    #[must_use]
    pub const fn is_capacity_error(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }

    /// Handshake failures, whether from the peer's bytes or a timeout.
    #[must_use]
    pub const fn is_handshake_error(&self) -> bool {
        match self {
            Self::HandshakeTimeout { .. } => true,
            Self::Core(e) => e.is_handshake_error(),
            _ => false,
        }
    }

    /// Errors that end the connection they occurred on.
    #[must_use]
    pub const fn closes_connection(&self) -> bool {
        match self {
            Self::Closed | Self::HandshakeTimeout { .. } | Self::Io(_) | Self::Transport(_) => true,
            Self::Core(e) => {
                e.is_format_error() || e.is_authentication_error() || e.is_handshake_error()
                    || e.is_crypto_error()
            }
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. } | Self::ConfigInvalid { .. } | Self::StartupFailed { .. }
        )
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Capacity { .. } | Self::HandshakeTimeout { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NodeError::config_load("/etc/shroud/node.toml", "file not found");
        assert!(err.to_string().contains("/etc/shroud/node.toml"));

        let err = NodeError::Capacity {
            direction: Direction::Inbound,
            limit: 8,
        };
        assert_eq!(err.to_string(), "No free inbound slot: limit 8 reached");
    }

    #[test]
    fn test_error_classification() {
        let config_err = NodeError::config_invalid("limits.max_inbound", "must be > 0");
        assert!(config_err.is_config_error());
        assert!(config_err.is_fatal());

        let capacity = NodeError::Capacity {
            direction: Direction::Outbound,
            limit: 1,
        };
        assert!(capacity.is_capacity_error());
        assert!(!capacity.closes_connection());

        let auth: NodeError = CoreError::Authentication.into();
        assert!(auth.closes_connection());
        assert!(!auth.is_retryable());

        assert!(NodeError::HandshakeTimeout { millis: 10 }.is_handshake_error());
    }
}
