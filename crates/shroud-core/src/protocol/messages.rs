// ============================================
// File: crates/shroud-core/src/protocol/messages.rs
// ============================================
//! # Application Message Definitions
//!
//! ## Creation Reason
//! The transport engine treats application messages as opaque
//! `(command, payload)` pairs. This module gives the command a validated
//! type and defines the inner envelope that v2 packets carry.
//!
//! ## Main Functionality
//! - `Command`: Short ASCII tag, at most 12 bytes
//! - `NetMessage`: Command plus opaque payload
//! - `encode_envelope` / `decode_envelope`: v2 inner envelope
//!
//! ## Envelope Format
//! ```text
//! ┌──────────────────────────┬──────────────────────┐
//! │ command (12 bytes, NUL   │ payload (variable)   │
//! │ padded ASCII)            │                      │
//! └──────────────────────────┴──────────────────────┘
//! ```
//! The envelope length is implied by the packet, so it carries no
//! length or checksum field.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Command rules are shared with the v1 header; a command that is
//!   valid in one transport must be valid in the other
//!
//! ## Last Modified
//! v0.1.0 - Initial message definitions

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Size of the command field in bytes.
pub const COMMAND_SIZE: usize = 12;

/// Command used for the first application message on every connection.
pub const GREETING_COMMAND: &str = "version";

// ============================================
// Command
// ============================================

/// Application message tag.
///
/// # Rules
/// - 1 to 12 printable ASCII bytes (`0x20..=0x7e`)
/// - On the wire: NUL padded to 12 bytes, no data after the first NUL
///
/// # Example
/// ```
/// use shroud_core::protocol::Command;
///
/// let cmd: Command = "block".parse().unwrap();
/// assert_eq!(cmd.as_str(), "block");
/// assert!("waytoolongcommand".parse::<Command>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Command(String);

impl Command {
    /// Creates a command after validating it.
    ///
    /// # Errors
    /// Returns `InvalidCommand` for empty, oversized or non-printable names.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::invalid_command("empty command"));
        }
        if name.len() > COMMAND_SIZE {
            return Err(CoreError::invalid_command(format!(
                "command longer than {COMMAND_SIZE} bytes"
            )));
        }
        if !name.bytes().all(is_command_byte) {
            return Err(CoreError::invalid_command("non-printable command byte"));
        }
        Ok(Self(name))
    }

    /// Returns the command name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the NUL padded wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; COMMAND_SIZE] {
        let mut out = [0u8; COMMAND_SIZE];
        out[..self.0.len()].copy_from_slice(self.0.as_bytes());
        out
    }

    /// Parses the NUL padded wire form.
    ///
    /// # Errors
    /// Returns `InvalidCommand` if the field is empty, contains a
    /// non-printable byte, or has data after the padding starts.
    pub fn from_bytes(raw: &[u8; COMMAND_SIZE]) -> Result<Self> {
        let len = raw.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
        if raw[len..].iter().any(|&b| b != 0) {
            return Err(CoreError::invalid_command("data after NUL padding"));
        }
        let name = std::str::from_utf8(&raw[..len])
            .map_err(|_| CoreError::invalid_command("not ASCII"))?;
        Self::new(name)
    }

    /// Returns `true` if `raw` is a well-formed command field.
    ///
    /// Cheaper than [`Command::from_bytes`]; used when sniffing whether
    /// incoming bytes look like a v1 header.
    #[must_use]
    pub fn is_well_formed(raw: &[u8]) -> bool {
        if raw.len() != COMMAND_SIZE {
            return false;
        }
        let len = raw.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
        len > 0 && raw[..len].iter().copied().all(is_command_byte) && raw[len..].iter().all(|&b| b == 0)
    }

    /// Returns the greeting command.
    #[must_use]
    pub fn greeting() -> Self {
        Self(GREETING_COMMAND.to_string())
    }
}

const fn is_command_byte(b: u8) -> bool {
    matches!(b, 0x20..=0x7e)
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Command {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// ============================================
// NetMessage
// ============================================

/// An application message as seen above the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetMessage {
    /// Message tag.
    pub command: Command,
    /// Opaque payload.
    pub payload: Bytes,
}

impl NetMessage {
    /// Creates a message.
    pub fn new(command: Command, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Size of this message inside a v2 envelope.
    #[must_use]
    pub fn envelope_len(&self) -> usize {
        COMMAND_SIZE + self.payload.len()
    }
}

// ============================================
// Envelope
// ============================================

/// Serializes a message into the v2 inner envelope.
#[must_use]
pub fn encode_envelope(command: &Command, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(COMMAND_SIZE + payload.len());
    buf.put_slice(&command.to_bytes());
    buf.put_slice(payload);
    buf
}

/// Parses a v2 inner envelope.
///
/// # Errors
/// - `Format` if shorter than the command field
/// - `InvalidCommand` if the command field is malformed
pub fn decode_envelope(contents: &[u8]) -> Result<NetMessage> {
    if contents.len() < COMMAND_SIZE {
        return Err(CoreError::format(format!(
            "envelope of {} bytes is shorter than the command field",
            contents.len()
        )));
    }
    let mut raw = [0u8; COMMAND_SIZE];
    raw.copy_from_slice(&contents[..COMMAND_SIZE]);
    let command = Command::from_bytes(&raw)?;
    Ok(NetMessage::new(
        command,
        Bytes::copy_from_slice(&contents[COMMAND_SIZE..]),
    ))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_validation() {
        assert!(Command::new("version").is_ok());
        assert!(Command::new("twelve_chars").is_ok());
        assert!(Command::new("").is_err());
        assert!(Command::new("thirteen_char").is_err());
        assert!(Command::new("tab\there").is_err());
    }

    #[test]
    fn test_command_wire_form() {
        let cmd = Command::new("ping").unwrap();
        let raw = cmd.to_bytes();
        assert_eq!(&raw[..4], b"ping");
        assert!(raw[4..].iter().all(|&b| b == 0));
        assert!(Command::is_well_formed(&raw));
        assert_eq!(Command::from_bytes(&raw).unwrap(), cmd);
    }

    #[test]
    fn test_command_rejects_data_after_padding() {
        let mut raw = Command::new("ping").unwrap().to_bytes();
        raw[8] = b'x';
        assert!(!Command::is_well_formed(&raw));
        assert!(matches!(
            Command::from_bytes(&raw),
            Err(CoreError::InvalidCommand { .. })
        ));
        assert!(!Command::is_well_formed(&[0u8; COMMAND_SIZE]));
    }

    #[test]
    fn test_envelope() {
        let cmd = Command::new("block").unwrap();
        let env = encode_envelope(&cmd, b"payload");
        assert_eq!(env.len(), COMMAND_SIZE + 7);

        let msg = decode_envelope(&env).unwrap();
        assert_eq!(msg.command, cmd);
        assert_eq!(&msg.payload[..], b"payload");
        assert_eq!(msg.envelope_len(), env.len());
    }

    #[test]
    fn test_envelope_too_short() {
        let err = decode_envelope(b"short").unwrap_err();
        assert!(err.is_format_error());
    }
}
