// ============================================
// File: crates/shroud-core/src/protocol/codec.rs
// ============================================
//! # Framing Codec
//!
//! ## Creation Reason
//! Maps raw byte streams to discrete frames for both wire transports.
//! No cryptography and no negotiation happens here.
//!
//! ## Main Functionality
//! - `FrameCodec`: Stateless encoder/decoder, parameterized by network magic
//! - `Decoded<T>`: Either a complete frame (with consumed byte count) or `Incomplete`
//! - v1 sniffing (`looks_like_v1_header`) and resync (`find_v1_header`)
//!
//! ## Wire Formats
//! ```text
//! v1 (24-byte header, plaintext):
//! ┌──────────┬───────────────┬────────────┬─────────────┬─────────┐
//! │ magic[4] │ command[12]   │ len u32 LE │ checksum[4] │ payload │
//! └──────────┴───────────────┴────────────┴─────────────┴─────────┘
//!   checksum = SHA256(SHA256(payload))[..4]
//!
//! v2 (no magic, indistinguishable from random):
//! ┌────────────┬──────────────────────────────────────────┐
//! │ len u24 LE │ ciphertext (header + contents + tag)     │
//! └────────────┴──────────────────────────────────────────┘
//! ```
//!
//! ## Parsing Strategy
//! 1. Never consume from the input; report how many bytes a frame used
//! 2. Validate the header before waiting for the body, so an oversized
//!    declared length fails immediately instead of buffering it
//! 3. `Incomplete` means "read more and call again"
//!
//! ## ⚠️ Important Note for Next Developer
//! - Use checked arithmetic when reading lengths
//! - The v1 prefix sniffer is what makes in-place downgrade work; keep it
//!   strict (magic AND well-formed command), otherwise random v2 garbage
//!   could be mistaken for v1 with probability 2^-32
//!
//! ## Last Modified
//! v0.1.0 - Initial codec implementation

use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::protocol::messages::{Command, NetMessage, COMMAND_SIZE};

// ============================================
// Constants
// ============================================

/// Size of the v1 network magic.
pub const MAGIC_SIZE: usize = 4;

/// Default network magic.
pub const DEFAULT_MAGIC: [u8; MAGIC_SIZE] = [0xf9, 0xbe, 0xb4, 0xd9];

/// Size of the v1 header.
pub const V1_HEADER_SIZE: usize = MAGIC_SIZE + COMMAND_SIZE + 4 + CHECKSUM_SIZE;

/// Number of leading bytes that identify a v1 stream (magic + command).
pub const V1_PREFIX_SIZE: usize = MAGIC_SIZE + COMMAND_SIZE;

/// Size of the v1 payload checksum.
pub const CHECKSUM_SIZE: usize = 4;

/// Maximum v1 payload and v2 envelope size.
pub const MAX_MESSAGE_SIZE: usize = 4_000_000;

/// Size of the v2 length prefix.
pub const V2_LENGTH_SIZE: usize = 3;

/// Largest ciphertext a v2 length prefix can describe.
pub const MAX_V2_CIPHERTEXT: usize = (1 << 24) - 1;

/// Smallest valid v2 ciphertext (AEAD header byte + tag).
pub const MIN_V2_CIPHERTEXT: usize = 1 + 16;

/// How far a v1 reader scans for the first header before giving up.
///
/// Covers an unanswered v2 preamble: 32-byte key plus maximum garbage.
pub const MAX_RESYNC_SCAN: usize = 32 + 4095;

// ============================================
// Decoded
// ============================================

/// Outcome of a non-consuming decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    /// A complete frame was found.
    Frame {
        /// The decoded item
        item: T,
        /// Number of input bytes the frame occupied
        consumed: usize,
    },
    /// More bytes are needed.
    Incomplete,
}

impl<T> Decoded<T> {
    /// Returns `true` if more input is needed.
    #[must_use]
    pub const fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete)
    }

    /// Converts into `(item, consumed)` if complete.
    pub fn into_frame(self) -> Option<(T, usize)> {
        match self {
            Self::Frame { item, consumed } => Some((item, consumed)),
            Self::Incomplete => None,
        }
    }
}

// ============================================
// FrameCodec
// ============================================

/// Stateless framing codec for both transports.
///
/// # Example
/// ```
/// use shroud_core::protocol::{Command, Decoded, FrameCodec};
///
/// let codec = FrameCodec::default();
/// let cmd: Command = "ping".parse().unwrap();
/// let frame = codec.encode_v1(&cmd, b"abc").unwrap();
///
/// match codec.decode_v1(&frame).unwrap() {
///     Decoded::Frame { item, consumed } => {
///         assert_eq!(item.command, cmd);
///         assert_eq!(consumed, frame.len());
///     }
///     Decoded::Incomplete => unreachable!(),
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    magic: [u8; MAGIC_SIZE],
    max_message_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAGIC)
    }
}

impl FrameCodec {
    /// Creates a codec for the given network magic.
    #[must_use]
    pub const fn new(magic: [u8; MAGIC_SIZE]) -> Self {
        Self {
            magic,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Overrides the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Returns the network magic.
    #[must_use]
    pub const fn magic(&self) -> [u8; MAGIC_SIZE] {
        self.magic
    }

    /// Returns the maximum message size.
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    // ========================================
    // v1
    // ========================================

    /// Frames a v1 message.
    ///
    /// # Errors
    /// `MessageTooLarge` if the payload exceeds the maximum message size.
    pub fn encode_v1(&self, command: &Command, payload: &[u8]) -> Result<BytesMut> {
        if payload.len() > self.max_message_size {
            return Err(CoreError::too_large(self.max_message_size, payload.len()));
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::too_large(self.max_message_size, payload.len()))?;

        let mut buf = BytesMut::with_capacity(V1_HEADER_SIZE + payload.len());
        buf.put_slice(&self.magic);
        buf.put_slice(&command.to_bytes());
        buf.put_u32_le(len);
        buf.put_slice(&checksum(payload));
        buf.put_slice(payload);
        Ok(buf)
    }

    /// Decodes one v1 message from the front of `buf`.
    ///
    /// # Errors
    /// - `Format` on bad magic or checksum mismatch
    /// - `InvalidCommand` on a malformed command field
    /// - `MessageTooLarge` if the declared length exceeds the maximum
    pub fn decode_v1(&self, buf: &[u8]) -> Result<Decoded<NetMessage>> {
        if buf.len() < V1_HEADER_SIZE {
            // Reject garbage early when the magic is already visible
            let visible = buf.len().min(MAGIC_SIZE);
            if buf[..visible] != self.magic[..visible] {
                return Err(CoreError::format("bad magic"));
            }
            return Ok(Decoded::Incomplete);
        }

        if buf[..MAGIC_SIZE] != self.magic {
            return Err(CoreError::format("bad magic"));
        }

        let mut raw_command = [0u8; COMMAND_SIZE];
        raw_command.copy_from_slice(&buf[MAGIC_SIZE..V1_PREFIX_SIZE]);
        let command = Command::from_bytes(&raw_command)?;

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&buf[V1_PREFIX_SIZE..V1_PREFIX_SIZE + 4]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > self.max_message_size {
            return Err(CoreError::too_large(self.max_message_size, len));
        }

        let total = V1_HEADER_SIZE + len;
        if buf.len() < total {
            return Ok(Decoded::Incomplete);
        }

        let payload = &buf[V1_HEADER_SIZE..total];
        if checksum(payload) != buf[V1_PREFIX_SIZE + 4..V1_HEADER_SIZE] {
            return Err(CoreError::format("checksum mismatch"));
        }

        Ok(Decoded::Frame {
            item: NetMessage::new(command, Bytes::copy_from_slice(payload)),
            consumed: total,
        })
    }

    /// Returns `true` if `prefix` (at least 16 bytes) starts a v1 stream.
    #[must_use]
    pub fn looks_like_v1_header(&self, prefix: &[u8]) -> bool {
        prefix.len() >= V1_PREFIX_SIZE
            && prefix[..MAGIC_SIZE] == self.magic
            && Command::is_well_formed(&prefix[MAGIC_SIZE..V1_PREFIX_SIZE])
    }

    /// Finds the offset of the first recognizable v1 header.
    ///
    /// Only the first [`MAX_RESYNC_SCAN`] offsets are tried.
    #[must_use]
    pub fn find_v1_header(&self, buf: &[u8]) -> Option<usize> {
        if buf.len() < V1_PREFIX_SIZE {
            return None;
        }
        let last = (buf.len() - V1_PREFIX_SIZE).min(MAX_RESYNC_SCAN);
        (0..=last).find(|&i| self.looks_like_v1_header(&buf[i..]))
    }

    // ========================================
    // v2
    // ========================================

    /// Prefixes a v2 ciphertext with its 3-byte length.
    ///
    /// # Errors
    /// - `Format` if the ciphertext is shorter than header + tag
    /// - `MessageTooLarge` if it does not fit a 24-bit length
    pub fn encode_v2_packet(&self, ciphertext: &[u8]) -> Result<BytesMut> {
        check_v2_len(ciphertext.len())?;
        let mut buf = BytesMut::with_capacity(V2_LENGTH_SIZE + ciphertext.len());
        let len = ciphertext.len().to_le_bytes();
        buf.put_slice(&len[..V2_LENGTH_SIZE]);
        buf.put_slice(ciphertext);
        Ok(buf)
    }

    /// Decodes one v2 packet from the front of `buf`.
    ///
    /// # Errors
    /// `Format` if the declared length is below the minimum packet size.
    pub fn decode_v2_packet(&self, buf: &[u8]) -> Result<Decoded<Bytes>> {
        if buf.len() < V2_LENGTH_SIZE {
            return Ok(Decoded::Incomplete);
        }
        let len = usize::from(buf[0]) | usize::from(buf[1]) << 8 | usize::from(buf[2]) << 16;
        check_v2_len(len)?;

        let total = V2_LENGTH_SIZE + len;
        if buf.len() < total {
            return Ok(Decoded::Incomplete);
        }
        Ok(Decoded::Frame {
            item: Bytes::copy_from_slice(&buf[V2_LENGTH_SIZE..total]),
            consumed: total,
        })
    }
}

fn check_v2_len(len: usize) -> Result<()> {
    if len < MIN_V2_CIPHERTEXT {
        return Err(CoreError::format(format!(
            "v2 ciphertext of {len} bytes is shorter than {MIN_V2_CIPHERTEXT}"
        )));
    }
    if len > MAX_V2_CIPHERTEXT {
        return Err(CoreError::too_large(MAX_V2_CIPHERTEXT, len));
    }
    Ok(())
}

/// First four bytes of double SHA-256.
fn checksum(payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&digest[..CHECKSUM_SIZE]);
    out
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(name: &str) -> Command {
        Command::new(name).unwrap()
    }

    #[test]
    fn test_v1_empty_payload_checksum() {
        // Well-known checksum of the empty payload
        assert_eq!(checksum(b""), [0x5d, 0xf6, 0xe0, 0xe2]);
    }

    #[test]
    fn test_v1_roundtrip() {
        let codec = FrameCodec::default();
        let frame = codec.encode_v1(&cmd("block"), b"hello").unwrap();
        assert_eq!(frame.len(), V1_HEADER_SIZE + 5);
        assert_eq!(&frame[..4], &DEFAULT_MAGIC);

        let (msg, consumed) = codec.decode_v1(&frame).unwrap().into_frame().unwrap();
        assert_eq!(msg.command.as_str(), "block");
        assert_eq!(&msg.payload[..], b"hello");
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn test_v1_incomplete() {
        let codec = FrameCodec::default();
        let frame = codec.encode_v1(&cmd("tx"), &[7u8; 100]).unwrap();

        assert!(codec.decode_v1(&frame[..2]).unwrap().is_incomplete());
        assert!(codec.decode_v1(&frame[..V1_HEADER_SIZE]).unwrap().is_incomplete());
        assert!(codec.decode_v1(&frame[..frame.len() - 1]).unwrap().is_incomplete());
    }

    #[test]
    fn test_v1_consumes_exactly_one() {
        let codec = FrameCodec::default();
        let mut buf = codec.encode_v1(&cmd("a"), b"1").unwrap();
        let first_len = buf.len();
        buf.extend_from_slice(&codec.encode_v1(&cmd("b"), b"2").unwrap());

        let (msg, consumed) = codec.decode_v1(&buf).unwrap().into_frame().unwrap();
        assert_eq!(msg.command.as_str(), "a");
        assert_eq!(consumed, first_len);
    }

    #[test]
    fn test_v1_bad_magic() {
        let codec = FrameCodec::default();
        let other = FrameCodec::new([0x0b, 0x11, 0x09, 0x07]);
        let frame = other.encode_v1(&cmd("ping"), b"").unwrap();

        assert!(codec.decode_v1(&frame).unwrap_err().is_format_error());
        assert!(codec.decode_v1(&frame[..2]).unwrap_err().is_format_error());
    }

    #[test]
    fn test_v1_bad_checksum() {
        let codec = FrameCodec::default();
        let mut frame = codec.encode_v1(&cmd("ping"), b"data").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 1;
        assert!(matches!(
            codec.decode_v1(&frame),
            Err(CoreError::Format { .. })
        ));
    }

    #[test]
    fn test_v1_oversized() {
        let codec = FrameCodec::default().with_max_message_size(8);
        assert!(matches!(
            codec.encode_v1(&cmd("big"), &[0u8; 9]),
            Err(CoreError::MessageTooLarge { max: 8, actual: 9 })
        ));

        // Declared length is rejected from the header alone
        let mut frame = FrameCodec::default().encode_v1(&cmd("big"), &[0u8; 9]).unwrap();
        frame.truncate(V1_HEADER_SIZE);
        assert!(matches!(
            codec.decode_v1(&frame),
            Err(CoreError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_v1_sniffing_and_resync() {
        let codec = FrameCodec::default();
        let frame = codec.encode_v1(&cmd("version"), b"ua").unwrap();
        assert!(codec.looks_like_v1_header(&frame));
        assert!(!codec.looks_like_v1_header(&frame[..V1_PREFIX_SIZE - 1]));

        let mut noisy = vec![0xaau8; 300];
        noisy.extend_from_slice(&frame);
        assert_eq!(codec.find_v1_header(&noisy), Some(300));

        let mut too_far = vec![0xaau8; MAX_RESYNC_SCAN + 1];
        too_far.extend_from_slice(&frame);
        assert_eq!(codec.find_v1_header(&too_far), None);
    }

    #[test]
    fn test_v2_roundtrip() {
        let codec = FrameCodec::default();
        let ciphertext = vec![0x42u8; 40];
        let packet = codec.encode_v2_packet(&ciphertext).unwrap();
        assert_eq!(&packet[..3], &[40, 0, 0]);

        let (item, consumed) = codec.decode_v2_packet(&packet).unwrap().into_frame().unwrap();
        assert_eq!(&item[..], &ciphertext[..]);
        assert_eq!(consumed, 43);
    }

    #[test]
    fn test_v2_incomplete_and_limits() {
        let codec = FrameCodec::default();
        let packet = codec.encode_v2_packet(&[1u8; 20]).unwrap();
        assert!(codec.decode_v2_packet(&packet[..2]).unwrap().is_incomplete());
        assert!(codec.decode_v2_packet(&packet[..10]).unwrap().is_incomplete());

        assert!(codec.encode_v2_packet(&[0u8; 16]).unwrap_err().is_format_error());
        assert!(codec.decode_v2_packet(&[16, 0, 0]).unwrap_err().is_format_error());
        assert!(matches!(
            codec.encode_v2_packet(&vec![0u8; MAX_V2_CIPHERTEXT + 1]),
            Err(CoreError::MessageTooLarge { .. })
        ));
    }
}
