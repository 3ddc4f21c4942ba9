// ============================================
// File: crates/shroud-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the small value types that describe a peer connection so
//! every layer (codec, dialer, negotiator, manager, observability output)
//! uses the same vocabulary.
//!
//! ## Main Functionality
//! - `ConnectionId`: Sequential connection identifier, shown as `peer-N`
//! - `Direction`: Inbound / outbound
//! - `TransportVersion`: Negotiated wire transport (`v1` / `v2`)
//! - `PeerAddr`: Clearnet socket address or anonymized (onion) destination
//! - `SessionId`: 32-byte identifier of an encrypted v2 session
//!
//! ## ⚠️ Important Note for Next Developer
//! - `Display` and serde forms are what operators see in peer listings,
//!   keep them lowercase and stable
//! - `PeerAddr` deliberately does not resolve host names; DNS is not part
//!   of the transport layer
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Size of a v2 session identifier in bytes.
pub const SESSION_ID_SIZE: usize = 32;

/// Host suffix that marks an anonymized destination.
pub const ONION_SUFFIX: &str = ".onion";

// ============================================
// ConnectionId
// ============================================

/// Unique identifier of a peer connection within one node process.
///
/// Identifiers are handed out sequentially by the connection manager and
/// never reused while the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a connection id from its numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

// ============================================
// Direction
// ============================================

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The remote peer connected to us.
    Inbound,
    /// We connected to the remote peer.
    Outbound,
}

impl Direction {
    /// Returns `true` for inbound connections.
    #[must_use]
    pub const fn is_inbound(&self) -> bool {
        matches!(self, Self::Inbound)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

// ============================================
// TransportVersion
// ============================================

/// Wire transport negotiated for a connection.
///
/// Fixed once negotiation finishes; a connection never switches versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportVersion {
    /// Legacy plaintext, magic-framed transport.
    V1,
    /// Authenticated-encrypted transport with decoys and rekeying.
    V2,
}

impl TransportVersion {
    /// Returns the short name used in peer listings.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }

    /// Returns `true` if traffic on this transport is encrypted.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self, Self::V2)
    }
}

impl fmt::Display for TransportVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// PeerAddr
// ============================================

/// Destination or origin of a peer connection.
///
/// # Forms
/// ```text
/// 203.0.113.7:8333          → PeerAddr::Ip
/// [2001:db8::1]:8333        → PeerAddr::Ip
/// abcdefgh....onion:8333    → PeerAddr::Onion (anonymized)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    /// Clearnet IPv4/IPv6 socket address.
    Ip(SocketAddr),
    /// Anonymized onion-service destination, reachable only through a proxy.
    Onion {
        /// Host name including the `.onion` suffix.
        host: String,
        /// Port number.
        port: u16,
    },
}

impl PeerAddr {
    /// Returns `true` when the destination is anonymized and must be
    /// reached through a tunneling proxy.
    #[must_use]
    pub const fn is_anonymized(&self) -> bool {
        matches!(self, Self::Onion { .. })
    }

    /// Returns the port number.
    #[must_use]
    pub const fn port(&self) -> u16 {
        match self {
            Self::Ip(addr) => addr.port(),
            Self::Onion { port, .. } => *port,
        }
    }

    /// Returns the socket address for clearnet destinations.
    #[must_use]
    pub const fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Ip(addr) => Some(*addr),
            Self::Onion { .. } => None,
        }
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::Ip(addr)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Onion { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

impl FromStr for PeerAddr {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self::Ip(addr));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CommonError::invalid_input("peer address", "missing port"))?;
        let port: u16 = port
            .parse()
            .map_err(|_| CommonError::invalid_input("peer address", "invalid port"))?;

        let label = host.strip_suffix(ONION_SUFFIX).unwrap_or_default();
        if label.is_empty() || !label.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CommonError::invalid_input(
                "peer address",
                "expected ip:port or <name>.onion:port",
            ));
        }

        Ok(Self::Onion {
            host: host.to_ascii_lowercase(),
            port,
        })
    }
}

impl Serialize for PeerAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerAddr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================
// SessionId
// ============================================

/// Identifier of an encrypted v2 session.
///
/// Both ends derive the same value from the handshake key schedule, so it
/// can be compared out of band to detect a man in the middle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl SessionId {
    /// Wraps raw session id bytes.
    #[must_use]
    pub const fn new(bytes: [u8; SESSION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a `SessionId` from a slice.
    ///
    /// Returns `None` if the slice is not exactly 32 bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SESSION_ID_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}...)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for SessionId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_bytes(&bytes)
            .ok_or_else(|| CommonError::invalid_length(SESSION_ID_SIZE, bytes.len()))
    }
}

impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "peer-7");
        assert_eq!(serde_json::to_string(&ConnectionId::new(7)).unwrap(), "7");
    }

    #[test]
    fn test_direction_and_version_names() {
        assert_eq!(Direction::Inbound.to_string(), "inbound");
        assert_eq!(Direction::Outbound.to_string(), "outbound");
        assert_eq!(TransportVersion::V1.to_string(), "v1");
        assert_eq!(TransportVersion::V2.to_string(), "v2");
        assert_eq!(serde_json::to_string(&TransportVersion::V2).unwrap(), "\"v2\"");
        assert!(TransportVersion::V2.is_encrypted());
        assert!(!TransportVersion::V1.is_encrypted());
    }

    #[test]
    fn test_peer_addr_parse_ip() {
        let addr: PeerAddr = "127.0.0.1:8333".parse().unwrap();
        assert!(matches!(addr, PeerAddr::Ip(_)));
        assert!(!addr.is_anonymized());
        assert_eq!(addr.port(), 8333);

        let v6: PeerAddr = "[::1]:18444".parse().unwrap();
        assert_eq!(v6.socket_addr().unwrap().port(), 18444);
    }

    #[test]
    fn test_peer_addr_parse_onion() {
        let addr: PeerAddr = "ExampleOnion234.onion:8333".parse().unwrap();
        assert!(addr.is_anonymized());
        assert_eq!(addr.to_string(), "exampleonion234.onion:8333");
        assert!(addr.socket_addr().is_none());
    }

    #[test]
    fn test_peer_addr_rejects_hostnames() {
        assert!("example.com:8333".parse::<PeerAddr>().is_err());
        assert!(".onion:8333".parse::<PeerAddr>().is_err());
        assert!("abc.onion".parse::<PeerAddr>().is_err());
        assert!("abc.onion:99999".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_peer_addr_serde() {
        let addr: PeerAddr = "abc.onion:9000".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"abc.onion:9000\"");
        let back: PeerAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_session_id_hex() {
        let id = SessionId::new([0xab; SESSION_ID_SIZE]);
        let text = id.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<SessionId>().unwrap(), id);
        assert!(format!("{id:?}").starts_with("SessionId(abababab"));
        assert!("abcd".parse::<SessionId>().is_err());
    }
}
