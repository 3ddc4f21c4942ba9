// ============================================
// File: crates/shroud-core/src/protocol/version.rs
// ============================================
//! # Transport Version Negotiation Table
//!
//! ## Creation Reason
//! Which transport an outbound connection ends up with depends on two
//! independent facts. Keeping the answer in a table makes the downgrade
//! path auditable and lets tests iterate over every case.
//!
//! ## Decision Table
//! | peer supports v2 | local advertises v2 | result | path |
//! |------------------|---------------------|--------|------|
//! | no               | no                  | v1     | not advertised |
//! | no               | yes                 | v1     | downgrade after v1 reply |
//! | yes              | no                  | v1     | not advertised, peer answers v1 |
//! | yes              | yes                 | v2     | encrypted handshake |
//!
//! ## ⚠️ Important Note for Next Developer
//! - The negotiator does not consult this table at runtime; it observes
//!   bytes. The table is the contract those observations must satisfy.
//! - A dialer that stays in v1 never learns whether the peer could have
//!   done better, so both unadvertised rows report `NotAdvertised`.
//!   `PlainV1` is the listening side's view of a v1 connection.
//!
//! ## Last Modified
//! v0.1.0 - Initial negotiation table

use std::fmt;

use shroud_common::TransportVersion;

// ============================================
// NegotiationPath
// ============================================

/// How a connection arrived at its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationPath {
    /// The listening side settled on v1 without a v2 exchange.
    PlainV1,
    /// v2 was advertised, the peer answered in v1, we fell back in place.
    Downgrade,
    /// The dialer addressed the peer in v1 without offering v2.
    NotAdvertised,
    /// Both sides completed the encrypted handshake.
    Encrypted,
}

impl NegotiationPath {
    /// Returns the transport this path ends in.
    #[must_use]
    pub const fn version(&self) -> TransportVersion {
        match self {
            Self::Encrypted => TransportVersion::V2,
            Self::PlainV1 | Self::Downgrade | Self::NotAdvertised => TransportVersion::V1,
        }
    }
}

impl fmt::Display for NegotiationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlainV1 => write!(f, "plain-v1"),
            Self::Downgrade => write!(f, "downgrade"),
            Self::NotAdvertised => write!(f, "not-advertised"),
            Self::Encrypted => write!(f, "encrypted"),
        }
    }
}

// ============================================
// Decision Table
// ============================================

/// One row of the negotiation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationCase {
    /// Whether the remote peer has v2 enabled.
    pub peer_supports_v2: bool,
    /// Whether the dialer sent the v2 preamble.
    pub local_advertises_v2: bool,
    /// Expected outcome.
    pub path: NegotiationPath,
}

/// All four outbound negotiation cases.
pub const NEGOTIATION_TABLE: [NegotiationCase; 4] = [
    NegotiationCase {
        peer_supports_v2: false,
        local_advertises_v2: false,
        path: NegotiationPath::NotAdvertised,
    },
    NegotiationCase {
        peer_supports_v2: false,
        local_advertises_v2: true,
        path: NegotiationPath::Downgrade,
    },
    NegotiationCase {
        peer_supports_v2: true,
        local_advertises_v2: false,
        path: NegotiationPath::NotAdvertised,
    },
    NegotiationCase {
        peer_supports_v2: true,
        local_advertises_v2: true,
        path: NegotiationPath::Encrypted,
    },
];

/// Looks up the negotiation path for an outbound attempt.
#[must_use]
pub const fn negotiation_path(peer_supports_v2: bool, local_advertises_v2: bool) -> NegotiationPath {
    let index = match (peer_supports_v2, local_advertises_v2) {
        (false, false) => 0,
        (false, true) => 1,
        (true, false) => 2,
        (true, true) => 3,
    };
    NEGOTIATION_TABLE[index].path
}

/// Looks up the negotiated transport for an outbound attempt.
#[must_use]
pub const fn negotiated_version(peer_supports_v2: bool, local_advertises_v2: bool) -> TransportVersion {
    negotiation_path(peer_supports_v2, local_advertises_v2).version()
}

/// Contents of the v2 version packet.
///
/// Empty today; receivers ignore the contents so the field can carry
/// extensions later.
pub const VERSION_CONTENTS: [u8; 0] = [];

// ============================================
// Tests
// ============================================
