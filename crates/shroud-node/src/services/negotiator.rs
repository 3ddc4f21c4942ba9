// ============================================
// File: crates/shroud-node/src/services/negotiator.rs
// ============================================
//! # Handshake Negotiator
//!
//! ## Creation Reason
//! Decides, on a freshly connected stream, whether the connection runs
//! the plaintext v1 transport or the encrypted v2 transport, and drives
//! the v2 handshake bytes in and out of the socket.
//!
//! ## Main Functionality
//! - `Negotiator::outbound`: Dialer side, optional v2 preamble, downgrade
//! - `Negotiator::inbound`: Listener side, peek and classify
//! - `NegotiationState`: Per-connection state machine, logged on every step
//! - `Negotiated`: Outcome handed to the peer connection
//!
//! ## State Machine
//! ```text
//!   Start ──► SentGarbageAndKey ──► ReceivedPeerKey ──► VersionDecided ──► Established(v2)
//!     │               │                                      ▲
//!     │               └── v1 bytes back (downgrade) ─────────┘──────────► Established(v1)
//!     └── not advertising / v1 peeked / v2 disabled ─────────────────────► Established(v1)
//!
//!   any state ── malformed key, garbage too long, bad packet, timeout ──► Failed
//! ```
//!
//! ## Downgrade
//! When we advertised v2 and the first 16 bytes back are a v1 header, the
//! v2 attempt is abandoned on the same socket. Nothing application-level
//! has been sent yet (the greeting is still queued), so the greeting goes
//! out exactly once, in v1 framing. The bytes already read stay buffered
//! for the v1 reader.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The whole exchange runs under the policy's handshake timeout
//! - A failed negotiation is never retried on the same stream
//!
//! ## Last Modified
//! v0.1.0 - Initial negotiator

use std::fmt;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use shroud_common::{ConnectionId, TransportVersion};
use shroud_core::crypto::{KeyedHandshake, X25519_PUBLIC_KEY_SIZE};
use shroud_core::protocol::codec::V1_PREFIX_SIZE;
use shroud_core::{AeadSession, CoreError, HandshakeProgress, NegotiationPath, Role, V2Handshake};

use crate::error::{NodeError, Result};
use crate::services::policy::ConnectionPolicy;

/// Initial read buffer for handshake bytes.
const HANDSHAKE_BUFFER: usize = 4096;

// ============================================
// NegotiationState
// ============================================

/// Where a connection is in transport negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Nothing exchanged yet.
    Start,
    /// Our key and garbage are on the wire.
    SentGarbageAndKey,
    /// The peer's key arrived and session keys are derived.
    ReceivedPeerKey,
    /// The transport is fixed.
    VersionDecided,
    /// Negotiation finished.
    Established(TransportVersion),
    /// Negotiation failed; the stream must be dropped.
    Failed,
}

impl NegotiationState {
    /// Returns `true` once negotiation has ended either way.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Established(_) | Self::Failed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::SentGarbageAndKey => write!(f, "sent-garbage-and-key"),
            Self::ReceivedPeerKey => write!(f, "received-peer-key"),
            Self::VersionDecided => write!(f, "version-decided"),
            Self::Established(version) => write!(f, "established-{version}"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ============================================
// Negotiated
// ============================================

/// Result of a finished negotiation.
#[derive(Debug)]
pub struct Negotiated {
    /// Transport the connection runs.
    pub version: TransportVersion,
    /// How the transport was reached.
    pub path: NegotiationPath,
    /// Encrypted session for v2.
    pub session: Option<AeadSession>,
    /// Bytes read past the handshake, to be decoded as traffic.
    pub leftover: BytesMut,
    /// The v1 reader must skip an unanswered v2 preamble first.
    pub resync_v1: bool,
    /// Decoy packets the peer sent before its version packet.
    pub handshake_decoys: u64,
}

impl Negotiated {
    fn v1(path: NegotiationPath, leftover: BytesMut, resync_v1: bool) -> Self {
        Self {
            version: TransportVersion::V1,
            path,
            session: None,
            leftover,
            resync_v1,
            handshake_decoys: 0,
        }
    }
}

// ============================================
// Negotiator
// ============================================

/// Drives negotiation for one connection.
#[derive(Debug)]
pub struct Negotiator<'a> {
    policy: &'a ConnectionPolicy,
    conn_id: ConnectionId,
    state: NegotiationState,
}

impl<'a> Negotiator<'a> {
    /// Creates a negotiator in `Start`.
    #[must_use]
    pub const fn new(policy: &'a ConnectionPolicy, conn_id: ConnectionId) -> Self {
        Self {
            policy,
            conn_id,
            state: NegotiationState::Start,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> NegotiationState {
        self.state
    }

    /// Negotiates as the dialing side.
    ///
    /// # Errors
    /// - `HandshakeTimeout` if the peer is too slow
    /// - `Core` handshake, authentication or format errors
    /// - `Io` if the stream fails
    pub async fn outbound<S>(&mut self, stream: &mut S, advertise_v2: bool) -> Result<Negotiated>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = self.policy.handshake_timeout;
        let result = tokio::time::timeout(deadline, self.run_outbound(stream, advertise_v2)).await;
        self.finish(result, deadline)
    }

    /// Negotiates as the listening side.
    ///
    /// # Errors
    /// Same as [`Negotiator::outbound`].
    pub async fn inbound<S>(&mut self, stream: &mut S) -> Result<Negotiated>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = self.policy.handshake_timeout;
        let result = tokio::time::timeout(deadline, self.run_inbound(stream)).await;
        self.finish(result, deadline)
    }

    async fn run_outbound<S>(&mut self, stream: &mut S, advertise_v2: bool) -> Result<Negotiated>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !advertise_v2 {
            self.transition(NegotiationState::VersionDecided);
            self.transition(NegotiationState::Established(TransportVersion::V1));
            return Ok(Negotiated::v1(NegotiationPath::NotAdvertised, BytesMut::new(), false));
        }

        let codec = self.policy.codec();
        let handshake = V2Handshake::new(Role::Initiator, codec, self.policy.rekey_interval);
        stream.write_all(&handshake.key_and_garbage()).await?;
        stream.flush().await?;
        self.transition(NegotiationState::SentGarbageAndKey);

        let mut buf = BytesMut::with_capacity(HANDSHAKE_BUFFER);
        fill_to(stream, &mut buf, V1_PREFIX_SIZE).await?;
        if codec.looks_like_v1_header(&buf[..V1_PREFIX_SIZE]) {
            info!(conn_id = %self.conn_id, "Peer answered in v1, downgrading");
            self.transition(NegotiationState::VersionDecided);
            self.transition(NegotiationState::Established(TransportVersion::V1));
            return Ok(Negotiated::v1(NegotiationPath::Downgrade, buf, false));
        }

        let peer_key = read_peer_key(stream, &mut buf).await?;
        let mut keyed = handshake.receive_key(&peer_key)?;
        self.transition(NegotiationState::ReceivedPeerKey);

        stream.write_all(&keyed.terminator_and_version(&[])?).await?;
        stream.flush().await?;

        self.complete_v2(stream, keyed, buf).await
    }

    async fn run_inbound<S>(&mut self, stream: &mut S) -> Result<Negotiated>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.policy.v2_enabled {
            // v1-only listener: speak first, skip any v2 preamble later
            self.transition(NegotiationState::VersionDecided);
            self.transition(NegotiationState::Established(TransportVersion::V1));
            return Ok(Negotiated::v1(NegotiationPath::PlainV1, BytesMut::new(), true));
        }

        let codec = self.policy.codec();
        let mut buf = BytesMut::with_capacity(HANDSHAKE_BUFFER);
        fill_to(stream, &mut buf, V1_PREFIX_SIZE).await?;
        if codec.looks_like_v1_header(&buf[..V1_PREFIX_SIZE]) {
            debug!(conn_id = %self.conn_id, "Peer opened with v1 framing");
            self.transition(NegotiationState::VersionDecided);
            self.transition(NegotiationState::Established(TransportVersion::V1));
            return Ok(Negotiated::v1(NegotiationPath::PlainV1, buf, false));
        }

        let peer_key = read_peer_key(stream, &mut buf).await?;
        let handshake = V2Handshake::new(Role::Responder, codec, self.policy.rekey_interval);
        let mut reply = handshake.key_and_garbage();
        let mut keyed = handshake.receive_key(&peer_key)?;
        self.transition(NegotiationState::ReceivedPeerKey);

        reply.extend_from_slice(&keyed.terminator_and_version(&[])?);
        stream.write_all(&reply).await?;
        stream.flush().await?;

        self.complete_v2(stream, keyed, buf).await
    }

    /// Reads until the peer's version packet is authenticated.
    async fn complete_v2<S>(
        &mut self,
        stream: &mut S,
        mut keyed: KeyedHandshake,
        mut buf: BytesMut,
    ) -> Result<Negotiated>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let end = loop {
            match keyed.process(&buf[X25519_PUBLIC_KEY_SIZE..])? {
                HandshakeProgress::Complete { consumed } => break X25519_PUBLIC_KEY_SIZE + consumed,
                HandshakeProgress::NeedMore => read_more(stream, &mut buf).await?,
            }
        };
        self.transition(NegotiationState::VersionDecided);

        let handshake_decoys = keyed.decoys_received();
        let session = keyed.finish()?;
        let leftover = buf.split_off(end);
        info!(
            conn_id = %self.conn_id,
            session_id = %session.session_id(),
            handshake_decoys,
            "Encrypted session established"
        );
        self.transition(NegotiationState::Established(TransportVersion::V2));

        Ok(Negotiated {
            version: TransportVersion::V2,
            path: NegotiationPath::Encrypted,
            session: Some(session),
            leftover,
            resync_v1: false,
            handshake_decoys,
        })
    }

    fn finish(
        &mut self,
        result: std::result::Result<Result<Negotiated>, tokio::time::error::Elapsed>,
        deadline: std::time::Duration,
    ) -> Result<Negotiated> {
        let outcome = result.unwrap_or_else(|_| {
            Err(NodeError::HandshakeTimeout {
                millis: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            })
        });
        if let Err(e) = &outcome {
            warn!(conn_id = %self.conn_id, state = %self.state, error = %e, "Negotiation failed");
            self.transition(NegotiationState::Failed);
        }
        outcome
    }

    fn transition(&mut self, next: NegotiationState) {
        trace!(conn_id = %self.conn_id, from = %self.state, to = %next, "Negotiation state");
        self.state = next;
    }
}

// ============================================
// Stream Helpers
// ============================================

/// Reads once, appending to `buf`.
async fn read_more<S>(stream: &mut S, buf: &mut BytesMut) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    if stream.read_buf(buf).await? == 0 {
        return Err(CoreError::handshake("peer closed the connection during negotiation").into());
    }
    Ok(())
}

/// Reads until `buf` holds at least `len` bytes.
async fn fill_to<S>(stream: &mut S, buf: &mut BytesMut, len: usize) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    while buf.len() < len {
        read_more(stream, buf).await?;
    }
    Ok(())
}

async fn read_peer_key<S>(stream: &mut S, buf: &mut BytesMut) -> Result<[u8; X25519_PUBLIC_KEY_SIZE]>
where
    S: AsyncRead + Unpin,
{
    fill_to(stream, buf, X25519_PUBLIC_KEY_SIZE).await?;
    let mut key = [0u8; X25519_PUBLIC_KEY_SIZE];
    key.copy_from_slice(&buf[..X25519_PUBLIC_KEY_SIZE]);
    Ok(key)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    use shroud_core::protocol::codec::DEFAULT_MAGIC;
    use shroud_core::{Command, FrameCodec};

    fn policy(v2_enabled: bool) -> ConnectionPolicy {
        let mut policy = ConnectionPolicy::default();
        policy.v2_enabled = v2_enabled;
        policy.handshake_timeout = Duration::from_secs(5);
        policy
    }

    async fn run_pair(
        dialer: ConnectionPolicy,
        listener: ConnectionPolicy,
        advertise: bool,
    ) -> (Negotiated, Negotiated) {
        let (mut a, mut b) = duplex(64 * 1024);
        let inbound = tokio::spawn(async move {
            let mut negotiator = Negotiator::new(&listener, ConnectionId::new(2));
            let result = negotiator.inbound(&mut b).await.unwrap();
            // A v1 listener speaks first
            if result.version == TransportVersion::V1 {
                let greeting = FrameCodec::default().encode_v1(&Command::greeting(), b"ua").unwrap();
                b.write_all(&greeting).await.unwrap();
            }
            (result, b)
        });

        let mut negotiator = Negotiator::new(&dialer, ConnectionId::new(1));
        if !advertise {
            // A v1 dialer speaks first
            let greeting = FrameCodec::default().encode_v1(&Command::greeting(), b"ua").unwrap();
            a.write_all(&greeting).await.unwrap();
        }
        let outbound = negotiator.outbound(&mut a, advertise).await.unwrap();
        assert_eq!(
            negotiator.state(),
            NegotiationState::Established(outbound.version)
        );
        let (inbound, _b) = inbound.await.unwrap();
        (outbound, inbound)
    }

    #[tokio::test]
    async fn test_both_v2() {
        let (out, inb) = run_pair(policy(true), policy(true), true).await;
        assert_eq!(out.version, TransportVersion::V2);
        assert_eq!(inb.version, TransportVersion::V2);
        assert_eq!(out.path, NegotiationPath::Encrypted);

        let a = out.session.unwrap();
        let b = inb.session.unwrap();
        assert_eq!(a.session_id(), b.session_id());
        assert!(out.leftover.is_empty());
    }

    #[tokio::test]
    async fn test_downgrade_against_v1_listener() {
        let (out, inb) = run_pair(policy(true), policy(false), true).await;
        assert_eq!(out.version, TransportVersion::V1);
        assert_eq!(out.path, NegotiationPath::Downgrade);
        assert!(inb.resync_v1);
        // The listener's greeting bytes stay buffered for the v1 reader
        assert!(out.leftover.len() >= V1_PREFIX_SIZE);
        assert_eq!(&out.leftover[..4], &DEFAULT_MAGIC);
    }

    #[tokio::test]
    async fn test_not_advertised_to_v2_listener() {
        let (out, inb) = run_pair(policy(true), policy(true), false).await;
        assert_eq!(out.version, TransportVersion::V1);
        assert_eq!(out.path, NegotiationPath::NotAdvertised);
        assert_eq!(inb.version, TransportVersion::V1);
        assert_eq!(inb.path, NegotiationPath::PlainV1);
        assert_eq!(&inb.leftover[..4], &DEFAULT_MAGIC);
    }

    #[tokio::test]
    async fn test_v1_on_both_sides() {
        let (out, inb) = run_pair(policy(false), policy(false), false).await;
        assert_eq!(out.path, NegotiationPath::NotAdvertised);
        assert_eq!(inb.path, NegotiationPath::PlainV1);
        assert_eq!(inb.version, TransportVersion::V1);
    }

    #[tokio::test]
    async fn test_timeout_is_handshake_error() {
        let mut listener = ConnectionPolicy::default();
        listener.handshake_timeout = Duration::from_millis(50);
        let (_silent, mut b) = duplex(1024);
        let mut negotiator = Negotiator::new(&listener, ConnectionId::new(1));
        let err = negotiator.inbound(&mut b).await.unwrap_err();
        assert!(matches!(err, NodeError::HandshakeTimeout { millis: 50 }));
        assert!(err.is_handshake_error());
        assert_eq!(negotiator.state(), NegotiationState::Failed);
    }

    #[tokio::test]
    async fn test_endless_garbage_fails() {
        let listener = policy(true);
        let (mut a, mut b) = duplex(64 * 1024);
        let writer = tokio::spawn(async move {
            // Not v1, then far more noise than any garbage allowance
            let noise = vec![0x42u8; 32 + 5000];
            let _ = a.write_all(&noise).await;
            a
        });
        let mut negotiator = Negotiator::new(&listener, ConnectionId::new(1));
        let err = negotiator.inbound(&mut b).await.unwrap_err();
        assert!(err.is_handshake_error());
        drop(writer.await);
    }

    #[tokio::test]
    async fn test_peer_closes_during_handshake() {
        let dialer = policy(true);
        let (mut a, b) = duplex(64 * 1024);
        drop(b);
        let mut negotiator = Negotiator::new(&dialer, ConnectionId::new(1));
        assert!(negotiator.outbound(&mut a, true).await.is_err());
        assert_eq!(negotiator.state(), NegotiationState::Failed);
    }
}
