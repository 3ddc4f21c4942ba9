// ============================================
// File: crates/shroud-node/src/services/peer.rs
// ============================================
//! # Peer Connection
//!
//! ## Creation Reason
//! Gives the rest of the node one send/receive contract regardless of
//! whether the connection negotiated the plaintext or the encrypted
//! transport.
//!
//! ## Main Functionality
//! - `PeerConnection`: Lifecycle state, queued greeting, framed IO
//! - `TrafficStats`: Per-command byte counters and decoy counters
//! - `PeerInfo`: Serializable per-connection report
//!
//! ## Data Path
//! ```text
//!   send(command, payload)
//!     v1: encode_v1 ───────────────────────────────────────► socket
//!     v2: encode_envelope ─► seal(is_decoy=false) ─► encode_v2_packet ─► socket
//!
//!   receive()
//!     v1: decode_v1 ◄──────────────────────────────────────── socket
//!     v2: decode_v2_packet ─► open ─► decoy? count, loop : decode_envelope
//! ```
//!
//! ## Lifecycle
//! ```text
//!   Handshaking ──► Established ──► Closing ──► Closed
//!        │               │             │          ▲
//!        └───────────────┴─────────────┴─► Failed ┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Reader and writer each sit behind their own async mutex; the AEAD
//!   counters of one direction only ever advance under that lock
//! - Messages sent while `Handshaking` are queued and flushed exactly
//!   once by `establish`; this is what makes the downgrade path send
//!   a single greeting
//! - `close` may race an in-flight `send`/`receive`; both observe the
//!   close signal and return `Closed`
//!
//! ## Last Modified
//! v0.1.0 - Initial peer connection

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use shroud_common::time::unix_timestamp;
use shroud_common::{ConnectionId, Direction, PeerAddr, SessionId, TransportVersion};
use shroud_core::crypto::DirectionStats;
use shroud_core::protocol::codec::{MAX_RESYNC_SCAN, V1_PREFIX_SIZE};
use shroud_core::protocol::{decode_envelope, encode_envelope};
use shroud_core::{
    Command, CoreError, Decoded, FrameCodec, NegotiationPath, NetMessage, PacketOpener,
    PacketSealer,
};
use shroud_transport::BoxedStream;

use crate::error::{NodeError, Result};
use crate::services::negotiator::Negotiated;

/// Upper bound on waiting for the writer during close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read buffer reserved per fill.
const READ_CHUNK: usize = 16 * 1024;

// ============================================
// ConnectionState
// ============================================

/// Lifecycle state of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Transport negotiation in progress.
    Handshaking,
    /// Messages flow.
    Established,
    /// Close requested.
    Closing,
    /// Terminal.
    Closed,
    /// Protocol violation; always followed by `Closed`.
    Failed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Handshaking, Self::Established | Self::Closing | Self::Failed)
                | (Self::Established, Self::Closing | Self::Failed)
                | (Self::Closing, Self::Closed | Self::Failed)
                | (Self::Failed, Self::Closed)
        )
    }

    /// Closing, closed or failed.
    #[must_use]
    pub const fn is_shutting_down(self) -> bool {
        matches!(self, Self::Closing | Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Handshaking => "handshaking",
            Self::Established => "established",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ============================================
// TrafficStats
// ============================================

/// Traffic counters of one connection.
///
/// Byte counts are wire bytes, framing included, keyed by command.
#[derive(Debug, Default)]
pub struct TrafficStats {
    sent_per_msg: Mutex<BTreeMap<String, u64>>,
    recv_per_msg: Mutex<BTreeMap<String, u64>>,
    decoys_sent: AtomicU64,
    decoys_received: AtomicU64,
    send_cipher: Mutex<DirectionStats>,
    recv_cipher: Mutex<DirectionStats>,
    last_send: AtomicU64,
    last_recv: AtomicU64,
}

impl TrafficStats {
    fn record_sent(&self, command: &Command, wire_len: usize) {
        *self.sent_per_msg.lock().entry(command.as_str().to_owned()).or_default() += wire_len as u64;
        self.last_send.store(unix_timestamp(), Ordering::Relaxed);
    }

    fn record_received(&self, command: &Command, wire_len: usize) {
        *self.recv_per_msg.lock().entry(command.as_str().to_owned()).or_default() += wire_len as u64;
        self.last_recv.store(unix_timestamp(), Ordering::Relaxed);
    }

    fn record_decoy_sent(&self) {
        self.decoys_sent.fetch_add(1, Ordering::Relaxed);
        self.last_send.store(unix_timestamp(), Ordering::Relaxed);
    }

    fn record_decoys_received(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.decoys_received.fetch_add(count, Ordering::Relaxed);
        self.last_recv.store(unix_timestamp(), Ordering::Relaxed);
    }

    fn update_ciphers(&self, send: Option<DirectionStats>, recv: Option<DirectionStats>) {
        if let Some(send) = send {
            *self.send_cipher.lock() = send;
        }
        if let Some(recv) = recv {
            *self.recv_cipher.lock() = recv;
        }
    }

    /// Packets sealed and send-direction rekeys; zero for v1.
    #[must_use]
    pub fn send_cipher(&self) -> DirectionStats {
        *self.send_cipher.lock()
    }

    /// Packets opened and receive-direction rekeys; zero for v1.
    #[must_use]
    pub fn recv_cipher(&self) -> DirectionStats {
        *self.recv_cipher.lock()
    }

    /// Decoy packets sent.
    #[must_use]
    pub fn decoys_sent(&self) -> u64 {
        self.decoys_sent.load(Ordering::Relaxed)
    }

    /// Decoy packets received and discarded, handshake decoys included.
    #[must_use]
    pub fn decoys_received(&self) -> u64 {
        self.decoys_received.load(Ordering::Relaxed)
    }

    /// Wire bytes sent per command.
    #[must_use]
    pub fn bytes_sent_per_msg(&self) -> BTreeMap<String, u64> {
        self.sent_per_msg.lock().clone()
    }

    /// Wire bytes received per command.
    #[must_use]
    pub fn bytes_recv_per_msg(&self) -> BTreeMap<String, u64> {
        self.recv_per_msg.lock().clone()
    }

    /// Unix time of the last packet written, decoys included; 0 if none.
    #[must_use]
    pub fn last_send(&self) -> u64 {
        self.last_send.load(Ordering::Relaxed)
    }

    /// Unix time of the last packet read, decoys included; 0 if none.
    #[must_use]
    pub fn last_recv(&self) -> u64 {
        self.last_recv.load(Ordering::Relaxed)
    }
}

// ============================================
// PeerInfo
// ============================================

/// Observable state of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Remote address.
    pub addr: PeerAddr,
    /// Who dialed.
    pub direction: Direction,
    /// Negotiated transport.
    pub transport_protocol_type: TransportVersion,
    /// Hex session id; empty for v1.
    pub session_id: String,
    /// Unix time the connection object was created.
    pub connected_at: u64,
    /// Wire bytes sent per command.
    pub bytes_sent_per_msg: BTreeMap<String, u64>,
    /// Wire bytes received per command.
    pub bytes_recv_per_msg: BTreeMap<String, u64>,
    /// Decoys sent.
    pub decoys_sent: u64,
    /// Decoys received and discarded.
    pub decoys_received: u64,
    /// Unix time of the last packet written; 0 if none.
    pub last_send: u64,
    /// Unix time of the last packet read; 0 if none.
    pub last_recv: u64,
}

// ============================================
// Framed IO halves
// ============================================

struct FrameWriter {
    half: WriteHalf<BoxedStream>,
    codec: FrameCodec,
    sealer: Option<PacketSealer>,
}

impl FrameWriter {
    fn encode_message(&mut self, command: &Command, payload: &[u8]) -> Result<BytesMut> {
        let max = self.codec.max_message_size();
        if payload.len() > max {
            return Err(CoreError::too_large(max, payload.len()).into());
        }
        match self.sealer.as_mut() {
            None => Ok(self.codec.encode_v1(command, payload)?),
            Some(sealer) => {
                let envelope = encode_envelope(command, payload);
                let ciphertext = sealer.seal(&envelope, false)?;
                Ok(self.codec.encode_v2_packet(&ciphertext)?)
            }
        }
    }

    fn encode_decoy(&mut self, contents: &[u8]) -> Result<BytesMut> {
        let sealer = self.sealer.as_mut().ok_or(NodeError::DecoyUnsupported)?;
        let ciphertext = sealer.seal(contents, true)?;
        Ok(self.codec.encode_v2_packet(&ciphertext)?)
    }

    fn cipher_stats(&self) -> Option<DirectionStats> {
        self.sealer.as_ref().map(PacketSealer::stats)
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.half.write_all(frame).await?;
        self.half.flush().await?;
        Ok(())
    }
}

/// One item pulled off the read buffer.
enum Inbound {
    Message { message: NetMessage, wire_len: usize },
    Decoy,
}

struct FrameReader {
    half: ReadHalf<BoxedStream>,
    codec: FrameCodec,
    opener: Option<PacketOpener>,
    buf: BytesMut,
    /// Skip bytes until the first v1 header
    resync: bool,
}

impl FrameReader {
    /// Decodes the next item already in the buffer, if complete.
    fn next_buffered(&mut self) -> Result<Option<Inbound>> {
        if self.resync && !self.skip_to_v1_header()? {
            return Ok(None);
        }

        let Some(opener) = self.opener.as_mut() else {
            return match self.codec.decode_v1(&self.buf)? {
                Decoded::Incomplete => Ok(None),
                Decoded::Frame { item, consumed } => {
                    self.buf.advance(consumed);
                    Ok(Some(Inbound::Message {
                        message: item,
                        wire_len: consumed,
                    }))
                }
            };
        };

        let Some((ciphertext, consumed)) = self.codec.decode_v2_packet(&self.buf)?.into_frame()
        else {
            return Ok(None);
        };
        let opened = opener.open(&ciphertext)?;
        self.buf.advance(consumed);

        if opened.is_decoy {
            trace!(len = opened.contents.len(), "Decoy packet discarded");
            return Ok(Some(Inbound::Decoy));
        }
        let message = decode_envelope(&opened.contents)?;
        Ok(Some(Inbound::Message {
            message,
            wire_len: consumed,
        }))
    }

    /// Drops an unanswered v2 preamble in front of v1 traffic.
    fn skip_to_v1_header(&mut self) -> Result<bool> {
        match self.codec.find_v1_header(&self.buf) {
            Some(offset) => {
                if offset > 0 {
                    debug!(skipped = offset, "Skipped unanswered v2 preamble");
                }
                self.buf.advance(offset);
                self.resync = false;
                Ok(true)
            }
            None if self.buf.len() >= MAX_RESYNC_SCAN + V1_PREFIX_SIZE => Err(CoreError::format(
                "no v1 header within the resynchronisation window",
            )
            .into()),
            None => Ok(false),
        }
    }

    fn cipher_stats(&self) -> Option<DirectionStats> {
        self.opener.as_ref().map(PacketOpener::stats)
    }

    /// Reads more bytes; `false` on end of stream.
    async fn fill(&mut self) -> Result<bool> {
        self.buf.reserve(READ_CHUNK);
        Ok(self.half.read_buf(&mut self.buf).await? > 0)
    }
}

struct Link {
    version: TransportVersion,
    path: NegotiationPath,
    session_id: Option<SessionId>,
    writer: tokio::sync::Mutex<FrameWriter>,
    reader: tokio::sync::Mutex<FrameReader>,
}

// ============================================
// PeerConnection
// ============================================

/// A connection to one peer.
pub struct PeerConnection {
    id: ConnectionId,
    addr: PeerAddr,
    direction: Direction,
    connected_at: u64,
    state: RwLock<ConnectionState>,
    /// Messages sent before establishment
    pending: Mutex<Vec<NetMessage>>,
    link: OnceLock<Link>,
    closed_tx: watch::Sender<bool>,
    stats: TrafficStats,
}

impl PeerConnection {
    /// Creates a connection in `Handshaking` with `greeting` queued.
    #[must_use]
    pub fn new(id: ConnectionId, addr: PeerAddr, direction: Direction, greeting: NetMessage) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id,
            addr,
            direction,
            connected_at: unix_timestamp(),
            state: RwLock::new(ConnectionState::Handshaking),
            pending: Mutex::new(vec![greeting]),
            link: OnceLock::new(),
            closed_tx,
            stats: TrafficStats::default(),
        }
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Attaches the negotiated stream and flushes queued messages.
    ///
    /// # Errors
    /// - `InvalidState` if not `Handshaking`
    /// - Any write error, which also fails the connection
    pub async fn establish(
        &self,
        stream: BoxedStream,
        negotiated: Negotiated,
        codec: FrameCodec,
    ) -> Result<()> {
        if self.state() != ConnectionState::Handshaking {
            return Err(NodeError::invalid_state(format!(
                "{} cannot be established from {}",
                self.id,
                self.state()
            )));
        }

        let Negotiated {
            version,
            path,
            session,
            leftover,
            resync_v1,
            handshake_decoys,
        } = negotiated;
        let session_id = session.as_ref().map(shroud_core::AeadSession::session_id);
        let (sealer, opener) = match session {
            Some(session) => {
                let (sealer, opener) = session.into_split();
                (Some(sealer), Some(opener))
            }
            None => (None, None),
        };
        self.stats.update_ciphers(
            sealer.as_ref().map(PacketSealer::stats),
            opener.as_ref().map(PacketOpener::stats),
        );
        self.stats.record_decoys_received(handshake_decoys);

        let (read_half, write_half) = tokio::io::split(stream);
        let link = Link {
            version,
            path,
            session_id,
            writer: tokio::sync::Mutex::new(FrameWriter {
                half: write_half,
                codec,
                sealer,
            }),
            reader: tokio::sync::Mutex::new(FrameReader {
                half: read_half,
                codec,
                opener,
                buf: leftover,
                resync: resync_v1,
            }),
        };
        if self.link.set(link).is_err() {
            return Err(NodeError::invalid_state(format!("{} already has a link", self.id)));
        }

        // Flush until the queue stays empty, then flip the state under the
        // queue lock so no send can slip in between
        loop {
            let batch = {
                let mut pending = self.pending.lock();
                if pending.is_empty() {
                    self.transition(ConnectionState::Established);
                    break;
                }
                std::mem::take(&mut *pending)
            };
            for message in batch {
                self.write_message(&message.command, &message.payload).await?;
            }
        }

        info!(
            conn_id = %self.id,
            addr = %self.addr,
            direction = %self.direction,
            version = %version,
            ?path,
            "Peer connection established"
        );
        Ok(())
    }

    /// Closes the connection; idempotent.
    pub async fn close(&self) {
        if !self.transition(ConnectionState::Closing) {
            return;
        }
        self.closed_tx.send_replace(true);

        if let Some(link) = self.link.get() {
            if let Ok(mut writer) = tokio::time::timeout(CLOSE_TIMEOUT, link.writer.lock()).await {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.half.shutdown()).await;
            }
        }

        self.transition(ConnectionState::Closed);
        info!(conn_id = %self.id, addr = %self.addr, "Peer connection closed");
    }

    /// Marks a protocol violation; the connection ends as `Closed`.
    pub fn fail(&self, error: &NodeError) {
        if !self.transition(ConnectionState::Failed) {
            return;
        }
        match error {
            NodeError::Core(e) if e.is_suspicious() => {
                warn!(conn_id = %self.id, addr = %self.addr, error = %error, "Peer connection failed");
            }
            _ => {
                info!(conn_id = %self.id, addr = %self.addr, error = %error, "Peer connection failed");
            }
        }
        self.closed_tx.send_replace(true);
        self.transition(ConnectionState::Closed);
    }

    /// Resolves once the connection is closing or closed.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed_tx.subscribe();
        wait_for_close(&mut closed).await;
    }

    fn remote_closed(&self) {
        if self.transition(ConnectionState::Closing) {
            self.closed_tx.send_replace(true);
            self.transition(ConnectionState::Closed);
            info!(conn_id = %self.id, addr = %self.addr, "Peer closed the connection");
        }
    }

    fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            trace!(conn_id = %self.id, from = %*state, to = %next, "Ignored state transition");
            return false;
        }
        debug!(conn_id = %self.id, from = %*state, to = %next, "Connection state");
        *state = next;
        true
    }

    // ========================================
    // Messaging
    // ========================================

    /// Sends one application message.
    ///
    /// While `Handshaking` the message is queued for establishment.
    ///
    /// # Errors
    /// - `Closed` once the connection is closing
    /// - `Core` format errors for oversized payloads
    /// - Sealing or IO errors, which also fail the connection
    pub async fn send(&self, command: Command, payload: impl Into<bytes::Bytes>) -> Result<()> {
        let payload = payload.into();
        {
            let mut pending = self.pending.lock();
            match self.state() {
                ConnectionState::Handshaking => {
                    trace!(conn_id = %self.id, command = %command.as_str(), "Queued until established");
                    pending.push(NetMessage::new(command, payload));
                    return Ok(());
                }
                ConnectionState::Established => {}
                _ => return Err(NodeError::Closed),
            }
        }
        self.write_message(&command, &payload).await
    }

    /// Sends a decoy packet with arbitrary contents.
    ///
    /// # Errors
    /// - `DecoyUnsupported` on v1
    /// - Same as [`PeerConnection::send`] otherwise
    pub async fn send_decoy(&self, contents: &[u8]) -> Result<()> {
        let link = self.link()?;
        if link.version != TransportVersion::V2 {
            return Err(NodeError::DecoyUnsupported);
        }
        self.write_with(|writer| writer.encode_decoy(contents)).await?;
        self.stats.record_decoy_sent();
        Ok(())
    }

    /// Waits for the next application message; decoys are never returned.
    ///
    /// # Errors
    /// - `Closed` when the peer or the node closes the connection
    /// - `Core` format or authentication errors, which fail the connection
    pub async fn receive(&self) -> Result<NetMessage> {
        let link = self.link()?;
        let mut closed = self.closed_tx.subscribe();
        let mut reader = link.reader.lock().await;

        loop {
            if self.state().is_shutting_down() {
                return Err(NodeError::Closed);
            }
            let step = match reader.next_buffered() {
                Ok(Some(Inbound::Decoy)) => {
                    self.stats.update_ciphers(None, reader.cipher_stats());
                    self.stats.record_decoys_received(1);
                    continue;
                }
                Ok(Some(Inbound::Message { message, wire_len })) => {
                    self.stats.update_ciphers(None, reader.cipher_stats());
                    self.stats.record_received(&message.command, wire_len);
                    return Ok(message);
                }
                Ok(None) => tokio::select! {
                    filled = reader.fill() => filled,
                    () = wait_for_close(&mut closed) => return Err(NodeError::Closed),
                },
                Err(e) => Err(e),
            };
            match step {
                Ok(true) => {}
                Ok(false) => {
                    self.remote_closed();
                    return Err(NodeError::Closed);
                }
                Err(e) => {
                    self.fail(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Returns an already-buffered message without waiting.
    ///
    /// `Ok(None)` means incomplete: nothing decodable is buffered, or
    /// another task is currently reading.
    ///
    /// # Errors
    /// Same as [`PeerConnection::receive`].
    pub fn try_receive(&self) -> Result<Option<NetMessage>> {
        let link = self.link()?;
        let Ok(mut reader) = link.reader.try_lock() else {
            return Ok(None);
        };
        loop {
            match reader.next_buffered() {
                Ok(Some(Inbound::Decoy)) => {
                    self.stats.update_ciphers(None, reader.cipher_stats());
                    self.stats.record_decoys_received(1);
                }
                Ok(Some(Inbound::Message { message, wire_len })) => {
                    self.stats.update_ciphers(None, reader.cipher_stats());
                    self.stats.record_received(&message.command, wire_len);
                    return Ok(Some(message));
                }
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.fail(&e);
                    return Err(e);
                }
            }
        }
    }

    async fn write_message(&self, command: &Command, payload: &[u8]) -> Result<()> {
        let wire_len = self
            .write_with(|writer| writer.encode_message(command, payload))
            .await?;
        self.stats.record_sent(command, wire_len);
        Ok(())
    }

    /// Encodes under the writer lock and writes, racing the close signal.
    async fn write_with<F>(&self, encode: F) -> Result<usize>
    where
        F: FnOnce(&mut FrameWriter) -> Result<BytesMut>,
    {
        let link = self.link()?;
        let mut closed = self.closed_tx.subscribe();
        if *closed.borrow() {
            return Err(NodeError::Closed);
        }
        let mut writer = link.writer.lock().await;

        let frame = match encode(&mut *writer) {
            Ok(frame) => {
                self.stats.update_ciphers(writer.cipher_stats(), None);
                frame
            }
            Err(e @ NodeError::Core(CoreError::MessageTooLarge { .. })) => return Err(e),
            Err(e) => {
                drop(writer);
                self.fail(&e);
                return Err(e);
            }
        };
        let written = tokio::select! {
            result = writer.write_frame(&frame) => result,
            () = wait_for_close(&mut closed) => return Err(NodeError::Closed),
        };
        drop(writer);

        if let Err(e) = written {
            self.fail(&e);
            return Err(e);
        }
        Ok(frame.len())
    }

    // ========================================
    // Accessors
    // ========================================

    fn link(&self) -> Result<&Link> {
        self.link
            .get()
            .ok_or_else(|| NodeError::invalid_state(format!("{} is not established", self.id)))
    }

    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address.
    #[must_use]
    pub const fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    /// Who dialed.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Negotiated transport, once established.
    #[must_use]
    pub fn version(&self) -> Option<TransportVersion> {
        self.link.get().map(|link| link.version)
    }

    /// How the transport was negotiated.
    #[must_use]
    pub fn negotiation_path(&self) -> Option<NegotiationPath> {
        self.link.get().map(|link| link.path)
    }

    /// Session id of a v2 connection.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.link.get().and_then(|link| link.session_id)
    }

    /// Traffic counters.
    #[must_use]
    pub const fn stats(&self) -> &TrafficStats {
        &self.stats
    }

    /// Builds the observable report.
    #[must_use]
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            addr: self.addr.clone(),
            direction: self.direction,
            transport_protocol_type: self.version().unwrap_or(TransportVersion::V1),
            session_id: self.session_id().map(|id| id.to_string()).unwrap_or_default(),
            connected_at: self.connected_at,
            bytes_sent_per_msg: self.stats.bytes_sent_per_msg(),
            bytes_recv_per_msg: self.stats.bytes_recv_per_msg(),
            decoys_sent: self.stats.decoys_sent(),
            decoys_received: self.stats.decoys_received(),
            last_send: self.stats.last_send(),
            last_recv: self.stats.last_recv(),
        }
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("direction", &self.direction)
            .field("state", &self.state())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

async fn wait_for_close(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::duplex;

    use crate::services::negotiator::Negotiator;
    use crate::services::policy::ConnectionPolicy;

    fn greeting(agent: &'static str) -> NetMessage {
        NetMessage::new(Command::greeting(), Bytes::from_static(agent.as_bytes()))
    }

    fn addr(s: &str) -> PeerAddr {
        s.parse().unwrap()
    }

    /// Negotiates and establishes both ends over an in-memory pipe.
    async fn connected_pair(advertise_v2: bool) -> (PeerConnection, PeerConnection) {
        let policy = ConnectionPolicy::default();
        let (a, b) = duplex(1 << 20);

        let listener_policy = policy.clone();
        let inbound = tokio::spawn(async move {
            let mut stream: BoxedStream = Box::new(b);
            let mut negotiator = Negotiator::new(&listener_policy, ConnectionId::new(2));
            let negotiated = negotiator.inbound(&mut stream).await.unwrap();
            (stream, negotiated)
        });

        let dialer = PeerConnection::new(
            ConnectionId::new(1),
            addr("10.0.0.2:8333"),
            Direction::Outbound,
            greeting("/dialer/"),
        );
        let mut stream: BoxedStream = Box::new(a);
        let mut negotiator = Negotiator::new(&policy, ConnectionId::new(1));
        let negotiated = negotiator.outbound(&mut stream, advertise_v2).await.unwrap();
        dialer.establish(stream, negotiated, policy.codec()).await.unwrap();

        let (stream, negotiated) = inbound.await.unwrap();
        let listener = PeerConnection::new(
            ConnectionId::new(2),
            addr("10.0.0.1:50000"),
            Direction::Inbound,
            greeting("/listener/"),
        );
        listener.establish(stream, negotiated, policy.codec()).await.unwrap();
        (dialer, listener)
    }

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;
        assert!(Handshaking.can_transition_to(Established));
        assert!(Established.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Established));
        assert!(!Established.can_transition_to(Handshaking));
        assert!(!Closed.can_transition_to(Closing));
    }

    #[tokio::test]
    async fn test_v2_exchange_and_greeting() {
        let (dialer, listener) = connected_pair(true).await;
        assert_eq!(dialer.version(), Some(TransportVersion::V2));
        assert_eq!(dialer.session_id(), listener.session_id());

        let hello = listener.receive().await.unwrap();
        assert_eq!(hello.command, Command::greeting());
        assert_eq!(&hello.payload[..], b"/dialer/");

        dialer
            .send(Command::new("ping").unwrap(), Bytes::from_static(b"12345678"))
            .await
            .unwrap();
        let ping = listener.receive().await.unwrap();
        assert_eq!(ping.command.as_str(), "ping");

        let info = dialer.info();
        assert_eq!(info.transport_protocol_type, TransportVersion::V2);
        assert_eq!(info.session_id.len(), 64);
        assert!(info.bytes_sent_per_msg.contains_key("ping"));

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["transport_protocol_type"], "v2");
        assert_eq!(json["direction"], "outbound");
    }

    #[tokio::test]
    async fn test_last_send_and_recv_marks() {
        let (dialer, listener) = connected_pair(true).await;

        // Greetings were flushed on establishment, nothing read yet
        assert!(dialer.info().last_send >= dialer.info().connected_at);
        assert_eq!(dialer.info().last_recv, 0);

        listener.receive().await.unwrap();
        let info = listener.info();
        assert!(info.last_recv >= info.connected_at);
        assert!(info.last_send >= info.connected_at);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["last_recv"], info.last_recv);
    }

    #[tokio::test]
    async fn test_v1_exchange_reports_empty_session() {
        let (dialer, listener) = connected_pair(false).await;
        assert_eq!(listener.version(), Some(TransportVersion::V1));
        assert_eq!(dialer.receive().await.unwrap().command, Command::greeting());
        assert!(dialer.info().session_id.is_empty());
        // 24-byte header + user agent
        assert_eq!(dialer.info().bytes_recv_per_msg["version"], 24 + 10);
    }

    #[tokio::test]
    async fn test_decoys_never_surface() {
        let (dialer, listener) = connected_pair(true).await;
        listener.receive().await.unwrap();

        dialer.send_decoy(b"block that never was").await.unwrap();
        dialer.send_decoy(&[]).await.unwrap();
        dialer.send(Command::new("block").unwrap(), Bytes::from_static(b"real")).await.unwrap();

        let message = listener.receive().await.unwrap();
        assert_eq!(message.command.as_str(), "block");
        assert_eq!(&message.payload[..], b"real");
        assert_eq!(listener.stats().decoys_received(), 2);
        assert_eq!(dialer.stats().decoys_sent(), 2);
        assert!(!listener.info().bytes_recv_per_msg.contains_key("decoy"));
    }

    #[tokio::test]
    async fn test_decoy_requires_v2() {
        let (dialer, _listener) = connected_pair(false).await;
        assert!(matches!(
            dialer.send_decoy(b"x").await,
            Err(NodeError::DecoyUnsupported)
        ));
    }

    #[tokio::test]
    async fn test_send_while_handshaking_is_queued() {
        let conn = PeerConnection::new(
            ConnectionId::new(7),
            addr("10.0.0.9:8333"),
            Direction::Outbound,
            greeting("/q/"),
        );
        conn.send(Command::new("ping").unwrap(), Bytes::new()).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Handshaking);
        assert_eq!(conn.pending.lock().len(), 2);
        assert!(conn.receive().await.unwrap_err().to_string().contains("not established"));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_receive() {
        let (dialer, _listener) = connected_pair(true).await;
        let dialer = std::sync::Arc::new(dialer);
        // Drain the greeting so the next receive blocks
        dialer.receive().await.unwrap();

        let reader = {
            let dialer = std::sync::Arc::clone(&dialer);
            tokio::spawn(async move { dialer.receive().await })
        };
        tokio::task::yield_now().await;
        dialer.close().await;

        assert!(matches!(reader.await.unwrap(), Err(NodeError::Closed)));
        assert_eq!(dialer.state(), ConnectionState::Closed);
        assert!(matches!(
            dialer.send(Command::new("ping").unwrap(), Bytes::new()).await,
            Err(NodeError::Closed)
        ));
        // Second close is a no-op
        dialer.close().await;
    }

    #[tokio::test]
    async fn test_peer_eof_closes() {
        let (dialer, listener) = connected_pair(false).await;
        dialer.close().await;
        listener.receive().await.unwrap(); // greeting
        assert!(matches!(listener.receive().await, Err(NodeError::Closed)));
        assert_eq!(listener.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_tampered_packet_fails_connection() {
        let policy = ConnectionPolicy::default();
        let (a, b) = duplex(1 << 20);

        let listener_policy = policy.clone();
        let raw = tokio::spawn(async move {
            let mut stream = b;
            let mut negotiator = Negotiator::new(&listener_policy, ConnectionId::new(2));
            let negotiated = negotiator.inbound(&mut stream).await.unwrap();
            (stream, negotiated)
        });

        let conn = PeerConnection::new(
            ConnectionId::new(1),
            addr("10.0.0.2:8333"),
            Direction::Outbound,
            greeting("/dialer/"),
        );
        let mut stream: BoxedStream = Box::new(a);
        let negotiated = Negotiator::new(&policy, ConnectionId::new(1))
            .outbound(&mut stream, true)
            .await
            .unwrap();
        conn.establish(stream, negotiated, policy.codec()).await.unwrap();

        let (mut raw_stream, negotiated) = raw.await.unwrap();
        let (mut sealer, _opener) = negotiated.session.unwrap().into_split();
        let envelope = encode_envelope(&Command::new("block").unwrap(), b"payload");
        let mut ciphertext = sealer.seal(&envelope, false).unwrap();
        ciphertext[5] ^= 0x01;
        let frame = policy.codec().encode_v2_packet(&ciphertext).unwrap();
        raw_stream.write_all(&frame).await.unwrap();

        let err = conn.receive().await.unwrap_err();
        assert!(matches!(err, NodeError::Core(CoreError::Authentication)));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
