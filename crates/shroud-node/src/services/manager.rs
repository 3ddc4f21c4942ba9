// ============================================
// File: crates/shroud-node/src/services/manager.rs
// ============================================
//! # Connection Manager
//!
//! ## Creation Reason
//! Owns every live peer connection, enforces the inbound and outbound
//! slot limits and applies the dial policy.
//!
//! ## Main Functionality
//! - `accept`: Reserve an inbound slot, negotiate, register
//! - `dial`: Plan route and advertisement, connect, negotiate, register
//! - Per-connection reader task delivering messages on one mpsc queue
//! - Counts and per-connection reports for observability
//! - `broadcast_decoys`, `disconnect`, `shutdown`
//!
//! ## Connection Flow
//! ```text
//!   accept(stream) / dial(target)
//!        │
//!        ▼
//!   try_reserve(direction) ──► CapacityError (stream dropped)
//!        │
//!        ▼
//!   Negotiator ──► PeerConnection::establish ──► connections map
//!        │                                           │
//!        ▼                                           ▼
//!   failure: slot freed                      reader task ──► deliveries
//!                                                    │
//!                                       close / error: removed, slot freed
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The slot reservation moves into the reader task; it is released
//!   exactly when the connection leaves the map
//! - A connection is inserted only after negotiation, so every entry has
//!   a final transport version and `counts()` never sees half-open peers
//! - Insertion and the shutdown snapshot happen under the task lock; a
//!   handshake that finishes after `shutdown` is closed, not registered
//! - Finished reader tasks are collected on each registration
//!
//! ## Last Modified
//! v0.1.0 - Initial connection manager

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::{Rng, RngCore};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use shroud_common::{ConnectionId, Direction, PeerAddr, TransportVersion};
use shroud_core::{Command, NetMessage};
use shroud_transport::{BoxedStream, Dialer};

use crate::error::{NodeError, Result};
use crate::services::negotiator::Negotiator;
use crate::services::peer::{PeerConnection, PeerInfo};
use crate::services::policy::{ConnectionPolicy, DialHint};
use crate::services::slots::{ConnectionSlots, SlotReservation};

/// Capacity of the delivery queue.
const DELIVERY_QUEUE: usize = 1024;

/// A decoded application message and the connection it arrived on.
pub type Delivery = (ConnectionId, NetMessage);

/// Live connection counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionCounts {
    /// Inbound connections.
    pub num_inbound: usize,
    /// Outbound connections.
    pub num_outbound: usize,
    /// Connections on the encrypted transport.
    pub num_v2: usize,
}

impl ConnectionCounts {
    /// All connections.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.num_inbound + self.num_outbound
    }
}

// ============================================
// ConnectionManager
// ============================================

/// Owns the set of peer connections.
pub struct ConnectionManager {
    policy: Arc<ConnectionPolicy>,
    dialer: Arc<dyn Dialer>,
    slots: Arc<ConnectionSlots>,
    connections: DashMap<ConnectionId, Arc<PeerConnection>>,
    next_id: AtomicU64,
    delivery: mpsc::Sender<Delivery>,
    tasks: Mutex<JoinSet<()>>,
    shutting_down: AtomicBool,
}

impl ConnectionManager {
    /// Creates a manager and the queue its connections deliver into.
    #[must_use]
    pub fn new(
        policy: Arc<ConnectionPolicy>,
        dialer: Arc<dyn Dialer>,
    ) -> (Arc<Self>, mpsc::Receiver<Delivery>) {
        let (delivery, deliveries) = mpsc::channel(DELIVERY_QUEUE);
        let slots = ConnectionSlots::new(policy.max_inbound, policy.max_outbound);
        let manager = Arc::new(Self {
            policy,
            dialer,
            slots,
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            delivery,
            tasks: Mutex::new(JoinSet::new()),
            shutting_down: AtomicBool::new(false),
        });
        (manager, deliveries)
    }

    // ========================================
    // Connection setup
    // ========================================

    /// Takes an accepted stream.
    ///
    /// # Errors
    /// - `Capacity` if no inbound slot is free; the stream is closed and
    ///   existing connections are untouched
    /// - Negotiation errors; the stream is closed
    pub async fn accept(
        self: &Arc<Self>,
        stream: BoxedStream,
        addr: PeerAddr,
    ) -> Result<Arc<PeerConnection>> {
        self.ensure_running()?;
        let reservation = match self.slots.try_reserve(Direction::Inbound) {
            Ok(reservation) => reservation,
            Err(e) => {
                drop(stream);
                info!(%addr, error = %e, "Inbound connection refused");
                return Err(e);
            }
        };
        self.open_connection(stream, addr, reservation, None).await
    }

    /// Dials `target` under the connection policy.
    ///
    /// # Errors
    /// - `Policy` if the policy forbids this dial
    /// - `Capacity` if no outbound slot is free
    /// - `Transport` if the connection or proxy tunnel fails
    /// - Negotiation errors
    pub async fn dial(self: &Arc<Self>, target: &PeerAddr, hint: DialHint) -> Result<Arc<PeerConnection>> {
        self.ensure_running()?;
        let plan = self.policy.plan(target, hint)?;
        let reservation = self.slots.try_reserve(Direction::Outbound)?;

        debug!(%target, route = %plan.route, advertise_v2 = plan.advertise_v2, "Dialing peer");
        let stream = self.dialer.connect(target, &plan.route).await?;
        self.open_connection(stream, target.clone(), reservation, Some(plan.advertise_v2))
            .await
    }

    /// Negotiates, establishes and registers one connection.
    ///
    /// `advertise_v2` is `Some` for outbound connections.
    async fn open_connection(
        self: &Arc<Self>,
        mut stream: BoxedStream,
        addr: PeerAddr,
        reservation: SlotReservation,
        advertise_v2: Option<bool>,
    ) -> Result<Arc<PeerConnection>> {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let direction = reservation.direction();
        let greeting = NetMessage::new(Command::greeting(), self.policy.user_agent.clone().into_bytes());
        let conn = Arc::new(PeerConnection::new(id, addr.clone(), direction, greeting));

        let mut negotiator = Negotiator::new(&self.policy, id);
        let negotiated = match advertise_v2 {
            Some(advertise) => negotiator.outbound(&mut stream, advertise).await,
            None => negotiator.inbound(&mut stream).await,
        };
        let negotiated = match negotiated {
            Ok(negotiated) => negotiated,
            Err(e) => {
                conn.fail(&e);
                return Err(e);
            }
        };
        if advertise_v2.is_some() {
            self.policy.record_outcome(&addr, negotiated.path);
        }

        conn.establish(stream, negotiated, self.policy.codec()).await?;

        // Registration and `shutdown` both hold the task lock, so a
        // connection is either in shutdown's snapshot or refused here.
        let registered = {
            let mut tasks = self.tasks.lock();
            if self.is_shutting_down() {
                false
            } else {
                self.connections.insert(id, Arc::clone(&conn));
                while tasks.try_join_next().is_some() {}
                tasks.spawn(self.reader_task(Arc::clone(&conn), reservation));
                true
            }
        };
        if !registered {
            conn.close().await;
            return Err(NodeError::ShuttingDown);
        }
        info!(
            conn_id = %id,
            %addr,
            %direction,
            version = ?conn.version(),
            inbound = self.slots.used(Direction::Inbound),
            outbound = self.slots.used(Direction::Outbound),
            "Peer registered"
        );
        Ok(conn)
    }

    /// Delivers messages until the connection ends, then unregisters it.
    fn reader_task(
        self: &Arc<Self>,
        conn: Arc<PeerConnection>,
        reservation: SlotReservation,
    ) -> impl Future<Output = ()> + Send + 'static {
        let manager = Arc::clone(self);
        let delivery = self.delivery.clone();

        async move {
            let id = conn.id();
            loop {
                match conn.receive().await {
                    Ok(message) => {
                        if delivery.send((id, message)).await.is_err() {
                            debug!(conn_id = %id, "Delivery queue closed");
                            break;
                        }
                    }
                    Err(NodeError::Closed) => break,
                    Err(e) => {
                        debug!(conn_id = %id, error = %e, "Reader stopped");
                        break;
                    }
                }
            }
            conn.close().await;
            manager.connections.remove(&id);
            drop(reservation);
            debug!(conn_id = %id, "Peer unregistered");
        }
    }

    // ========================================
    // Operations on live connections
    // ========================================

    /// Closes one connection.
    ///
    /// # Errors
    /// `ConnectionNotFound` for an unknown id.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<()> {
        let conn = self.get(id).ok_or(NodeError::ConnectionNotFound(id))?;
        info!(conn_id = %id, addr = %conn.addr(), "Disconnecting peer");
        conn.close().await;
        Ok(())
    }

    /// Looks up a connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<PeerConnection>> {
        self.connections.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// Report for one connection.
    #[must_use]
    pub fn peer_info(&self, id: ConnectionId) -> Option<PeerInfo> {
        self.connections.get(&id).map(|r| r.value().info())
    }

    /// Reports for all connections, ordered by id.
    #[must_use]
    pub fn all_peer_info(&self) -> Vec<PeerInfo> {
        let mut infos: Vec<PeerInfo> = self.connections.iter().map(|r| r.value().info()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// All live connections.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<PeerConnection>> {
        self.connections.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Counts taken in a single pass over the connection set.
    #[must_use]
    pub fn counts(&self) -> ConnectionCounts {
        self.connections
            .iter()
            .fold(ConnectionCounts::default(), |mut counts, entry| {
                let conn = entry.value();
                match conn.direction() {
                    Direction::Inbound => counts.num_inbound += 1,
                    Direction::Outbound => counts.num_outbound += 1,
                }
                if conn.version() == Some(TransportVersion::V2) {
                    counts.num_v2 += 1;
                }
                counts
            })
    }

    /// Live inbound connections.
    #[must_use]
    pub fn num_inbound(&self) -> usize {
        self.counts().num_inbound
    }

    /// Live outbound connections.
    #[must_use]
    pub fn num_outbound(&self) -> usize {
        self.counts().num_outbound
    }

    /// Slot tracker shared with the connections.
    #[must_use]
    pub fn slots(&self) -> &ConnectionSlots {
        &self.slots
    }

    /// The policy this manager applies.
    #[must_use]
    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    /// Sends one random decoy of up to `max_len` bytes to every v2 peer.
    ///
    /// Returns how many decoys were sent.
    pub async fn broadcast_decoys(&self, max_len: usize) -> usize {
        let batch: Vec<(Arc<PeerConnection>, Vec<u8>)> = {
            let mut rng = rand::thread_rng();
            self.connections
                .iter()
                .filter(|r| r.value().version() == Some(TransportVersion::V2))
                .map(|r| {
                    let mut contents = vec![0u8; rng.gen_range(0..=max_len)];
                    rng.fill_bytes(&mut contents);
                    (Arc::clone(r.value()), contents)
                })
                .collect()
        };

        let mut sent = 0;
        for (conn, contents) in batch {
            match conn.send_decoy(&contents).await {
                Ok(()) => sent += 1,
                Err(e) => debug!(conn_id = %conn.id(), error = %e, "Decoy not sent"),
            }
        }
        sent
    }

    // ========================================
    // Shutdown
    // ========================================

    fn ensure_running(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(NodeError::ShuttingDown);
        }
        Ok(())
    }

    /// Reader tasks held for joining, finished ones included until the
    /// next registration collects them.
    #[must_use]
    pub fn reader_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Closes every connection and waits for the reader tasks.
    pub async fn shutdown(&self, timeout: Duration) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let (connections, mut tasks) = {
            let mut tasks = self.tasks.lock();
            (self.connections(), std::mem::take(&mut *tasks))
        };
        info!(count = connections.len(), "Closing all peer connections");
        for conn in connections {
            conn.close().await;
        }

        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Reader task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("Reader tasks did not finish in time, aborting");
            tasks.abort_all();
        }
        info!("Connection manager stopped");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .field("slots", &self.slots)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_transport::MemoryNetwork;

    fn policy(max_inbound: usize, max_outbound: usize) -> Arc<ConnectionPolicy> {
        let mut policy = ConnectionPolicy::default();
        policy.max_inbound = max_inbound;
        policy.max_outbound = max_outbound;
        policy.handshake_timeout = Duration::from_secs(5);
        Arc::new(policy)
    }

    fn addr(s: &str) -> PeerAddr {
        s.parse().unwrap()
    }

    /// Starts a manager accepting on `listen` in the background.
    fn listening_manager(
        network: &MemoryNetwork,
        listen: &str,
        policy: Arc<ConnectionPolicy>,
    ) -> (Arc<ConnectionManager>, mpsc::Receiver<Delivery>) {
        let listener = network.bind(addr(listen)).unwrap();
        let dialer = Arc::new(network.dialer(addr(listen).socket_addr().unwrap().ip()));
        let (manager, deliveries) = ConnectionManager::new(policy, dialer);
        let acceptor = Arc::clone(&manager);
        tokio::spawn(async move {
            while let Ok((stream, remote)) = listener.accept_raw().await {
                let manager = Arc::clone(&acceptor);
                tokio::spawn(async move {
                    let _ = manager.accept(Box::new(stream), remote).await;
                });
            }
        });
        (manager, deliveries)
    }

    #[tokio::test]
    async fn test_dial_registers_and_delivers_greeting() {
        let network = MemoryNetwork::new();
        let (_server, mut server_rx) = listening_manager(&network, "10.0.0.1:8333", policy(4, 4));
        let (client, _client_rx) = ConnectionManager::new(
            policy(4, 4),
            Arc::new(network.dialer("10.0.0.2".parse().unwrap())),
        );

        let conn = client.dial(&addr("10.0.0.1:8333"), DialHint::Auto).await.unwrap();
        assert_eq!(conn.version(), Some(TransportVersion::V2));
        assert_eq!(conn.id().to_string(), "peer-1");

        let (from, greeting) = server_rx.recv().await.unwrap();
        assert_eq!(greeting.command, Command::greeting());
        assert_eq!(from.as_u64(), 1);

        let counts = client.counts();
        assert_eq!(counts.num_outbound, 1);
        assert_eq!(counts.num_inbound, 0);
        assert_eq!(counts.num_v2, 1);
        assert_eq!(client.all_peer_info().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_releases_slot() {
        let network = MemoryNetwork::new();
        let (_server, _rx) = listening_manager(&network, "10.0.0.1:8333", policy(4, 4));
        let (client, _client_rx) = ConnectionManager::new(
            policy(4, 1),
            Arc::new(network.dialer("10.0.0.2".parse().unwrap())),
        );

        let conn = client.dial(&addr("10.0.0.1:8333"), DialHint::Auto).await.unwrap();
        let err = client.dial(&addr("10.0.0.1:8333"), DialHint::Auto).await.unwrap_err();
        assert!(err.is_capacity_error());

        client.disconnect(conn.id()).await.unwrap();
        for _ in 0..100 {
            if client.slots().used(Direction::Outbound) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(client.slots().used(Direction::Outbound), 0);
        assert!(client.get(conn.id()).is_none());
        assert!(matches!(
            client.disconnect(conn.id()).await,
            Err(NodeError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_refused_connection_frees_slot() {
        let network = MemoryNetwork::new();
        let (client, _rx) = ConnectionManager::new(
            policy(1, 1),
            Arc::new(network.dialer("10.0.0.2".parse().unwrap())),
        );
        let err = client.dial(&addr("10.0.0.9:8333"), DialHint::Auto).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(_)));
        assert_eq!(client.slots().used(Direction::Outbound), 0);
    }

    #[tokio::test]
    async fn test_onion_without_proxy_is_policy_error() {
        let network = MemoryNetwork::new();
        let (client, _rx) = ConnectionManager::new(
            policy(1, 1),
            Arc::new(network.dialer("10.0.0.2".parse().unwrap())),
        );
        let onion = addr("expyuzz4wqqyqhjn.onion:8333");
        let err = client.dial(&onion, DialHint::Auto).await.unwrap_err();
        assert!(matches!(err, NodeError::Policy { .. }));
    }

    #[tokio::test]
    async fn test_broadcast_decoys_and_shutdown() {
        let network = MemoryNetwork::new();
        let (server, _rx) = listening_manager(&network, "10.0.0.1:8333", policy(4, 4));
        let (client, _client_rx) = ConnectionManager::new(
            policy(4, 4),
            Arc::new(network.dialer("10.0.0.2".parse().unwrap())),
        );
        let conn = client.dial(&addr("10.0.0.1:8333"), DialHint::Auto).await.unwrap();
        assert_eq!(client.broadcast_decoys(64).await, 1);
        assert_eq!(conn.stats().decoys_sent(), 1);

        client.shutdown(Duration::from_secs(2)).await;
        assert!(client.is_shutting_down());
        assert_eq!(client.counts().total(), 0);
        assert!(matches!(
            client.dial(&addr("10.0.0.1:8333"), DialHint::Auto).await,
            Err(NodeError::ShuttingDown)
        ));
        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_reader_tasks_are_reaped() {
        let network = MemoryNetwork::new();
        let (_server, _rx) = listening_manager(&network, "10.0.0.1:8333", policy(4, 4));
        let (client, _client_rx) = ConnectionManager::new(
            policy(4, 1),
            Arc::new(network.dialer("10.0.0.2".parse().unwrap())),
        );

        for _ in 0..20 {
            let conn = client.dial(&addr("10.0.0.1:8333"), DialHint::Auto).await.unwrap();
            client.disconnect(conn.id()).await.unwrap();
            for _ in 0..100 {
                if client.slots().used(Direction::Outbound) == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(client.slots().used(Direction::Outbound), 0);
        }

        // The last reader, and at most one still unwinding at the final registration
        assert!(client.reader_tasks() <= 2, "{} reader tasks held", client.reader_tasks());
    }

    #[tokio::test]
    async fn test_dial_finishing_after_shutdown_is_not_registered() {
        let network = MemoryNetwork::new();
        let listener = network.bind(addr("10.0.0.1:8333")).unwrap();
        let server_policy = policy(4, 4);
        let (client, _rx) = ConnectionManager::new(
            policy(4, 4),
            Arc::new(network.dialer("10.0.0.2".parse().unwrap())),
        );

        let dialing = Arc::clone(&client);
        let dial = tokio::spawn(async move {
            dialing.dial(&addr("10.0.0.1:8333"), DialHint::Auto).await
        });
        let (mut raw, _remote) = listener.accept_raw().await.unwrap();

        // The dial is mid-handshake when shutdown starts
        client.shutdown(Duration::from_secs(1)).await;
        let mut negotiator = Negotiator::new(&server_policy, ConnectionId::new(9));
        negotiator.inbound(&mut raw).await.unwrap();

        let result = dial.await.unwrap();
        assert!(matches!(result, Err(NodeError::ShuttingDown)), "unexpected: {result:?}");
        assert!(client.connections().is_empty());
        assert_eq!(client.reader_tasks(), 0);
        assert_eq!(client.slots().used(Direction::Outbound), 0);
    }
}
