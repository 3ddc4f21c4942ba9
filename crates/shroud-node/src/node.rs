// ============================================
// File: crates/shroud-node/src/node.rs
// ============================================
//! # Node Orchestrator
//!
//! ## Creation Reason
//! Wires configuration, policy, sockets and the connection manager into
//! a running node and owns its background tasks.
//!
//! ## Main Functionality
//! - `Node`: Lifecycle of a running node
//! - Accept loop feeding `ConnectionManager::accept`
//! - `addnode` dialing with periodic retry
//! - Optional decoy broadcast task
//! - Periodic connection summary log
//! - Graceful shutdown on Ctrl+C or `Node::shutdown`
//!
//! ## Node Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Node                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌──────────┐ │
//! │  │ Accept     │ │ Addnode    │ │ Decoy      │ │ Summary  │ │
//! │  │ Task       │ │ Task       │ │ Task       │ │ Task     │ │
//! │  └─────┬──────┘ └─────┬──────┘ └─────┬──────┘ └────┬─────┘ │
//! │        │              │              │             │       │
//! │        ▼              ▼              ▼             ▼       │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │               ConnectionManager                      │   │
//! │  └──────────────────────────┬──────────────────────────┘   │
//! │                             ▼                               │
//! │                   Delivery Task (deliveries)                │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Tasks subscribe to the shutdown broadcast when spawned
//! - Deliveries are logged unless a caller took the queue first with
//!   `take_deliveries`
//!
//! ## Last Modified
//! v0.1.0 - Initial node orchestrator

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use shroud_transport::{Acceptor, Dialer, TcpAcceptor, TcpDialer};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::services::{ConnectionManager, ConnectionPolicy, Delivery, DialHint};

/// Delay between `addnode` attempts.
const ADDNODE_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Back-off after a failed accept.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ============================================
// Node
// ============================================

/// A running shroud node.
///
/// # Lifecycle
/// 1. Create with `Node::new(config)`
/// 2. Start with `node.run().await`
/// 3. Shutdown via `node.shutdown()` or Ctrl+C
pub struct Node {
    /// Node configuration.
    config: NodeConfig,
    /// Owner of all peer connections.
    manager: Arc<ConnectionManager>,
    /// Delivery queue until a task or caller takes it.
    deliveries: Mutex<Option<mpsc::Receiver<Delivery>>>,
    /// Shutdown flag.
    shutdown: Arc<AtomicBool>,
    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,
}

impl Node {
    /// Creates a node that dials over TCP.
    ///
    /// # Errors
    /// `ConfigInvalid` if the configuration does not validate.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let dialer = Arc::new(TcpDialer::new(config.transport.connect_timeout()));
        Self::with_dialer(config, dialer)
    }

    /// Creates a node with a custom dialer.
    ///
    /// # Errors
    /// `ConfigInvalid` if the configuration does not validate.
    pub fn with_dialer(config: NodeConfig, dialer: Arc<dyn Dialer>) -> Result<Self> {
        config.validate()?;
        let policy = Arc::new(ConnectionPolicy::from_config(&config)?);
        let (manager, deliveries) = ConnectionManager::new(policy, dialer);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            manager,
            deliveries: Mutex::new(Some(deliveries)),
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        })
    }

    /// Connection manager of this node.
    #[must_use]
    pub const fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Node configuration.
    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Takes the delivery queue; `None` if already taken.
    pub fn take_deliveries(&self) -> Option<mpsc::Receiver<Delivery>> {
        self.deliveries.lock().take()
    }

    /// Binds the TCP listener (when enabled) and runs until shutdown.
    ///
    /// # Errors
    /// `StartupFailed` if the listener cannot be bound.
    pub async fn run(&self) -> Result<()> {
        let acceptor: Option<Arc<dyn Acceptor>> = if self.config.network.listen {
            let listen_addr = self.config.network.listen_addr;
            let acceptor = TcpAcceptor::bind_addr(listen_addr)
                .await
                .map_err(|e| NodeError::startup_failed(format!("TCP bind failed: {}", e)))?;
            info!("TCP listener bound on {}", listen_addr);
            let acceptor: Arc<dyn Acceptor> = Arc::new(acceptor);
            Some(acceptor)
        } else {
            info!("Inbound connections disabled");
            None
        };
        self.serve(acceptor).await
    }

    /// Runs the node's tasks over `acceptor` until shutdown.
    ///
    /// # Errors
    /// Currently infallible once started; kept fallible for callers.
    pub async fn serve(&self, acceptor: Option<Arc<dyn Acceptor>>) -> Result<()> {
        info!("Starting shroud node v{}", env!("CARGO_PKG_VERSION"));
        let policy = self.manager.policy();
        info!(
            v2_enabled = policy.v2_enabled,
            v2_only_clearnet = policy.v2_only_clearnet,
            strategy = policy.strategy_name(),
            max_inbound = policy.max_inbound,
            max_outbound = policy.max_outbound,
            "Connection policy"
        );

        let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();

        if let Some(acceptor) = acceptor {
            info!("Accepting peers on {}", acceptor.local_addr());
            tasks.push(("accept", self.spawn_accept_task(acceptor)));
        }
        if !self.config.network.addnode.is_empty() {
            tasks.push(("addnode", self.spawn_addnode_task()));
        }
        if self.config.transport.decoy_interval_secs > 0 {
            tasks.push(("decoy", self.spawn_decoy_task()));
        }
        tasks.push(("summary", self.spawn_summary_task()));
        if let Some(deliveries) = self.take_deliveries() {
            tasks.push(("delivery", self.spawn_delivery_task(deliveries)));
        }

        info!("Node started successfully");

        self.wait_for_shutdown().await;

        info!("Shutting down node...");
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let drain_timeout = Duration::from_secs(self.config.limits.shutdown_timeout_secs);
        for (name, task) in tasks {
            match tokio::time::timeout(drain_timeout, task).await {
                Ok(Ok(())) => debug!("Task '{}' completed", name),
                Ok(Err(e)) => warn!("Task '{}' failed: {}", name, e),
                Err(_) => warn!("Task '{}' timed out during shutdown", name),
            }
        }

        self.manager.shutdown(drain_timeout).await;

        info!("Node shutdown complete");
        Ok(())
    }

    /// Spawns the accept loop.
    fn spawn_accept_task(&self, acceptor: Arc<dyn Acceptor>) -> JoinHandle<()> {
        let manager = Arc::clone(&self.manager);
        let shutdown = Arc::clone(&self.shutdown);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Accept task received shutdown signal");
                        break;
                    }
                    result = acceptor.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                if shutdown.load(Ordering::SeqCst) {
                                    break;
                                }
                                let manager = Arc::clone(&manager);
                                tokio::spawn(async move {
                                    if let Err(e) = manager.accept(stream, addr.clone()).await {
                                        debug!(%addr, error = %e, "Inbound connection not established");
                                    }
                                });
                            }
                            Err(e) => {
                                if !shutdown.load(Ordering::SeqCst) {
                                    error!("Accept error: {}", e);
                                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                                }
                            }
                        }
                    }
                }
            }

            debug!("Accept task exiting");
        })
    }

    /// Spawns the task that keeps `addnode` peers connected.
    fn spawn_addnode_task(&self) -> JoinHandle<()> {
        let manager = Arc::clone(&self.manager);
        let targets = self.config.network.addnode.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(ADDNODE_RETRY_INTERVAL);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Addnode task received shutdown signal");
                        break;
                    }
                    _ = interval_timer.tick() => {
                        for target in &targets {
                            let connected = manager
                                .connections()
                                .iter()
                                .any(|conn| conn.addr() == target);
                            if connected {
                                continue;
                            }
                            match manager.dial(target, DialHint::Auto).await {
                                Ok(conn) => info!(
                                    conn_id = %conn.id(),
                                    %target,
                                    version = ?conn.version(),
                                    "Connected to addnode peer"
                                ),
                                Err(e) => warn!(%target, error = %e, "Addnode dial failed"),
                            }
                        }
                    }
                }
            }

            debug!("Addnode task exiting");
        })
    }

    /// Spawns the periodic decoy broadcast.
    fn spawn_decoy_task(&self) -> JoinHandle<()> {
        let manager = Arc::clone(&self.manager);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = Duration::from_secs(self.config.transport.decoy_interval_secs);
        let max_len = self.config.transport.max_decoy_len;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Decoy task received shutdown signal");
                        break;
                    }
                    _ = interval_timer.tick() => {
                        let sent = manager.broadcast_decoys(max_len).await;
                        trace!(sent, "Decoy round complete");
                    }
                }
            }

            debug!("Decoy task exiting");
        })
    }

    /// Spawns the periodic connection summary.
    fn spawn_summary_task(&self) -> JoinHandle<()> {
        let manager = Arc::clone(&self.manager);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = Duration::from_secs(self.config.limits.summary_interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Summary task received shutdown signal");
                        break;
                    }
                    _ = interval_timer.tick() => {
                        let counts = manager.counts();
                        info!(
                            inbound = counts.num_inbound,
                            outbound = counts.num_outbound,
                            v2 = counts.num_v2,
                            "Connection summary"
                        );
                        for peer in manager.all_peer_info() {
                            debug!(
                                conn_id = %peer.id,
                                addr = %peer.addr,
                                direction = %peer.direction,
                                version = %peer.transport_protocol_type,
                                decoys_received = peer.decoys_received,
                                "Peer"
                            );
                        }
                    }
                }
            }

            debug!("Summary task exiting");
        })
    }

    /// Spawns the consumer of delivered messages.
    fn spawn_delivery_task(&self, mut deliveries: mpsc::Receiver<Delivery>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Delivery task received shutdown signal");
                        break;
                    }
                    delivery = deliveries.recv() => {
                        let Some((conn_id, message)) = delivery else {
                            break;
                        };
                        debug!(
                            %conn_id,
                            command = message.command.as_str(),
                            len = message.payload.len(),
                            "Message received"
                        );
                    }
                }
            }

            debug!("Delivery task exiting");
        })
    }

    /// Waits for shutdown signal (Ctrl+C or programmatic).
    async fn wait_for_shutdown(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }

        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    let _ = shutdown_rx.recv().await;
                }
            },
            _ = shutdown_rx.recv() => info!("Received shutdown signal"),
        }
    }

    /// Triggers node shutdown programmatically.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("listen_addr", &self.config.network.listen_addr)
            .field("manager", &self.manager)
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_common::PeerAddr;
    use shroud_transport::MemoryNetwork;

    fn config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.limits.summary_interval_secs = 1;
        config.limits.shutdown_timeout_secs = 2;
        config
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.transport.rekey_interval = 0;
        assert!(Node::new(config).unwrap_err().is_config_error());
    }

    #[tokio::test]
    async fn test_take_deliveries_once() {
        let node = Node::new(config()).unwrap();
        assert!(node.take_deliveries().is_some());
        assert!(node.take_deliveries().is_none());
    }

    #[tokio::test]
    async fn test_addnode_connects_and_shutdown_drains() {
        let network = MemoryNetwork::new();
        let listen: PeerAddr = "10.0.0.1:8333".parse().unwrap();

        let server = Arc::new(
            Node::with_dialer(config(), Arc::new(network.dialer("10.0.0.1".parse().unwrap())))
                .unwrap(),
        );
        let listener: Arc<dyn Acceptor> = Arc::new(network.bind(listen.clone()).unwrap());
        let server_task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(Some(listener)).await })
        };

        let mut client_config = config();
        client_config.network.addnode = vec![listen];
        client_config.transport.decoy_interval_secs = 1;
        let client = Arc::new(
            Node::with_dialer(client_config, Arc::new(network.dialer("10.0.0.2".parse().unwrap())))
                .unwrap(),
        );
        let client_task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.serve(None).await })
        };

        for _ in 0..200 {
            if server.manager().num_inbound() == 1 && client.manager().num_outbound() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.manager().num_inbound(), 1);
        assert_eq!(client.manager().num_outbound(), 1);

        client.shutdown();
        server.shutdown();
        client_task.await.unwrap().unwrap();
        server_task.await.unwrap().unwrap();
        assert_eq!(client.manager().counts().total(), 0);
    }
}
