//! Shared test helpers for shroud-node integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use shroud_common::{ConnectionId, PeerAddr};
use shroud_core::{Command, NetMessage};
use shroud_node::services::{ConnectionManager, ConnectionPolicy, Delivery, PeerConnection};
use shroud_transport::{socks5, MemoryNetwork};

/// How long a test waits for anything to happen.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// SOCKS5 success reply with an all-zero IPv4 bound address.
const SOCKS_OK: [u8; 10] = [5, 0, 0, 1, 0, 0, 0, 0, 0, 0];

/// SOCKS5 "host unreachable" reply.
const SOCKS_UNREACHABLE: [u8; 10] = [5, 4, 0, 1, 0, 0, 0, 0, 0, 0];

pub fn addr(s: &str) -> PeerAddr {
    s.parse().unwrap()
}

/// Default policy with a test-sized handshake timeout.
pub fn policy() -> ConnectionPolicy {
    let mut policy = ConnectionPolicy::default();
    policy.handshake_timeout = TEST_TIMEOUT;
    policy
}

/// A node that only speaks v1.
pub fn v1_only() -> ConnectionPolicy {
    let mut policy = policy();
    policy.v2_enabled = false;
    policy
}

pub fn command(name: &str) -> Command {
    Command::new(name).unwrap()
}

/// A connection manager plus the queue it delivers into.
pub struct TestNode {
    pub manager: Arc<ConnectionManager>,
    pub deliveries: mpsc::Receiver<Delivery>,
    pub addr: PeerAddr,
}

impl TestNode {
    /// Next delivered message, failing the test after [`TEST_TIMEOUT`].
    pub async fn next_message(&mut self) -> (ConnectionId, NetMessage) {
        tokio::time::timeout(TEST_TIMEOUT, self.deliveries.recv())
            .await
            .expect("timed out waiting for a delivery")
            .expect("delivery queue closed")
    }

    /// Asserts nothing else is delivered for a short while.
    pub async fn expect_silence(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(200), self.deliveries.recv()).await;
        assert!(next.is_err(), "unexpected delivery: {next:?}");
    }

    /// The only live connection.
    pub fn single_connection(&self) -> Arc<PeerConnection> {
        let connections = self.manager.connections();
        assert_eq!(connections.len(), 1, "expected exactly one connection");
        Arc::clone(&connections[0])
    }
}

/// A node listening on `listen` and accepting in the background.
pub fn listening_node(network: &MemoryNetwork, listen: &str, policy: ConnectionPolicy) -> TestNode {
    let listen = addr(listen);
    let listener = network.bind(listen.clone()).unwrap();
    let ip = listen.socket_addr().map_or_else(|| "10.255.0.1".parse().unwrap(), |a| a.ip());
    let (manager, deliveries) =
        ConnectionManager::new(Arc::new(policy), Arc::new(network.dialer(ip)));

    let acceptor = Arc::clone(&manager);
    tokio::spawn(async move {
        while let Ok((stream, remote)) = listener.accept_raw().await {
            let manager = Arc::clone(&acceptor);
            tokio::spawn(async move {
                let _ = manager.accept(Box::new(stream), remote).await;
            });
        }
    });

    TestNode {
        manager,
        deliveries,
        addr: listen,
    }
}

/// A node that only dials, from `ip`.
pub fn dialing_node(network: &MemoryNetwork, ip: &str, policy: ConnectionPolicy) -> TestNode {
    let ip = ip.parse().unwrap();
    let (manager, deliveries) =
        ConnectionManager::new(Arc::new(policy), Arc::new(network.dialer(ip)));
    TestNode {
        manager,
        deliveries,
        addr: PeerAddr::Ip(std::net::SocketAddr::new(ip, 0)),
    }
}

/// Polls `condition` until it holds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================
// Fake SOCKS5 proxy
// ============================================

/// A SOCKS5 proxy on the in-memory network that records every target.
pub struct FakeSocksProxy {
    pub addr: PeerAddr,
    pub targets: Arc<Mutex<Vec<PeerAddr>>>,
}

impl FakeSocksProxy {
    pub fn spawn(network: &MemoryNetwork, listen: &str) -> Self {
        let listen = addr(listen);
        let listener = network.bind(listen.clone()).unwrap();
        let targets = Arc::new(Mutex::new(Vec::new()));

        let network = network.clone();
        let recorded = Arc::clone(&targets);
        let proxy_addr = listen.clone();
        tokio::spawn(async move {
            while let Ok((client, _)) = listener.accept_raw().await {
                tokio::spawn(relay(
                    network.clone(),
                    proxy_addr.clone(),
                    client,
                    Arc::clone(&recorded),
                ));
            }
        });

        Self {
            addr: listen,
            targets,
        }
    }

    pub fn targets(&self) -> Vec<PeerAddr> {
        self.targets.lock().clone()
    }
}

async fn relay(
    network: MemoryNetwork,
    proxy_addr: PeerAddr,
    mut client: DuplexStream,
    targets: Arc<Mutex<Vec<PeerAddr>>>,
) {
    let mut greeting = [0u8; 3];
    client.read_exact(&mut greeting).await.unwrap();
    assert_eq!(greeting, [5, 1, 0]);
    client.write_all(&[5, 0]).await.unwrap();

    let mut head = [0u8; 4];
    client.read_exact(&mut head).await.unwrap();
    let mut body = vec![head[3]];
    let remaining = match head[3] {
        1 => 4 + 2,
        4 => 16 + 2,
        _ => {
            let len = client.read_u8().await.unwrap();
            body.push(len);
            usize::from(len) + 2
        }
    };
    let mut rest = vec![0u8; remaining];
    client.read_exact(&mut rest).await.unwrap();
    body.extend_from_slice(&rest);

    let target = socks5::parse_destination(&body).unwrap();
    targets.lock().push(target.clone());

    match network.connect_raw(proxy_addr, &target).await {
        Ok(mut upstream) => {
            client.write_all(&SOCKS_OK).await.unwrap();
            let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
        }
        Err(_) => {
            let _ = client.write_all(&SOCKS_UNREACHABLE).await;
        }
    }
}
