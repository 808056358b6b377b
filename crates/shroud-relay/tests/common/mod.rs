//! In-memory collaborators for relay manager tests

#![allow(dead_code)]

use async_trait::async_trait;
use shroud_relay::{
    ChannelCreator, ChannelReservation, LocalPeer, PeerAddress, PeerConnection, PeerConnector,
    PeerId, PeerSocketAddress, RelayConfig, RelayError, RelayManager, RelayRpc, RelayServices,
    RelayType, Result, RoutingTable,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Peer address with ID bytes `[id; 32]` on 10.0.0.id
pub fn peer(id: u8) -> PeerAddress {
    PeerAddress::new(
        PeerId::from_bytes([id; 32]),
        PeerSocketAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, id)), 7000, 7001),
    )
}

/// The local, firewalled node
#[derive(Debug)]
pub struct TestNode {
    address: Mutex<PeerAddress>,
    shutdown: AtomicBool,
    publishes: AtomicUsize,
}

impl TestNode {
    fn new() -> Self {
        Self {
            address: Mutex::new(
                peer(200)
                    .change_firewalled_tcp(true)
                    .change_firewalled_udp(true),
            ),
            shutdown: AtomicBool::new(false),
            publishes: AtomicUsize::new(0),
        }
    }

    pub fn address(&self) -> PeerAddress {
        self.address.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl LocalPeer for TestNode {
    fn peer_address(&self) -> PeerAddress {
        self.address()
    }

    fn set_peer_address(&self, address: PeerAddress) {
        *self.address.lock().unwrap() = address;
        self.publishes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Routing table with a settable peer list
#[derive(Debug, Default)]
pub struct TestRouting {
    peers: Mutex<Vec<PeerAddress>>,
}

impl TestRouting {
    pub fn set_peers(&self, peers: Vec<PeerAddress>) {
        *self.peers.lock().unwrap() = peers;
    }
}

impl RoutingTable for TestRouting {
    fn all_known_peers(&self) -> Vec<PeerAddress> {
        self.peers.lock().unwrap().clone()
    }
}

/// Reserved channel capacity
#[derive(Debug, Default)]
pub struct TestCreator {
    shutdowns: AtomicUsize,
}

impl TestCreator {
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelCreator for TestCreator {
    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Reservation layer that can be told to fail
#[derive(Debug, Default)]
pub struct TestReservation {
    pub creator: Arc<TestCreator>,
    fail: AtomicBool,
    reservations: AtomicUsize,
}

impl TestReservation {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn reservations(&self) -> usize {
        self.reservations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelReservation for TestReservation {
    async fn reserve(&self, _min: usize, _max: usize) -> Result<Arc<dyn ChannelCreator>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::transport("no channels left"));
        }
        self.reservations.fetch_add(1, Ordering::SeqCst);
        Ok(self.creator.clone())
    }
}

/// Connection whose closure the test controls
#[derive(Debug)]
pub struct TestConnection {
    remote: PeerAddress,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    notify: Notify,
}

impl TestConnection {
    fn new(remote: PeerAddress) -> Self {
        Self {
            remote,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    /// Simulate the transport dropping the link
    pub fn drop_link(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for TestConnection {
    fn remote_peer(&self) -> &PeerAddress {
        &self.remote
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.drop_link();
        Ok(())
    }

    async fn closed(&self) {
        loop {
            let notified = self.notify.notified();
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// How a candidate answers a relay request
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Accepts immediately
    Accept,
    /// Accepts after a delay
    AcceptAfter(Duration),
    /// Declines the relay request
    Reject,
    /// Cannot be connected to
    Unreachable,
    /// The relay RPC panics
    Panic,
}

/// Simulated network: connector and relay RPC in one
#[derive(Debug, Default)]
pub struct TestNetwork {
    behaviors: Mutex<HashMap<PeerId, Behavior>>,
    connections: Mutex<HashMap<PeerId, Arc<TestConnection>>>,
    connects: Mutex<Vec<PeerId>>,
    handshakes: Mutex<Vec<(PeerId, RelayType, Option<String>)>>,
}

impl TestNetwork {
    pub fn set(&self, peer: &PeerAddress, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(peer.peer_id(), behavior);
    }

    fn behavior(&self, peer: &PeerAddress) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(&peer.peer_id())
            .copied()
            .unwrap_or(Behavior::Accept)
    }

    /// Peers a connection was attempted to, in order
    pub fn connects(&self) -> Vec<PeerId> {
        self.connects.lock().unwrap().clone()
    }

    pub fn handshakes(&self) -> Vec<(PeerId, RelayType, Option<String>)> {
        self.handshakes.lock().unwrap().clone()
    }

    /// Latest connection opened to `peer`
    pub fn connection(&self, peer: &PeerAddress) -> Arc<TestConnection> {
        self.connections
            .lock()
            .unwrap()
            .get(&peer.peer_id())
            .cloned()
            .expect("no connection to peer")
    }
}

#[async_trait]
impl PeerConnector for TestNetwork {
    async fn connect(&self, candidate: &PeerAddress) -> Result<Arc<dyn PeerConnection>> {
        self.connects.lock().unwrap().push(candidate.peer_id());
        if let Behavior::Unreachable = self.behavior(candidate) {
            return Err(RelayError::connect(candidate.peer_id(), "unreachable"));
        }

        let connection = Arc::new(TestConnection::new(candidate.clone()));
        self.connections
            .lock()
            .unwrap()
            .insert(candidate.peer_id(), connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl RelayRpc for TestNetwork {
    async fn setup_relay(
        &self,
        connection: Arc<dyn PeerConnection>,
        relay_type: RelayType,
        registration_id: Option<&str>,
    ) -> Result<Arc<dyn PeerConnection>> {
        let remote = connection.remote_peer().clone();
        self.handshakes.lock().unwrap().push((
            remote.peer_id(),
            relay_type,
            registration_id.map(str::to_owned),
        ));

        match self.behavior(&remote) {
            Behavior::Accept => Ok(connection),
            Behavior::AcceptAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(connection)
            }
            Behavior::Panic => panic!("relay rpc crashed for {remote}"),
            Behavior::Reject | Behavior::Unreachable => {
                connection.close().await?;
                Err(RelayError::rejected(remote.peer_id(), "relay request denied"))
            }
        }
    }
}

/// Manager wired to in-memory collaborators
pub struct Harness {
    pub node: Arc<TestNode>,
    pub routing: Arc<TestRouting>,
    pub reservation: Arc<TestReservation>,
    pub network: Arc<TestNetwork>,
    pub manager: RelayManager,
}

impl Harness {
    pub fn new(config: RelayConfig) -> Self {
        init_tracing();

        let node = Arc::new(TestNode::new());
        let routing = Arc::new(TestRouting::default());
        let reservation = Arc::new(TestReservation::default());
        let network = Arc::new(TestNetwork::default());

        let services = RelayServices {
            routing: routing.clone(),
            reservation: reservation.clone(),
            connector: network.clone(),
            rpc: network.clone(),
            local: node.clone(),
        };
        let manager = RelayManager::new(config, services).expect("valid config");

        Self {
            node,
            routing,
            reservation,
            network,
            manager,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }
}
