//! Peer addressing types
//!
//! A [`PeerAddress`] identifies a peer by its [`PeerId`] and carries the
//! reachability information other peers need: the direct socket, the
//! firewall flags, and (for unreachable peers) the relay sockets through
//! which it can be contacted. Equality and hashing only consider the peer
//! identity, so an address with updated flags still refers to the same peer.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

/// Maximum number of relay sockets an advertised address can carry
pub const MAX_RELAYS: usize = 5;

/// 256-bit peer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Create a peer ID from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Socket triple advertised for a peer (IP, TCP port, UDP port)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerSocketAddress {
    /// IP address
    pub ip: IpAddr,
    /// TCP port
    pub tcp_port: u16,
    /// UDP port
    pub udp_port: u16,
}

impl PeerSocketAddress {
    /// Create a new socket triple
    #[must_use]
    pub const fn new(ip: IpAddr, tcp_port: u16, udp_port: u16) -> Self {
        Self {
            ip,
            tcp_port,
            udp_port,
        }
    }

    /// TCP socket address
    #[must_use]
    pub fn tcp(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp_port)
    }

    /// UDP socket address
    #[must_use]
    pub fn udp(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }
}

impl fmt::Display for PeerSocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.ip, self.tcp_port, self.udp_port)
    }
}

/// Address of a peer in the overlay
///
/// Immutable; the `change_*` methods return an updated copy.
#[derive(Debug, Clone)]
pub struct PeerAddress {
    peer_id: PeerId,
    socket: PeerSocketAddress,
    firewalled_tcp: bool,
    firewalled_udp: bool,
    relayed: bool,
    relay_sockets: Vec<PeerSocketAddress>,
}

impl PeerAddress {
    /// Create a directly reachable peer address
    #[must_use]
    pub fn new(peer_id: PeerId, socket: PeerSocketAddress) -> Self {
        Self {
            peer_id,
            socket,
            firewalled_tcp: false,
            firewalled_udp: false,
            relayed: false,
            relay_sockets: Vec::new(),
        }
    }

    /// Peer identity
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Direct socket of the peer
    #[must_use]
    pub fn socket(&self) -> PeerSocketAddress {
        self.socket
    }

    /// IP address of the direct socket
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.socket.ip
    }

    /// TCP port of the direct socket
    #[must_use]
    pub fn tcp_port(&self) -> u16 {
        self.socket.tcp_port
    }

    /// UDP port of the direct socket
    #[must_use]
    pub fn udp_port(&self) -> u16 {
        self.socket.udp_port
    }

    /// Whether inbound TCP is blocked
    #[must_use]
    pub fn is_firewalled_tcp(&self) -> bool {
        self.firewalled_tcp
    }

    /// Whether inbound UDP is blocked
    #[must_use]
    pub fn is_firewalled_udp(&self) -> bool {
        self.firewalled_udp
    }

    /// Whether the peer is reachable only through relays
    #[must_use]
    pub fn is_relayed(&self) -> bool {
        self.relayed
    }

    /// Relay sockets through which the peer can be reached
    #[must_use]
    pub fn relay_sockets(&self) -> &[PeerSocketAddress] {
        &self.relay_sockets
    }

    /// Copy with the TCP firewall flag changed
    #[must_use]
    pub fn change_firewalled_tcp(mut self, firewalled: bool) -> Self {
        self.firewalled_tcp = firewalled;
        self
    }

    /// Copy with the UDP firewall flag changed
    #[must_use]
    pub fn change_firewalled_udp(mut self, firewalled: bool) -> Self {
        self.firewalled_udp = firewalled;
        self
    }

    /// Copy with the relayed flag changed
    #[must_use]
    pub fn change_relayed(mut self, relayed: bool) -> Self {
        self.relayed = relayed;
        self
    }

    /// Copy with the relay sockets replaced
    ///
    /// At most [`MAX_RELAYS`] sockets are kept.
    #[must_use]
    pub fn change_relay_sockets(
        mut self,
        sockets: impl IntoIterator<Item = PeerSocketAddress>,
    ) -> Self {
        self.relay_sockets = sockets.into_iter().take(MAX_RELAYS).collect();
        self
    }
}

impl PartialEq for PeerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.peer_id == other.peer_id
    }
}

impl Eq for PeerAddress {}

impl Hash for PeerAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.peer_id.hash(state);
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.peer_id, self.socket)?;
        if self.relayed {
            write!(f, " (relayed via {} sockets)", self.relay_sockets.len())?;
        }
        Ok(())
    }
}
