//! Interfaces to the rest of the node
//!
//! The relay manager does not open sockets or speak the relay RPC itself.
//! It drives these collaborators, which the node supplies through
//! [`RelayServices`].

use crate::config::RelayType;
use crate::error::Result;
use crate::peer::PeerAddress;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// An open connection to a remote peer
#[async_trait]
pub trait PeerConnection: Send + Sync + fmt::Debug {
    /// Address of the remote peer
    fn remote_peer(&self) -> &PeerAddress;

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails to close cleanly.
    async fn close(&self) -> Result<()>;

    /// Resolves once the connection is closed, for whatever reason
    async fn closed(&self);
}

/// Read access to the routing table
pub trait RoutingTable: Send + Sync {
    /// All peers currently known to the routing layer
    fn all_known_peers(&self) -> Vec<PeerAddress>;
}

/// Reserved channel capacity kept open for relay connections
#[async_trait]
pub trait ChannelCreator: Send + Sync {
    /// Release the reserved channels
    ///
    /// # Errors
    ///
    /// Returns error if the release fails.
    async fn shutdown(&self) -> Result<()>;
}

/// Channel reservation layer
#[async_trait]
pub trait ChannelReservation: Send + Sync {
    /// Reserve between `min` and `max` channels
    ///
    /// # Errors
    ///
    /// Returns error if the reservation cannot be made.
    async fn reserve(&self, min: usize, max: usize) -> Result<Arc<dyn ChannelCreator>>;
}

/// Opens raw connections to candidates
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Connect to a candidate peer
    ///
    /// # Errors
    ///
    /// Returns [`crate::RelayError::Connect`] if the peer cannot be reached.
    async fn connect(&self, candidate: &PeerAddress) -> Result<Arc<dyn PeerConnection>>;
}

/// Relay request RPC
#[async_trait]
pub trait RelayRpc: Send + Sync {
    /// Ask the remote peer of `connection` to act as a relay
    ///
    /// Returns the established relay connection on success.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RelayError::HandshakeRejected`] if the peer declines.
    async fn setup_relay(
        &self,
        connection: Arc<dyn PeerConnection>,
        relay_type: RelayType,
        registration_id: Option<&str>,
    ) -> Result<Arc<dyn PeerConnection>>;
}

/// The local (unreachable) node
pub trait LocalPeer: Send + Sync {
    /// Currently advertised address
    fn peer_address(&self) -> PeerAddress;

    /// Replace the advertised address
    fn set_peer_address(&self, address: PeerAddress);

    /// Whether the node is being torn down
    fn is_shutdown(&self) -> bool;
}

/// Collaborators required by the relay manager
#[derive(Clone)]
pub struct RelayServices {
    /// Routing table (candidate source)
    pub routing: Arc<dyn RoutingTable>,
    /// Channel reservation layer
    pub reservation: Arc<dyn ChannelReservation>,
    /// Connection factory
    pub connector: Arc<dyn PeerConnector>,
    /// Relay RPC
    pub rpc: Arc<dyn RelayRpc>,
    /// Local node
    pub local: Arc<dyn LocalPeer>,
}

impl fmt::Debug for RelayServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayServices").finish_non_exhaustive()
    }
}
