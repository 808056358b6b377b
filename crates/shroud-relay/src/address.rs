//! Derivation of the node's advertised address from the relay pool

use crate::connection::RelayConnection;
use crate::peer::PeerAddress;
use crate::pool::RelayPool;
use crate::transport::LocalPeer;
use std::sync::Arc;

/// Compute the address the node should advertise for the given relays
///
/// With at least one relay the node is advertised as relayed and not
/// firewalled, listing every relay's socket. Without relays it is firewalled
/// and not relayed.
#[must_use]
pub fn derive_node_address(current: &PeerAddress, relays: &[Arc<dyn RelayConnection>]) -> PeerAddress {
    let has_relays = !relays.is_empty();
    let sockets = relays.iter().map(|relay| relay.relay_address().socket());

    current
        .clone()
        .change_firewalled_tcp(!has_relays)
        .change_firewalled_udp(!has_relays)
        .change_relayed(has_relays)
        .change_relay_sockets(sockets)
}

/// Recompute the node address from a pool snapshot and publish it
pub(crate) fn publish(local: &dyn LocalPeer, pool: &RelayPool) -> PeerAddress {
    let relays = pool.snapshot();
    let address = derive_node_address(&local.peer_address(), &relays);
    local.set_peer_address(address.clone());
    tracing::debug!(
        "Updated peer address {}, relayed = {}",
        address,
        address.is_relayed()
    );
    address
}
