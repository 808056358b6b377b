//! # Shroud Relay
//!
//! Relay connection management for peers that sit behind a NAT or firewall
//! and cannot accept direct inbound connections.
//!
//! This crate provides:
//! - Relay candidate selection from the routing table or a manual list
//! - Bounded-parallel relay setup with a failure budget and retries
//! - A bounded pool of live relay connections that heals itself when a relay
//!   drops
//! - A time-windowed cache of failed relay candidates
//! - Derivation of the node's advertised address (firewall flags, relayed
//!   flag, relay sockets) from the active relays
//!
//! The transport, the relay RPC and the routing table are supplied by the
//! node through the traits in [`transport`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use shroud_relay::{RelayConfig, RelayManager, RelayServices, PeerAddress};
//!
//! # async fn example(services: RelayServices) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = RelayManager::new(RelayConfig::default(), services)?;
//!
//! // Re-run relay setup when a relay is lost
//! manager.add_relay_listener(|relay: &PeerAddress| {
//!     eprintln!("lost relay {relay}");
//! });
//!
//! // Use routing table peers as candidates, tolerate 2 failed attempts
//! let relays = manager.setup_relays(Vec::new(), 2).await?;
//! println!("{} relays active", relays.len());
//!
//! manager.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod config;
pub mod connection;
pub mod error;
pub mod failed;
pub mod join;
pub mod manager;
pub mod peer;
pub mod pool;
mod round;
pub mod transport;

// Re-export commonly used types
pub use address::derive_node_address;
pub use config::{RelayConfig, RelayType};
pub use connection::{CloseListener, OpenTcpRelayConnection, PushRelayConnection, RelayConnection};
pub use error::{RelayError, Result};
pub use failed::FailedRelayCache;
pub use join::JoinPolicy;
pub use manager::{RelayListener, RelayManager};
pub use peer::{MAX_RELAYS, PeerAddress, PeerId, PeerSocketAddress};
pub use pool::{PoolInsert, RelayPool};
pub use transport::{
    ChannelCreator, ChannelReservation, LocalPeer, PeerConnection, PeerConnector, RelayRpc,
    RelayServices, RoutingTable,
};
