//! Relay connections
//!
//! A [`RelayConnection`] is an established link to one relay peer. Every
//! kind of relay exposes the same capabilities: the relay's address, a
//! graceful shutdown, and a close listener that is invoked exactly once when
//! the link is lost without being shut down.
//!
//! Two kinds exist, matching [`RelayType`]:
//!
//! - [`OpenTcpRelayConnection`] keeps the peer connection open and watches it
//!   for closure.
//! - [`PushRelayConnection`] keeps no connection; the relay wakes the node
//!   through push notifications, so loss has to be reported by whoever
//!   notices it ([`PushRelayConnection::report_unreachable`]).

use crate::config::RelayType;
use crate::error::Result;
use crate::peer::PeerAddress;
use crate::pool::lock;
use crate::transport::PeerConnection;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Callback invoked with the relay address when a relay link is lost
pub type CloseListener = Box<dyn FnOnce(PeerAddress) + Send>;

/// Established link to a relay peer
#[async_trait]
pub trait RelayConnection: Send + Sync + fmt::Debug {
    /// Address of the relay peer
    fn relay_address(&self) -> &PeerAddress;

    /// Kind of relay link
    fn relay_type(&self) -> RelayType;

    /// Whether the link was lost or shut down
    fn is_closed(&self) -> bool;

    /// Shut the link down
    ///
    /// Does not invoke the close listener. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying transport fails to close.
    async fn shutdown(&self) -> Result<()>;

    /// Register the listener for unsolicited closure
    ///
    /// If the link was already lost, the listener is invoked immediately.
    fn set_close_listener(&self, listener: CloseListener);
}

/// Whether two handles refer to the same relay connection
pub(crate) fn same_connection(a: &Arc<dyn RelayConnection>, b: &Arc<dyn RelayConnection>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Wrap an established relay handshake into a relay connection of `relay_type`
pub(crate) async fn establish(
    relay_type: RelayType,
    connection: Arc<dyn PeerConnection>,
) -> Arc<dyn RelayConnection> {
    match relay_type {
        RelayType::OpenTcp => OpenTcpRelayConnection::new(connection),
        RelayType::Push => {
            let relay_address = connection.remote_peer().clone();
            if let Err(e) = connection.close().await {
                tracing::debug!("Closing handshake connection to {} failed: {}", relay_address, e);
            }
            PushRelayConnection::new(relay_address)
        }
    }
}

#[derive(Default)]
enum LinkState {
    #[default]
    Open,
    /// Lost without shutdown; `notified` once the listener ran
    Lost { notified: bool },
    ShutDown,
}

/// Exactly-once close notification shared by all relay kinds
#[derive(Default)]
struct CloseSignal {
    state: Mutex<(LinkState, Option<CloseListener>)>,
}

impl CloseSignal {
    fn is_closed(&self) -> bool {
        !matches!(lock(&self.state).0, LinkState::Open)
    }

    fn set_listener(&self, listener: CloseListener, address: &PeerAddress) {
        let mut guard = lock(&self.state);
        match guard.0 {
            LinkState::Open => guard.1 = Some(listener),
            LinkState::Lost { notified: false } => {
                guard.0 = LinkState::Lost { notified: true };
                drop(guard);
                listener(address.clone());
            }
            LinkState::Lost { notified: true } | LinkState::ShutDown => {}
        }
    }

    /// Mark the link lost; returns false if it was already closed
    fn lost(&self, address: &PeerAddress) -> bool {
        let mut guard = lock(&self.state);
        if !matches!(guard.0, LinkState::Open) {
            return false;
        }
        let listener = guard.1.take();
        guard.0 = LinkState::Lost {
            notified: listener.is_some(),
        };
        drop(guard);

        if let Some(listener) = listener {
            listener(address.clone());
        }
        true
    }

    /// Mark the link shut down; returns false if it was already closed
    fn shut_down(&self) -> bool {
        let mut guard = lock(&self.state);
        if !matches!(guard.0, LinkState::Open) {
            return false;
        }
        guard.0 = LinkState::ShutDown;
        guard.1 = None;
        true
    }
}

/// Relay link over a persistent peer connection
pub struct OpenTcpRelayConnection {
    relay_address: PeerAddress,
    connection: Arc<dyn PeerConnection>,
    signal: Arc<CloseSignal>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl OpenTcpRelayConnection {
    /// Wrap `connection` and start watching it for closure
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(connection: Arc<dyn PeerConnection>) -> Arc<dyn RelayConnection> {
        let relay_address = connection.remote_peer().clone();
        let signal = Arc::new(CloseSignal::default());

        let watcher = {
            let connection = Arc::clone(&connection);
            let signal = Arc::clone(&signal);
            let relay_address = relay_address.clone();
            tokio::spawn(async move {
                connection.closed().await;
                if signal.lost(&relay_address) {
                    tracing::debug!("Relay connection to {} closed by transport", relay_address);
                }
            })
        };

        Arc::new(Self {
            relay_address,
            connection,
            signal,
            watcher: Mutex::new(Some(watcher)),
        })
    }
}

#[async_trait]
impl RelayConnection for OpenTcpRelayConnection {
    fn relay_address(&self) -> &PeerAddress {
        &self.relay_address
    }

    fn relay_type(&self) -> RelayType {
        RelayType::OpenTcp
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.signal.shut_down() {
            return Ok(());
        }
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
        self.connection.close().await
    }

    fn set_close_listener(&self, listener: CloseListener) {
        self.signal.set_listener(listener, &self.relay_address);
    }
}

impl Drop for OpenTcpRelayConnection {
    fn drop(&mut self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
    }
}

impl fmt::Debug for OpenTcpRelayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenTcpRelayConnection")
            .field("relay_address", &self.relay_address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Relay link for nodes woken through push notifications
pub struct PushRelayConnection {
    relay_address: PeerAddress,
    signal: CloseSignal,
}

impl PushRelayConnection {
    /// Create a push relay link to `relay_address`
    #[must_use]
    pub fn new(relay_address: PeerAddress) -> Arc<dyn RelayConnection> {
        Arc::new(Self::unshared(relay_address))
    }

    /// Create a push relay link without type erasure
    #[must_use]
    pub fn unshared(relay_address: PeerAddress) -> Self {
        Self {
            relay_address,
            signal: CloseSignal::default(),
        }
    }

    /// Report that the relay can no longer be reached
    ///
    /// Invokes the close listener unless the link was already closed.
    /// Returns whether this call closed the link.
    pub fn report_unreachable(&self) -> bool {
        self.signal.lost(&self.relay_address)
    }
}

#[async_trait]
impl RelayConnection for PushRelayConnection {
    fn relay_address(&self) -> &PeerAddress {
        &self.relay_address
    }

    fn relay_type(&self) -> RelayType {
        RelayType::Push
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    async fn shutdown(&self) -> Result<()> {
        self.signal.shut_down();
        Ok(())
    }

    fn set_close_listener(&self, listener: CloseListener) {
        self.signal.set_listener(listener, &self.relay_address);
    }
}

impl fmt::Debug for PushRelayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushRelayConnection")
            .field("relay_address", &self.relay_address)
            .field("closed", &self.is_closed())
            .finish()
    }
}
