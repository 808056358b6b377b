//! Relay Manager
//!
//! Sets up and maintains the relay connections of a node that cannot accept
//! direct inbound connections, and keeps the node's advertised address in
//! line with the active relays.
//!
//! # Lifecycle
//!
//! ```text
//! candidates ──filter──▶ SetupRound ──connect + handshake──▶ RelayPool
//!                             │                                 │
//!                     failures│                        relay lost│
//!                             ▼                                 ▼
//!                     FailedRelayCache ◀──────────── close listener
//!                                                               │
//!                           advertised address ◀── re-derive ◀──┤
//!                           RelayListener(s)   ◀── notify ◀─────┘
//! ```
//!
//! A lost relay is not replaced automatically. Callers register a
//! [`RelayListener`] and run [`RelayManager::setup_relays`] again when they
//! are notified.

use crate::address;
use crate::config::RelayConfig;
use crate::connection::{self, RelayConnection};
use crate::error::{RelayError, Result};
use crate::failed::FailedRelayCache;
use crate::peer::PeerAddress;
use crate::pool::{PoolInsert, RelayPool, lock};
use crate::round::SetupRound;
use crate::transport::{ChannelCreator, PeerConnection, RelayServices};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinSet;

/// Observer of lost relay connections
pub trait RelayListener: Send + Sync {
    /// Called once for every relay connection that was lost
    fn relay_failed(&self, relay_address: &PeerAddress);
}

impl<F> RelayListener for F
where
    F: Fn(&PeerAddress) + Send + Sync,
{
    fn relay_failed(&self, relay_address: &PeerAddress) {
        self(relay_address);
    }
}

/// State shared by the manager, its setup rounds and close listeners
pub(crate) struct RelayInner {
    pub(crate) config: RelayConfig,
    pub(crate) services: RelayServices,
    pub(crate) pool: RelayPool,
    failed: FailedRelayCache,
    listeners: Mutex<Vec<Arc<dyn RelayListener>>>,
    /// Reserved once and kept for the manager's lifetime
    channel_creator: tokio::sync::Mutex<Option<Arc<dyn ChannelCreator>>>,
    shut_down: AtomicBool,
}

impl RelayInner {
    /// Whether the manager or the node is being torn down
    pub(crate) fn is_torn_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire) || self.services.local.is_shutdown()
    }

    async fn channel_creator(&self) -> Result<Arc<dyn ChannelCreator>> {
        let mut slot = self.channel_creator.lock().await;
        if let Some(creator) = slot.as_ref() {
            return Ok(Arc::clone(creator));
        }
        if self.shut_down.load(Ordering::Acquire) {
            return Err(RelayError::Shutdown);
        }

        let reserved = self
            .services
            .reservation
            .reserve(0, self.config.max_relays)
            .await
            .map_err(|e| match e {
                RelayError::ResourceUnavailable(_) => e,
                other => RelayError::ResourceUnavailable(other.to_string().into()),
            })?;
        *slot = Some(Arc::clone(&reserved));
        Ok(reserved)
    }

    /// Candidates for a setup round
    ///
    /// Manual relays replace the routing table as the source. Peers that are
    /// relayed themselves, already serve as relays, or are the local node
    /// are removed.
    fn relay_candidates(&self, mut manual: Vec<PeerAddress>) -> Vec<PeerAddress> {
        let mut candidates = if manual.is_empty() {
            let mut known = self.services.routing.all_known_peers();
            self.failed.remove_failed(&mut known);
            known
        } else {
            if self.config.filter_failed_manual_relays {
                self.failed.remove_failed(&mut manual);
            }
            manual
        };

        let me = self.services.local.peer_address();
        let mut seen = HashSet::new();
        candidates.retain(|candidate| {
            !candidate.is_relayed()
                && *candidate != me
                && !self.pool.contains_peer(candidate)
                && seen.insert(candidate.peer_id())
        });

        tracing::debug!("Found {} peers that could act as relays", candidates.len());
        candidates
    }

    /// Connect to `candidate` and request it as relay
    ///
    /// A successful relay is added to the pool; a failed candidate is
    /// remembered in the failed cache.
    pub(crate) async fn attempt(self: &Arc<Self>, candidate: &PeerAddress) -> Result<()> {
        let established = async {
            let connection = self.services.connector.connect(candidate).await?;
            self.services
                .rpc
                .setup_relay(
                    connection,
                    self.config.relay_type,
                    self.config.gcm_registration_id.as_deref(),
                )
                .await
        }
        .await;

        match established {
            Ok(connection) => {
                self.add_relay(connection).await;
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Peer {} denied relay request: {}", candidate, e);
                self.mark_failed(candidate);
                Err(e)
            }
        }
    }

    /// Remember `candidate` as a failed relay
    pub(crate) fn mark_failed(&self, candidate: &PeerAddress) {
        self.failed.add(candidate);
    }

    async fn add_relay(self: &Arc<Self>, connection: Arc<dyn PeerConnection>) {
        let relay = connection::establish(self.config.relay_type, connection).await;
        let relay_address = relay.relay_address().clone();

        let inserted = if self.shut_down.load(Ordering::Acquire) {
            None
        } else {
            Some(self.pool.add(Arc::clone(&relay)))
        };

        match inserted {
            Some(PoolInsert::Added) => {
                tracing::debug!("Adding peer {} as a relay", relay_address);
                if self.shut_down.load(Ordering::Acquire) && self.pool.remove(&relay) {
                    Self::discard(relay, "manager shut down").await;
                    return;
                }
                self.watch(&relay);
                address::publish(self.services.local.as_ref(), &self.pool);
            }
            Some(PoolInsert::Full) => Self::discard(relay, "relay pool full").await,
            Some(PoolInsert::Duplicate) => Self::discard(relay, "relay already pooled").await,
            None => Self::discard(relay, "manager shut down").await,
        }
    }

    async fn discard(relay: Arc<dyn RelayConnection>, reason: &str) {
        tracing::warn!("Discarding relay {}: {}", relay.relay_address(), reason);
        if let Err(e) = relay.shutdown().await {
            tracing::warn!("Failed to close discarded relay {}: {}", relay.relay_address(), e);
        }
    }

    /// Attach the close listener that heals the pool when `relay` is lost
    fn watch(self: &Arc<Self>, relay: &Arc<dyn RelayConnection>) {
        let inner: Weak<Self> = Arc::downgrade(self);
        let weak_relay: Weak<dyn RelayConnection> = Arc::downgrade(relay);

        relay.set_close_listener(Box::new(move |relay_address| {
            if let (Some(inner), Some(relay)) = (inner.upgrade(), weak_relay.upgrade()) {
                inner.relay_lost(&relay, &relay_address);
            }
        }));
    }

    fn relay_lost(&self, relay: &Arc<dyn RelayConnection>, relay_address: &PeerAddress) {
        if !self.pool.remove(relay) {
            return;
        }
        self.failed.add(relay_address);
        address::publish(self.services.local.as_ref(), &self.pool);
        tracing::info!("Relay {} lost, {} relays left", relay_address, self.pool.len());

        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener.relay_failed(relay_address);
        }
    }
}

/// Manages the relay connections of an unreachable node
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct RelayManager {
    inner: Arc<RelayInner>,
}

impl RelayManager {
    /// Create a relay manager
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfig`] if `config` is invalid.
    pub fn new(config: RelayConfig, services: RelayServices) -> Result<Self> {
        config.validate()?;

        let inner = RelayInner {
            pool: RelayPool::new(config.max_relays),
            failed: FailedRelayCache::new(config.failed_relay_wait_time),
            listeners: Mutex::new(Vec::with_capacity(1)),
            channel_creator: tokio::sync::Mutex::new(None),
            shut_down: AtomicBool::new(false),
            config,
            services,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Set up relay connections until the pool is full
    ///
    /// `manual_relays` are used as candidates if non-empty, otherwise the
    /// routing table's known peers are. `max_fail` is the number of failed
    /// attempts tolerated before giving up.
    ///
    /// Call this after bootstrapping so the routing table is populated.
    ///
    /// # Errors
    ///
    /// - [`RelayError::NoCandidates`] if no usable candidate remains
    /// - [`RelayError::MaxFailExceeded`] if the failure budget is spent
    /// - [`RelayError::ResourceUnavailable`] if channels cannot be reserved
    /// - [`RelayError::ShutdownRace`] if the node shut down mid-setup
    /// - [`RelayError::Shutdown`] if the manager was already shut down
    pub async fn setup_relays(
        &self,
        manual_relays: impl IntoIterator<Item = PeerAddress>,
        max_fail: usize,
    ) -> Result<Vec<Arc<dyn RelayConnection>>> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(RelayError::Shutdown);
        }

        self.inner.channel_creator().await?;

        let candidates = self
            .inner
            .relay_candidates(manual_relays.into_iter().collect());
        SetupRound::new(Arc::clone(&self.inner), candidates, max_fail)
            .run()
            .await
    }

    /// Register an observer for lost relays
    pub fn add_relay_listener(&self, listener: impl RelayListener + 'static) {
        lock(&self.inner.listeners).push(Arc::new(listener));
    }

    /// Shut down every relay connection and release the reserved channels
    ///
    /// Listeners are dropped immediately. Calling this again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by a relay or the channel creator;
    /// the remaining shutdowns still run to completion.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shut_down.store(true, Ordering::Release);
        lock(&self.inner.listeners).clear();

        let relays = self.inner.pool.drain();
        let creator = self.inner.channel_creator.lock().await.take();
        let had_relays = !relays.is_empty();

        let mut shutdowns = JoinSet::new();
        for relay in relays {
            shutdowns.spawn(async move { relay.shutdown().await });
        }
        if let Some(creator) = creator {
            shutdowns.spawn(async move { creator.shutdown().await });
        }

        let mut first_error = None;
        while let Some(joined) = shutdowns.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(RelayError::Transport(e.to_string().into())));
            if let Err(e) = result {
                tracing::warn!("Relay shutdown failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if had_relays {
            address::publish(self.inner.services.local.as_ref(), &self.inner.pool);
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Snapshot of the active relay connections
    #[must_use]
    pub fn relays(&self) -> Vec<Arc<dyn RelayConnection>> {
        self.inner.pool.snapshot()
    }

    /// Addresses of the active relays
    #[must_use]
    pub fn relay_addresses(&self) -> Vec<PeerAddress> {
        self.inner
            .pool
            .snapshot()
            .iter()
            .map(|relay| relay.relay_address().clone())
            .collect()
    }

    /// Whether `peer` recently failed as a relay
    #[must_use]
    pub fn is_failed(&self, peer: &PeerAddress) -> bool {
        self.inner.failed.contains(peer)
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }
}

impl fmt::Debug for RelayManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayManager")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
