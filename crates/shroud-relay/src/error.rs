//! Error types for relay management
//!
//! Errors fall into two groups:
//!
//! - **Candidate failures**: a single relay candidate could not be reached or
//!   declined the relay request. These are absorbed by the setup round (the
//!   candidate is remembered as failed and another one is tried).
//! - **Round-terminal failures**: conditions that end a `setup_relays` call
//!   and are returned to its caller.
//!
//! # Example
//!
//! ```
//! use shroud_relay::RelayError;
//!
//! fn handle(err: RelayError) {
//!     if err.is_round_terminal() {
//!         eprintln!("relay setup gave up: {err}");
//!     }
//! }
//! # handle(RelayError::no_candidates(""));
//! ```

use crate::peer::PeerId;
use std::borrow::Cow;
use thiserror::Error;

/// Errors that can occur while managing relays
#[derive(Debug, Error, Clone)]
pub enum RelayError {
    // ============ Round-terminal Errors ============
    /// No candidate was left to try
    #[error("No candidates: {0}")]
    NoCandidates(Cow<'static, str>),

    /// The round exceeded its failure budget
    #[error("Max failures exceeded: {0}")]
    MaxFailExceeded(Cow<'static, str>),

    /// The channel creator could not be reserved
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(Cow<'static, str>),

    /// The node was torn down while a round was in flight
    #[error("Shut down during relay setup: {0}")]
    ShutdownRace(Cow<'static, str>),

    /// The relay manager has been shut down
    #[error("Relay manager is shut down")]
    Shutdown,

    // ============ Candidate Errors ============
    /// A candidate declined or failed the relay handshake
    #[error("Relay handshake rejected by {peer}: {reason}")]
    HandshakeRejected {
        /// Candidate peer
        peer: PeerId,
        /// Reason reported by the RPC layer
        reason: Cow<'static, str>,
    },

    /// A connection to a candidate could not be established
    #[error("Connection to {peer} failed: {reason}")]
    Connect {
        /// Candidate peer
        peer: PeerId,
        /// Reason reported by the transport layer
        reason: Cow<'static, str>,
    },

    // ============ Connection Errors ============
    /// Transport operation failed (close, channel shutdown)
    #[error("Transport error: {0}")]
    Transport(Cow<'static, str>),

    // ============ Configuration Errors ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Returns true if this error ends a `setup_relays` call
    #[must_use]
    pub fn is_round_terminal(&self) -> bool {
        matches!(
            self,
            RelayError::NoCandidates(_)
                | RelayError::MaxFailExceeded(_)
                | RelayError::ResourceUnavailable(_)
                | RelayError::ShutdownRace(_)
                | RelayError::Shutdown
        )
    }

    /// Returns true if this error concerns a single relay candidate
    ///
    /// Candidate failures are recorded in the failed-candidate cache and
    /// retried with another candidate rather than surfaced.
    #[must_use]
    pub fn is_candidate_failure(&self) -> bool {
        matches!(
            self,
            RelayError::HandshakeRejected { .. } | RelayError::Connect { .. }
        )
    }

    /// Create a no-candidates error with static context (zero allocation)
    #[must_use]
    pub const fn no_candidates(context: &'static str) -> Self {
        RelayError::NoCandidates(Cow::Borrowed(context))
    }

    /// Create a transport error with static context (zero allocation)
    #[must_use]
    pub const fn transport(context: &'static str) -> Self {
        RelayError::Transport(Cow::Borrowed(context))
    }

    /// Create a resource-unavailable error with static context (zero allocation)
    #[must_use]
    pub const fn resource_unavailable(context: &'static str) -> Self {
        RelayError::ResourceUnavailable(Cow::Borrowed(context))
    }

    /// Create an invalid configuration error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        RelayError::InvalidConfig(Cow::Borrowed(context))
    }

    /// Create a handshake rejection for a candidate
    pub fn rejected(peer: PeerId, reason: impl Into<Cow<'static, str>>) -> Self {
        RelayError::HandshakeRejected {
            peer,
            reason: reason.into(),
        }
    }

    /// Create a connection failure for a candidate
    pub fn connect(peer: PeerId, reason: impl Into<Cow<'static, str>>) -> Self {
        RelayError::Connect {
            peer,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::Config(err.to_string())
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
