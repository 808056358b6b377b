//! Relay manager configuration
//!
//! [`RelayConfig`] can be built in code (it implements [`Default`]) or loaded
//! from a TOML table:
//!
//! ```toml
//! max_relays = 3
//! failed_relay_wait_secs = 120
//! relay_type = "push"
//! gcm_registration_id = "APA91b..."
//! join_policy = { at_least = 2 }
//! ```

use crate::error::{RelayError, Result};
use crate::join::JoinPolicy;
use crate::peer::MAX_RELAYS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default time a failed relay candidate stays excluded
pub const DEFAULT_FAILED_RELAY_WAIT_TIME: Duration = Duration::from_secs(60);

/// Kind of relay connection to request from a relay peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayType {
    /// Persistent TCP tunnel kept open to the relay
    #[default]
    OpenTcp,
    /// Relay buffers messages and wakes the node through push notifications
    Push,
}

impl fmt::Display for RelayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenTcp => write!(f, "OpenTcp"),
            Self::Push => write!(f, "Push"),
        }
    }
}

/// Relay manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Maximum number of relays kept in the pool
    pub max_relays: usize,

    /// How long a failed candidate is excluded from relay setup
    #[serde(rename = "failed_relay_wait_secs", with = "duration_secs")]
    pub failed_relay_wait_time: Duration,

    /// Kind of relay connection
    pub relay_type: RelayType,

    /// Push registration token (required for [`RelayType::Push`])
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcm_registration_id: Option<String>,

    /// Success threshold of one setup round
    pub join_policy: JoinPolicy,

    /// Also drop recently failed peers from caller-supplied candidates
    pub filter_failed_manual_relays: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_relays: MAX_RELAYS,
            failed_relay_wait_time: DEFAULT_FAILED_RELAY_WAIT_TIME,
            relay_type: RelayType::OpenTcp,
            gcm_registration_id: None,
            join_policy: JoinPolicy::AnySuccess,
            filter_failed_manual_relays: true,
        }
    }
}

impl RelayConfig {
    /// Configuration for push-notification relays
    #[must_use]
    pub fn push(registration_id: impl Into<String>) -> Self {
        Self {
            relay_type: RelayType::Push,
            gcm_registration_id: Some(registration_id.into()),
            ..Self::default()
        }
    }

    /// Parse and validate a configuration from TOML
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] on malformed TOML and
    /// [`RelayError::InvalidConfig`] if validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.max_relays == 0 {
            return Err(RelayError::invalid_config("max_relays must be at least 1"));
        }
        if self.max_relays > MAX_RELAYS {
            return Err(RelayError::InvalidConfig(
                format!("max_relays must not exceed {MAX_RELAYS}").into(),
            ));
        }
        if self.failed_relay_wait_time.is_zero() {
            return Err(RelayError::invalid_config(
                "failed_relay_wait_time must be non-zero",
            ));
        }
        if self.relay_type == RelayType::Push
            && self
                .gcm_registration_id
                .as_deref()
                .is_none_or(|id| id.trim().is_empty())
        {
            return Err(RelayError::invalid_config(
                "push relays require a gcm_registration_id",
            ));
        }
        if let JoinPolicy::AtLeast(0) = self.join_policy {
            return Err(RelayError::invalid_config(
                "join_policy at_least must be at least 1",
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
