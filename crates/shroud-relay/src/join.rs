//! Fork-join evaluation for relay setup rounds
//!
//! A round starts several connection attempts and waits until every one of
//! them has settled. [`JoinPolicy`] decides whether the relays held after
//! the join are enough, counted against the relays the round wants; `JoinOutcome` collects the per-attempt results and builds
//! the failure description appended to the round's diagnostic trail.

use crate::error::RelayError;
use crate::peer::PeerAddress;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Success threshold for a fork-join over `wanted` relay slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// At least one attempt succeeded (not every attempt failed)
    #[default]
    AnySuccess,
    /// Every wanted slot holds a relay
    AllSucceed,
    /// At least `n` relays, capped at the number of wanted slots
    AtLeast(usize),
}

impl JoinPolicy {
    /// Number of successes required out of `wanted` slots
    #[must_use]
    pub fn required(&self, wanted: usize) -> usize {
        match *self {
            JoinPolicy::AnySuccess => wanted.min(1),
            JoinPolicy::AllSucceed => wanted,
            JoinPolicy::AtLeast(n) => n.min(wanted),
        }
    }

    /// Whether `succeeded` out of `wanted` slots satisfies the policy
    ///
    /// A join that wants nothing is never satisfied.
    #[must_use]
    pub fn is_satisfied(&self, succeeded: usize, wanted: usize) -> bool {
        wanted > 0 && succeeded >= self.required(wanted)
    }
}

/// Settled results of one round's attempts
#[derive(Debug, Default)]
pub(crate) struct JoinOutcome {
    succeeded: usize,
    failed: Vec<String>,
}

impl JoinOutcome {
    pub(crate) fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub(crate) fn record_failure(&mut self, candidate: &PeerAddress, err: &RelayError) {
        self.failed.push(format!("{}: {err}", candidate.peer_id()));
    }

    /// An attempt task that panicked or was cancelled
    pub(crate) fn record_aborted(&mut self, err: &tokio::task::JoinError) {
        self.failed.push(format!("attempt aborted: {err}"));
    }

    /// Successes settled in this join
    pub(crate) fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub(crate) fn failed(&self) -> usize {
        self.failed.len()
    }

    /// Describe why the join failed, given the total success count
    pub(crate) fn failure_reason(&self, succeeded: usize, wanted: usize, policy: JoinPolicy) -> String {
        let mut reason = format!(
            "[{succeeded}/{wanted} succeeded, {} required",
            policy.required(wanted)
        );
        for failure in &self.failed {
            let _ = write!(reason, "; {failure}");
        }
        reason.push(']');
        reason
    }
}
