//! Relay setup rounds
//!
//! One call to `setup_relays` runs a [`SetupRound`]. The round keeps one slot
//! per relay it still wants. Each iteration fills every empty slot with a
//! fresh candidate, starts all those attempts in parallel and waits until
//! every one of them has settled. Failed slots are emptied so the next
//! iteration can redraw them; successful slots stay filled. The iteration is
//! then judged by the configured [`JoinPolicy`](crate::JoinPolicy), counted
//! against the number of relays the round wants.
//!
//! The round ends when
//! - the policy is satisfied (success, returns the pool snapshot),
//! - no new attempt could be started ([`RelayError::NoCandidates`]),
//! - more iterations failed than the caller allowed
//!   ([`RelayError::MaxFailExceeded`]), or
//! - the node was torn down after a failed iteration
//!   ([`RelayError::ShutdownRace`]).

use crate::address;
use crate::connection::RelayConnection;
use crate::error::{RelayError, Result};
use crate::join::JoinOutcome;
use crate::manager::RelayInner;
use crate::peer::PeerAddress;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Slot index, candidate and result of one connection attempt
type Attempt = (usize, PeerAddress, Result<()>);

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Relay(PeerAddress),
}

/// One bounded-parallel relay setup run
pub(crate) struct SetupRound {
    inner: Arc<RelayInner>,
    candidates: VecDeque<PeerAddress>,
    slots: Vec<Slot>,
    max_fail: usize,
    fail: usize,
    trail: String,
}

impl SetupRound {
    /// Prepare a round over already filtered `candidates`
    pub(crate) fn new(inner: Arc<RelayInner>, candidates: Vec<PeerAddress>, max_fail: usize) -> Self {
        let wanted = inner.pool.remaining().min(candidates.len());
        tracing::debug!("Setting up {} relays", wanted);

        Self {
            inner,
            candidates: candidates.into(),
            slots: vec![Slot::Empty; wanted],
            max_fail,
            fail: 0,
            trail: String::new(),
        }
    }

    /// Drive the round to completion
    pub(crate) async fn run(mut self) -> Result<Vec<Arc<dyn RelayConnection>>> {
        if self.slots.is_empty() {
            return if self.candidates.is_empty() {
                Err(RelayError::no_candidates("no relay candidates"))
            } else {
                // pool already full
                Ok(Vec::new())
            };
        }

        let policy = self.inner.config.join_policy;
        loop {
            if self.fail > self.max_fail {
                self.publish();
                return Err(RelayError::MaxFailExceeded(self.trail.trim_end().to_owned().into()));
            }

            let mut attempts = self.draw();
            if attempts.is_empty() {
                self.publish();
                return Err(RelayError::NoCandidates(self.trail.trim_end().to_owned().into()));
            }

            let outcome = self.settle(&mut attempts).await;
            let succeeded = self.filled();
            let wanted = self.slots.len();
            if policy.is_satisfied(succeeded, wanted) {
                self.publish();
                let relays = self.inner.pool.snapshot();
                tracing::info!(
                    "Relay setup finished with {} relays ({} new in last attempt)",
                    relays.len(),
                    outcome.succeeded()
                );
                return Ok(relays);
            }

            let reason = outcome.failure_reason(succeeded, wanted, policy);
            if self.inner.is_torn_down() {
                return Err(RelayError::ShutdownRace(reason.into()));
            }

            tracing::debug!(
                "Relay setup attempt {} failed ({} candidates failed), retrying",
                self.fail + 1,
                outcome.failed()
            );
            self.fail += 1;
            self.trail.push_str(&reason);
            self.trail.push(' ');
        }
    }

    /// Start an attempt for every empty slot that can draw a candidate
    fn draw(&mut self) -> JoinSet<Attempt> {
        let mut attempts = JoinSet::new();

        for (index, slot) in self.slots.iter().enumerate() {
            if !matches!(slot, Slot::Empty) {
                continue;
            }
            let Some(candidate) = self.candidates.pop_front() else {
                break;
            };
            let inner = Arc::clone(&self.inner);
            attempts.spawn(async move {
                let result = guarded_attempt(inner, candidate.clone()).await;
                (index, candidate, result)
            });
        }

        attempts
    }

    /// Wait for every started attempt and record the results in the slots
    async fn settle(&mut self, attempts: &mut JoinSet<Attempt>) -> JoinOutcome {
        let mut outcome = JoinOutcome::default();

        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((index, candidate, Ok(()))) => {
                    self.slots[index] = Slot::Relay(candidate);
                    outcome.record_success();
                }
                Ok((_, candidate, Err(e))) => outcome.record_failure(&candidate, &e),
                Err(e) => {
                    tracing::warn!("Relay attempt task failed: {}", e);
                    outcome.record_aborted(&e);
                }
            }
        }

        outcome
    }

    fn filled(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Relay(_)))
            .count()
    }

    fn publish(&self) {
        address::publish(self.inner.services.local.as_ref(), &self.inner.pool);
    }
}

/// Run one attempt on its own task so a panicking collaborator still counts
/// as a failed candidate
async fn guarded_attempt(inner: Arc<RelayInner>, candidate: PeerAddress) -> Result<()> {
    let task = {
        let inner = Arc::clone(&inner);
        let candidate = candidate.clone();
        tokio::spawn(async move { inner.attempt(&candidate).await })
    };

    match task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!("Relay attempt to {} aborted: {}", candidate, e);
            inner.mark_failed(&candidate);
            Err(RelayError::Transport(format!("attempt aborted: {e}").into()))
        }
    }
}
