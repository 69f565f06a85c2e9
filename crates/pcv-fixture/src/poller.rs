//! State convergence polling.
//!
//! Each [`StateConvergencePoller::await_state`] call is a small state machine:
//!
//! ```text
//!             state == target / gone while awaiting deletion
//!   Pending ───────────────────────────────────────────────► Converged
//!      │  misses > tolerance
//!      ├────────────────────────────────────────────────────► Lost
//!      │  deadline reached
//!      └────────────────────────────────────────────────────► TimedOut
//! ```
//!
//! A tick observes the resource, evaluates the observation, checks the
//! deadline and only then sleeps for the poll interval. Observations are
//! strictly sequential. The deadline is the only cancellation signal and is
//! never checked mid-sleep. Sleeping yields to the runtime, so many waits can
//! run concurrently on one thread.

use std::sync::Arc;
use std::time::Duration;

use pcv_core::{ManagedResource, PcvError, PcvResult, Provider, ResourceState};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

use crate::PollConfig;

/// Parameters for one convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceQuery {
    pub target: ResourceState,
    pub deadline: Instant,
    pub interval: Duration,
    /// Consecutive misses tolerated before the resource counts as lost.
    /// Ignored when `target` denotes deletion.
    pub disappearance_tolerance: u32,
}

impl ConvergenceQuery {
    /// Wait up to `timeout` from now, polling per `poll`.
    #[must_use]
    pub fn new(target: ResourceState, timeout: Duration, poll: &PollConfig) -> Self {
        Self::until(target, Instant::now() + timeout, poll)
    }

    /// Wait until an absolute `deadline`, polling per `poll`.
    #[must_use]
    pub const fn until(target: ResourceState, deadline: Instant, poll: &PollConfig) -> Self {
        Self {
            target,
            deadline,
            interval: poll.interval,
            disappearance_tolerance: poll.disappearance_tolerance,
        }
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: u32) -> Self {
        self.disappearance_tolerance = tolerance;
        self
    }
}

/// Terminal state of a convergence wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Convergence {
    /// The target state was observed. For deletion targets the resource is
    /// the last observation with its state set to the target.
    Converged { resource: ManagedResource },
    /// The resource vanished while a non-deletion state was awaited.
    Lost {
        last_seen: ManagedResource,
        misses: u32,
    },
    /// The deadline passed; `resource` is the last successful observation,
    /// possibly in a transitional state, so callers can assert on it.
    TimedOut { resource: ManagedResource },
}

impl Convergence {
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    #[must_use]
    pub const fn is_lost(&self) -> bool {
        matches!(self, Self::Lost { .. })
    }

    /// Last known view of the resource.
    #[must_use]
    pub const fn resource(&self) -> &ManagedResource {
        match self {
            Self::Converged { resource } | Self::TimedOut { resource } => resource,
            Self::Lost { last_seen, .. } => last_seen,
        }
    }

    /// State to assert on: the observed state, or `None` if the resource was lost.
    #[must_use]
    pub const fn final_state(&self) -> Option<ResourceState> {
        match self {
            Self::Converged { resource } | Self::TimedOut { resource } => Some(resource.state),
            Self::Lost { .. } => None,
        }
    }

    /// Convert into a result that treats anything but convergence as an error.
    ///
    /// # Errors
    /// Returns [`PcvError::Lost`] or [`PcvError::TimedOut`].
    pub fn into_converged(self, target: ResourceState) -> PcvResult<ManagedResource> {
        match self {
            Self::Converged { resource } => Ok(resource),
            Self::Lost { last_seen, misses } => Err(PcvError::Lost {
                kind: last_seen.kind,
                id: last_seen.id,
                misses,
            }),
            Self::TimedOut { resource } => Err(PcvError::TimedOut {
                id: resource.id,
                target,
                observed: resource.state,
            }),
        }
    }
}

/// Read-only poller driving convergence waits against one provider.
#[derive(Clone)]
pub struct StateConvergencePoller {
    provider: Arc<dyn Provider>,
}

impl std::fmt::Debug for StateConvergencePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateConvergencePoller")
            .field("provider", &self.provider.name())
            .finish()
    }
}

impl StateConvergencePoller {
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Observe `resource` until it reaches `query.target`, is lost, or the
    /// deadline passes.
    ///
    /// Fetch failures are transient observations and are retried until the
    /// deadline; they neither count as misses nor reset the miss counter.
    ///
    /// # Errors
    /// Only fatal errors (see [`PcvError::is_fatal`]) are returned, including
    /// a fetched resource that fails [`ManagedResource::validate`].
    #[instrument(
        name = "await_state",
        skip(self, resource, query),
        fields(id = %resource.id, kind = %resource.kind, target = %query.target)
    )]
    pub async fn await_state(
        &self,
        resource: &ManagedResource,
        query: &ConvergenceQuery,
    ) -> PcvResult<Convergence> {
        let mut last_seen = resource.clone();
        let mut misses: u32 = 0;
        let mut tick: u32 = 0;

        loop {
            tick += 1;
            match self.provider.fetch(resource.kind, &resource.id).await {
                Ok(Some(observed)) => {
                    observed.validate()?;
                    misses = 0;
                    debug!(tick, state = %observed.state, "observed");
                    last_seen = observed;
                    if last_seen.state == query.target {
                        return Ok(Convergence::Converged { resource: last_seen });
                    }
                }
                Ok(None) => {
                    if query.target.is_deletion() {
                        debug!(tick, "gone");
                        return Ok(Convergence::Converged {
                            resource: last_seen.observed_in(query.target),
                        });
                    }
                    misses += 1;
                    debug!(tick, misses, "not found");
                    if misses > query.disappearance_tolerance {
                        warn!(misses, "resource lost");
                        return Ok(Convergence::Lost { last_seen, misses });
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => debug!(tick, %err, "transient observation error"),
            }

            if Instant::now() >= query.deadline {
                warn!(tick, state = %last_seen.state, "convergence timed out");
                return Ok(Convergence::TimedOut { resource: last_seen });
            }
            sleep(query.interval).await;
        }
    }
}
