//! Fixture resolution.
//!
//! [`FixtureOrchestrator::resolve`] turns a test name into a ready fixture:
//!
//! 1. Look the test up in the [`RequirementTable`].
//! 2. Gate on the kind and any extra capability the requirement names.
//! 3. Work out the concrete pre-state.
//! 4. Pooled policies go through [`ResourcePool::lookup_or_prepare`] keyed by
//!    (kind, policy, pre-state); single-use policies always provision fresh.
//! 5. Settle the resource: wait out transitional states, then drive it into
//!    the pre-state one planned operation at a time. Pooled fixtures settle
//!    inside the pool's prepare step, so the key stays locked until the
//!    fixture is in its pre-state.
//!
//! Fresh resources enter the ledger before they are driven, so a failed
//! drive still gets cleaned up at teardown.

use std::sync::Arc;

use futures_util::StreamExt;
use pcv_core::{
    plan_transition, CapabilitySet, ManagedResource, Operation, PcvError, PcvResult,
    ResourceFilter, ResourceState, ReusePolicy,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    Absence, Acquired, Binding, CleanupObligation, FixtureRequirement, PoolKey, PreState,
    Prepared, RequirementTable, SuiteContext, Verdict,
};

/// Upper bound on planned operations while settling one fixture.
const MAX_HOPS: usize = 4;

/// Result of resolving a test's fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    Ready { resource: ManagedResource },
    /// The test needs no fixture.
    NoFixture,
    /// The capability is absent; the test is irrelevant here.
    Skipped { reason: String },
    /// Provisioning was refused for lack of entitlement.
    NotSubscribed { reason: String },
    /// No fixture could be produced and the requirement tolerates that.
    Missing { reason: String },
}

impl Resolution {
    #[must_use]
    pub const fn resource(&self) -> Option<&ManagedResource> {
        match self {
            Self::Ready { resource } => Some(resource),
            _ => None,
        }
    }

    /// Returns true if the test should not run at all.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Maps test names to fixtures and realizes them.
#[derive(Debug, Clone)]
pub struct FixtureOrchestrator {
    ctx: Arc<SuiteContext>,
    table: Arc<RequirementTable>,
}

impl FixtureOrchestrator {
    #[must_use]
    pub fn new(ctx: Arc<SuiteContext>, table: RequirementTable) -> Self {
        Self {
            ctx,
            table: Arc::new(table),
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<SuiteContext> {
        &self.ctx
    }

    #[must_use]
    pub fn table(&self) -> &RequirementTable {
        &self.table
    }

    /// Resolve the fixture for `test`.
    ///
    /// Unsupported capabilities and missing entitlements are results, not
    /// errors.
    ///
    /// # Errors
    /// - [`PcvError::PreconditionFailed`] when the gate reports a missing
    ///   companion fixture.
    /// - [`PcvError::FixtureUnavailable`] when provisioning fails and the
    ///   requirement treats absence as a failure.
    /// - Fatal errors ([`PcvError::Invalid`], [`PcvError::PoolClosed`]) as is.
    #[instrument(name = "resolve", skip(self), fields(suite = %self.ctx.suite_id()))]
    pub async fn resolve(&self, test: &str) -> PcvResult<Resolution> {
        let requirement = match self.table.lookup(test) {
            Some(Binding::Requirement(requirement)) => requirement,
            Some(Binding::NoFixture) | None => return Ok(Resolution::NoFixture),
        };

        let caps = self.ctx.capabilities().await?;
        match self
            .ctx
            .gate()
            .evaluate_with(self.ctx.provider(), &caps, &requirement.gate_query())
            .await?
        {
            Verdict::Run => {}
            Verdict::Skip { reason } => {
                info!(test, %reason, "fixture skipped");
                return Ok(Resolution::Skipped { reason });
            }
            Verdict::Fail { reason } => return Err(PcvError::precondition(reason)),
        }

        let state = match requirement.pre_state {
            PreState::Any => None,
            PreState::Exactly(state) => Some(state),
            PreState::FirstAllowing(op) => {
                if let Some(state) = caps.first_state_allowing(requirement.kind, op) {
                    Some(state)
                } else {
                    let reason = format!("{op} is not allowed for {} in any state", requirement.kind);
                    info!(test, %reason, "fixture skipped");
                    return Ok(Resolution::Skipped { reason });
                }
            }
        };

        let realized = match requirement.pool_key(state) {
            Some(key) => self.resolve_pooled(test, requirement, key, &caps).await,
            None => self.provision_fresh(test, requirement, state, &caps).await,
        };
        self.classify(test, requirement, realized)
    }

    fn classify(
        &self,
        test: &str,
        requirement: &FixtureRequirement,
        realized: PcvResult<ManagedResource>,
    ) -> PcvResult<Resolution> {
        match realized {
            Ok(resource) => {
                debug!(test, id = %resource.id, state = %resource.state, "fixture ready");
                Ok(Resolution::Ready { resource })
            }
            Err(err @ PcvError::NotSubscribed { .. }) => {
                info!(test, %err, "fixture not subscribed");
                Ok(Resolution::NotSubscribed {
                    reason: err.to_string(),
                })
            }
            Err(err) if err.is_skip() => Ok(Resolution::Skipped {
                reason: err.to_string(),
            }),
            Err(err @ (PcvError::Invalid { .. } | PcvError::Internal { .. } | PcvError::PoolClosed)) => {
                Err(err)
            }
            Err(err) => match requirement.on_missing {
                Absence::Warn => {
                    warn!(test, suite = %self.ctx.suite_id(), %err, "fixture missing");
                    Ok(Resolution::Missing {
                        reason: err.to_string(),
                    })
                }
                Absence::Fail => Err(PcvError::FixtureUnavailable {
                    test: test.to_string(),
                    reason: err.to_string(),
                }),
            },
        }
    }

    async fn resolve_pooled(
        &self,
        test: &str,
        requirement: &FixtureRequirement,
        key: PoolKey,
        caps: &CapabilitySet,
    ) -> PcvResult<ManagedResource> {
        let target = key.state;
        self.ctx
            .pool()
            .lookup_or_prepare(
                key,
                || self.acquire(test, requirement),
                |resource| self.prepare(requirement, resource, target, caps),
            )
            .await
    }

    /// Pool prepare step: refresh the observation, reject vanished or broken
    /// fixtures, then settle into `target`. Runs with the key's slot held.
    async fn prepare(
        &self,
        requirement: &FixtureRequirement,
        cached: ManagedResource,
        target: Option<ResourceState>,
        caps: &CapabilitySet,
    ) -> PcvResult<Prepared> {
        let observed = match self.ctx.provider().fetch(cached.kind, &cached.id).await {
            Ok(Some(observed)) => observed,
            Ok(None) => {
                warn!(id = %cached.id, kind = %cached.kind, "pooled fixture vanished");
                return Ok(Prepared::Stale);
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                debug!(id = %cached.id, %err, "refresh failed, using cached observation");
                cached
            }
        };
        observed.validate()?;

        if observed.state.is_deletion() || observed.state == ResourceState::Error {
            warn!(id = %observed.id, state = %observed.state, "pooled fixture unusable");
            return Ok(Prepared::Stale);
        }

        let settled = match requirement.policy {
            // Read-only fixtures are never mutated, only waited on.
            ReusePolicy::Stateless => {
                let settled = self.settle(observed, None, caps).await?;
                if target.is_some_and(|want| want != settled.state) {
                    return Err(PcvError::precondition(format!(
                        "{} {} is {} instead of {target:?}",
                        settled.kind, settled.id, settled.state
                    )));
                }
                settled
            }
            _ => self.settle(observed, target, caps).await?,
        };
        Ok(Prepared::Ready(settled))
    }

    /// Pool factory: discover a read-only fixture or provision a new one.
    async fn acquire(&self, test: &str, requirement: &FixtureRequirement) -> PcvResult<Acquired> {
        if requirement.policy == ReusePolicy::Stateless {
            if let Some(found) = self.discover(requirement).await? {
                info!(test, id = %found.id, kind = %found.kind, "discovered fixture");
                return Ok(Acquired::discovered(found));
            }
        }
        self.create(test, requirement).await.map(Acquired::created)
    }

    async fn discover(&self, requirement: &FixtureRequirement) -> PcvResult<Option<ManagedResource>> {
        let mut filter = ResourceFilter::all();
        if let PreState::Exactly(state) = requirement.pre_state {
            filter = filter.in_state(state);
        }
        if let Some(dc) = requirement
            .placement
            .data_center
            .as_ref()
            .or(self.ctx.config().data_center.as_ref())
        {
            filter = filter.in_data_center(dc.clone());
        }

        let mut listed = self.ctx.provider().list(requirement.kind, filter.clone());
        while let Some(item) = listed.next().await {
            let resource = item?;
            if filter.matches(&resource) && !resource.state.is_deletion() {
                resource.validate()?;
                return Ok(Some(resource));
            }
        }
        Ok(None)
    }

    async fn create(&self, test: &str, requirement: &FixtureRequirement) -> PcvResult<ManagedResource> {
        let spec = requirement.spec(
            self.ctx.resource_name(test),
            &self.ctx.config().default_placement(),
        );
        let created = self.ctx.provider().create(requirement.kind, spec).await?;
        created.validate()?;
        info!(
            test,
            id = %created.id,
            kind = %created.kind,
            policy = %requirement.policy,
            "provisioned fixture"
        );
        Ok(created)
    }

    async fn provision_fresh(
        &self,
        test: &str,
        requirement: &FixtureRequirement,
        state: Option<ResourceState>,
        caps: &CapabilitySet,
    ) -> PcvResult<ManagedResource> {
        let created = self.create(test, requirement).await?;
        if let Err(err) =
            self.ctx
                .pool()
                .register(&created, requirement.policy, CleanupObligation::Delete)
        {
            // Nothing will drain it, so reclaim it here.
            if let Err(delete_err) = self
                .ctx
                .provider()
                .transition(created.kind, &created.id, Operation::Delete)
                .await
            {
                warn!(id = %created.id, %delete_err, "unregistered fixture left behind");
            }
            return Err(err);
        }
        self.settle(created, state, caps).await
    }

    /// Wait out transitional states, then drive `resource` into `target`.
    ///
    /// With no target, any settled state is accepted.
    async fn settle(
        &self,
        resource: ManagedResource,
        target: Option<ResourceState>,
        caps: &CapabilitySet,
    ) -> PcvResult<ManagedResource> {
        let mut current = resource;
        for _ in 0..=MAX_HOPS {
            if current.state.is_transitional() {
                let settles_to = current
                    .state
                    .settles_to()
                    .unwrap_or_else(|| current.kind.ready_state());
                current = self
                    .ctx
                    .await_state(&current, settles_to, self.ctx.config().timeouts.launch)
                    .await?
                    .into_converged(settles_to)?;
                continue;
            }

            let Some(target) = target else {
                return Ok(current);
            };
            if current.state == target {
                return Ok(current);
            }

            let op = plan_transition(current.state, target).ok_or_else(|| {
                PcvError::precondition(format!(
                    "no way to drive {} from {} to {target}",
                    current.id, current.state
                ))
            })?;
            if !caps.can(current.kind, op.kind(), current.state) {
                return Err(PcvError::unsupported(format!(
                    "{op} on {} in state {}",
                    current.kind, current.state
                )));
            }

            debug!(id = %current.id, from = %current.state, %target, %op, "driving fixture");
            self.ctx
                .provider()
                .transition(current.kind, &current.id, op.clone())
                .await?;
            let expected = op.expected_state().unwrap_or(target);
            current = self
                .ctx
                .await_state(&current, expected, self.ctx.timeout_for(op.kind()))
                .await?
                .into_converged(expected)?;
        }
        Err(PcvError::precondition(format!(
            "{} did not settle after {MAX_HOPS} operations",
            current.id
        )))
    }
}
