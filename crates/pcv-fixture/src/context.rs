//! Suite-scoped context.
//!
//! One [`SuiteContext`] exists per running suite. It owns the resource pool
//! and carries the provider handle, configuration and helpers every other
//! component needs, so parallel suites never share mutable state.

use std::sync::Arc;
use std::time::Duration;

use pcv_core::{
    CapabilitySet, ManagedResource, NamingConvention, OperationKind, PcvResult, Provider,
    ResourceState,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    CapabilityGate, CapabilityQuery, Convergence, ConvergenceQuery, DrainReport, FixtureConfig,
    ResourcePool, StateConvergencePoller, Verdict,
};

/// Everything one suite run shares across its tests.
pub struct SuiteContext {
    suite_id: String,
    run_id: Uuid,
    provider: Arc<dyn Provider>,
    config: FixtureConfig,
    pool: ResourcePool,
    gate: CapabilityGate,
    poller: StateConvergencePoller,
    naming: NamingConvention,
}

impl std::fmt::Debug for SuiteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteContext")
            .field("suite_id", &self.suite_id)
            .field("run_id", &self.run_id)
            .field("provider", &self.provider.name())
            .field("region", &self.config.region)
            .finish_non_exhaustive()
    }
}

impl SuiteContext {
    /// Set up a suite against `provider`.
    ///
    /// # Errors
    /// Returns [`pcv_core::PcvError::Config`] if `config` does not validate.
    pub fn init(
        suite_id: impl Into<String>,
        provider: Arc<dyn Provider>,
        config: FixtureConfig,
    ) -> PcvResult<Arc<Self>> {
        config.validate()?;
        let suite_id = suite_id.into();
        let run_id = Uuid::new_v4();
        info!(
            suite = %suite_id,
            %run_id,
            provider = provider.name(),
            region = %config.region,
            "suite init"
        );
        Ok(Arc::new(Self {
            gate: CapabilityGate::new(config.region.clone())
                .in_data_center(config.data_center.clone()),
            poller: StateConvergencePoller::new(Arc::clone(&provider)),
            pool: ResourcePool::new(Arc::clone(&provider)),
            naming: config.naming_convention(),
            suite_id,
            run_id,
            provider,
            config,
        }))
    }

    #[must_use]
    pub fn suite_id(&self) -> &str {
        &self.suite_id
    }

    /// Unique id of this run, used to correlate log lines and reports.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    #[must_use]
    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    #[must_use]
    pub const fn config(&self) -> &FixtureConfig {
        &self.config
    }

    #[must_use]
    pub const fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    #[must_use]
    pub const fn gate(&self) -> &CapabilityGate {
        &self.gate
    }

    #[must_use]
    pub const fn poller(&self) -> &StateConvergencePoller {
        &self.poller
    }

    #[must_use]
    pub const fn naming(&self) -> &NamingConvention {
        &self.naming
    }

    /// Name for a resource created on behalf of `test`.
    #[must_use]
    pub fn resource_name(&self, test: &str) -> String {
        self.naming.name(&self.suite_id, test)
    }

    /// Live capability surface for the suite's region.
    ///
    /// # Errors
    /// Propagates provider errors.
    pub async fn capabilities(&self) -> PcvResult<CapabilitySet> {
        self.provider.capabilities(&self.config.region).await
    }

    /// Evaluate a capability query against the live provider.
    ///
    /// # Errors
    /// Propagates provider errors.
    pub async fn check(&self, query: &CapabilityQuery) -> PcvResult<Verdict> {
        self.gate.evaluate(self.provider.as_ref(), query).await
    }

    /// Configured deadline for an operation to converge.
    #[must_use]
    pub const fn timeout_for(&self, op: OperationKind) -> Duration {
        let timeouts = &self.config.timeouts;
        match op {
            OperationKind::Stop => timeouts.stop,
            OperationKind::Delete => timeouts.delete,
            _ => timeouts.state_change,
        }
    }

    /// Convergence query starting now with the configured poll settings.
    #[must_use]
    pub fn query(&self, target: ResourceState, timeout: Duration) -> ConvergenceQuery {
        ConvergenceQuery::new(target, timeout, &self.config.poll)
    }

    /// Wait for `resource` to reach `target` within `timeout`.
    ///
    /// # Errors
    /// Returns fatal observation errors only; see
    /// [`StateConvergencePoller::await_state`].
    pub async fn await_state(
        &self,
        resource: &ManagedResource,
        target: ResourceState,
        timeout: Duration,
    ) -> PcvResult<Convergence> {
        self.poller
            .await_state(resource, &self.query(target, timeout))
            .await
    }

    /// Reclaim every fixture the suite still owes.
    pub async fn teardown(&self) -> DrainReport {
        let report = self.pool.drain_all().await;
        info!(
            suite = %self.suite_id,
            run_id = %self.run_id,
            clean = report.is_clean(),
            "suite teardown"
        );
        report
    }
}
