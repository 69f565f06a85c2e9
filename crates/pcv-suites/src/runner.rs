//! Suite definitions and the runner loop.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use pcv_core::{PcvResult, Provider};
use pcv_fixture::{
    FixtureConfig, RequirementTable, SuiteContext, SuiteReport, TestLifecycleController, TestScope,
};
use tracing::info;

/// Body of one conformance test.
pub type TestFn = fn(TestScope) -> BoxFuture<'static, PcvResult<()>>;

/// A named test body.
#[derive(Clone, Copy)]
pub struct TestCase {
    pub name: &'static str,
    pub body: TestFn,
}

impl TestCase {
    #[must_use]
    pub const fn new(name: &'static str, body: TestFn) -> Self {
        Self { name, body }
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TestCase").field(&self.name).finish()
    }
}

/// A suite: its tests in run order plus the fixtures they need.
#[derive(Debug, Clone)]
pub struct SuiteDefinition {
    pub id: &'static str,
    pub tests: Vec<TestCase>,
    pub requirements: RequirementTable,
}

impl SuiteDefinition {
    /// Keep only the named tests, in their original order.
    #[must_use]
    pub fn only(mut self, names: &[&str]) -> Self {
        self.tests.retain(|case| names.contains(&case.name));
        self
    }

    #[must_use]
    pub fn test_names(&self) -> Vec<&'static str> {
        self.tests.iter().map(|case| case.name).collect()
    }
}

/// Run every test of `suite` against `provider` and drain its fixtures.
///
/// Test failures are recorded in the report, not returned.
///
/// # Errors
/// Returns [`pcv_core::PcvError::Config`] if `config` does not validate.
pub async fn run_suite(
    provider: Arc<dyn Provider>,
    config: FixtureConfig,
    suite: SuiteDefinition,
) -> PcvResult<SuiteReport> {
    let ctx = SuiteContext::init(suite.id, provider, config)?;
    let controller = TestLifecycleController::new(ctx, suite.requirements);
    for case in &suite.tests {
        controller.run(case.name, case.body).await;
    }
    let report = controller.finish().await;
    let counts = report.counts();
    info!(
        suite = suite.id,
        passed = counts.passed,
        warnings = counts.passed_with_warnings,
        skipped = counts.skipped,
        failed = counts.failed,
        "suite complete"
    );
    Ok(report)
}

/// Run the compute, queue and database suites concurrently, each with its
/// own context and pool.
///
/// # Errors
/// Returns [`pcv_core::PcvError::Config`] if `config` does not validate.
pub async fn run_all(provider: Arc<dyn Provider>, config: FixtureConfig) -> PcvResult<Vec<SuiteReport>> {
    let suites = [crate::compute::suite(), crate::queue::suite(), crate::database::suite()];
    future::try_join_all(
        suites
            .into_iter()
            .map(|suite| run_suite(Arc::clone(&provider), config.clone(), suite)),
    )
    .await
}
