//! Begin/end bracketing around each test.
//!
//! [`TestLifecycleController::run`] resolves the test's fixture, runs the
//! body inside a `test` span, and releases every single-use resource the
//! test owns whether the body returned, failed or panicked.
//! [`TestLifecycleController::finish`] drains the suite's pool and builds the
//! [`SuiteReport`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use pcv_core::{ManagedResource, PcvError, PcvResult, ResourceId, ReusePolicy};
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

use crate::{
    Binding, CapabilityQuery, CleanupObligation, FixtureOrchestrator, Note, NoteLevel,
    RequirementTable, Resolution, SuiteContext, SuiteReport, TestOutcome, TestRecord, Verdict,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test scope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ScopeState {
    notes: Vec<Note>,
    /// Single-use resources released when the test ends.
    owned: Vec<ResourceId>,
    expects_deletion: bool,
}

#[derive(Debug)]
struct ScopeInner {
    ctx: Arc<SuiteContext>,
    test: String,
    resolution: Resolution,
    started_at: chrono::DateTime<Utc>,
    started: Instant,
    state: Mutex<ScopeState>,
}

/// Handle a test body uses to reach its fixture and record notes.
///
/// Cheap to clone; clones share notes and owned resources.
#[derive(Debug, Clone)]
pub struct TestScope {
    inner: Arc<ScopeInner>,
}

impl TestScope {
    fn new(ctx: Arc<SuiteContext>, test: &str, resolution: Resolution) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                ctx,
                test: test.to_string(),
                resolution,
                started_at: Utc::now(),
                started: Instant::now(),
                state: Mutex::new(ScopeState::default()),
            }),
        }
    }

    #[must_use]
    pub fn test(&self) -> &str {
        &self.inner.test
    }

    #[must_use]
    pub fn ctx(&self) -> &SuiteContext {
        &self.inner.ctx
    }

    #[must_use]
    pub fn resolution(&self) -> &Resolution {
        &self.inner.resolution
    }

    #[must_use]
    pub fn fixture(&self) -> Option<&ManagedResource> {
        self.inner.resolution.resource()
    }

    /// The resolved fixture.
    ///
    /// # Errors
    /// - [`PcvError::Unsupported`] if the account is not subscribed, so the
    ///   test is reported as skipped.
    /// - [`PcvError::FixtureUnavailable`] for any other absence.
    pub fn require_fixture(&self) -> PcvResult<&ManagedResource> {
        match &self.inner.resolution {
            Resolution::Ready { resource } => Ok(resource),
            Resolution::NotSubscribed { reason } => Err(PcvError::unsupported(reason.clone())),
            other => Err(PcvError::FixtureUnavailable {
                test: self.inner.test.clone(),
                reason: format!("{other:?}"),
            }),
        }
    }

    /// Name for a resource this test provisions itself.
    #[must_use]
    pub fn resource_name(&self) -> String {
        self.inner.ctx.resource_name(&self.inner.test)
    }

    fn note(&self, level: NoteLevel, message: impl Into<String>) {
        self.inner.state.lock().notes.push(Note::new(level, message));
    }

    pub fn ok(&self, message: impl Into<String>) {
        self.note(NoteLevel::Ok, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(test = %self.inner.test, %message, "test warning");
        self.note(NoteLevel::Warn, message);
    }

    pub fn out(&self, message: impl Into<String>) {
        self.note(NoteLevel::Out, message);
    }

    /// Put a resource the test provisioned itself under cleanup. It is
    /// deleted when the test ends, or at the latest during suite teardown.
    ///
    /// # Errors
    /// Returns [`PcvError::PoolClosed`] after teardown has started.
    pub fn track(&self, resource: &ManagedResource) -> PcvResult<()> {
        self.inner
            .ctx
            .pool()
            .register(resource, ReusePolicy::Private, CleanupObligation::Delete)?;
        self.own(resource.id.clone());
        Ok(())
    }

    fn own(&self, id: ResourceId) {
        self.inner.state.lock().owned.push(id);
    }

    /// Declare that the test deletes its fixture itself, so its
    /// disappearance is the expected result rather than a warning.
    pub fn expect_deletion(&self) {
        self.inner.state.lock().expects_deletion = true;
    }

    /// Gate the rest of the test on a capability.
    ///
    /// # Errors
    /// - [`PcvError::Unsupported`] when the capability is absent (the test is
    ///   skipped and the operation is never attempted).
    /// - [`PcvError::PreconditionFailed`] when a companion fixture is missing.
    pub async fn require(&self, query: &CapabilityQuery) -> PcvResult<()> {
        match self.inner.ctx.check(query).await? {
            Verdict::Run => Ok(()),
            Verdict::Skip { reason } => Err(PcvError::unsupported(reason)),
            Verdict::Fail { reason } => Err(PcvError::precondition(reason)),
        }
    }

    /// Like [`TestScope::require`], but returns the verdict as a flag for
    /// tests that branch on it.
    ///
    /// # Errors
    /// Propagates provider errors and companion-fixture failures.
    pub async fn supports(&self, query: &CapabilityQuery) -> PcvResult<bool> {
        match self.inner.ctx.check(query).await? {
            Verdict::Run => Ok(true),
            Verdict::Skip { .. } => Ok(false),
            Verdict::Fail { reason } => Err(PcvError::precondition(reason)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// What [`TestLifecycleController::begin`] decided.
#[derive(Debug)]
pub enum Begin {
    /// Run the test body with this scope.
    Run(TestScope),
    /// The test concluded without running (skipped, or no usable fixture).
    Concluded(TestRecord),
}

/// Drives begin/end around every test of one suite.
#[derive(Debug)]
pub struct TestLifecycleController {
    orchestrator: FixtureOrchestrator,
    records: Mutex<Vec<TestRecord>>,
    started_at: chrono::DateTime<Utc>,
}

impl TestLifecycleController {
    #[must_use]
    pub fn new(ctx: Arc<SuiteContext>, table: RequirementTable) -> Self {
        Self {
            orchestrator: FixtureOrchestrator::new(ctx, table),
            records: Mutex::new(Vec::new()),
            started_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn ctx(&self) -> &Arc<SuiteContext> {
        self.orchestrator.context()
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &FixtureOrchestrator {
        &self.orchestrator
    }

    /// Records of tests finished so far.
    #[must_use]
    pub fn records(&self) -> Vec<TestRecord> {
        self.records.lock().clone()
    }

    /// Resolve the fixture for `test` and decide whether the body runs.
    pub async fn begin(&self, test: &str) -> Begin {
        let ctx = Arc::clone(self.ctx());
        let single_use = matches!(
            self.orchestrator.table().lookup(test),
            Some(Binding::Requirement(r)) if !r.policy.is_pooled()
        );

        let resolution = match self.orchestrator.resolve(test).await {
            Ok(resolution) => resolution,
            Err(err) => {
                error!(test, %err, "fixture resolution failed");
                let scope = TestScope::new(ctx, test, Resolution::NoFixture);
                return Begin::Concluded(self.conclude(&scope, Err(err)).await);
            }
        };

        let scope = TestScope::new(ctx, test, resolution);
        match scope.resolution() {
            Resolution::Skipped { reason } => {
                let reason = reason.clone();
                return Begin::Concluded(
                    self.conclude(&scope, Err(PcvError::unsupported(reason))).await,
                );
            }
            Resolution::Missing { reason } => {
                scope.warn(format!("no fixture: {reason}"));
                return Begin::Concluded(self.conclude(&scope, Ok(())).await);
            }
            Resolution::Ready { resource } if single_use => scope.own(resource.id.clone()),
            _ => {}
        }
        Begin::Run(scope)
    }

    /// Release the test's single-use resources and record its outcome.
    pub async fn end(&self, scope: TestScope, result: PcvResult<()>) -> TestRecord {
        self.conclude(&scope, result).await
    }

    /// Run one test: begin, body, end. Panics in `body` fail the test; its
    /// resources are released either way.
    pub async fn run<F, Fut>(&self, test: &str, body: F) -> TestOutcome
    where
        F: FnOnce(TestScope) -> Fut,
        Fut: Future<Output = PcvResult<()>>,
    {
        let span = info_span!("test", suite = %self.ctx().suite_id(), test);
        async {
            let scope = match self.begin(test).await {
                Begin::Run(scope) => scope,
                Begin::Concluded(record) => return record.outcome,
            };

            let result = match AssertUnwindSafe(body(scope.clone())).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(PcvError::internal(format!(
                    "test panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };
            self.end(scope, result).await.outcome
        }
        .instrument(span)
        .await
    }

    async fn conclude(&self, scope: &TestScope, result: PcvResult<()>) -> TestRecord {
        let (owned, expects_deletion) = {
            let mut state = scope.inner.state.lock();
            (std::mem::take(&mut state.owned), state.expects_deletion)
        };

        for id in owned.iter().rev() {
            if let Err(err) = scope.ctx().pool().release(id).await {
                scope.warn(format!("cleanup of {id} failed: {err}"));
            }
        }

        let (mut outcome, reason, error) = match result {
            Ok(()) => (TestOutcome::Passed, None, None),
            Err(err) => {
                let outcome = TestOutcome::for_error(&err, expects_deletion);
                match (&err, outcome) {
                    (PcvError::Lost { .. }, TestOutcome::Passed) => {
                        scope.ok(format!("resource gone as expected: {err}"));
                    }
                    (_, TestOutcome::PassedWithWarnings) => scope.warn(err.to_string()),
                    _ => {}
                }
                (outcome, Some(err.to_string()), Some(err))
            }
        };

        let state = scope.inner.state.lock();
        if outcome == TestOutcome::Passed && state.notes.iter().any(|n| n.level == NoteLevel::Warn) {
            outcome = TestOutcome::PassedWithWarnings;
        }
        let finished_at = Utc::now();
        let record = TestRecord {
            suite: scope.ctx().suite_id().to_string(),
            test: scope.test().to_string(),
            outcome,
            reason,
            error,
            fixture: scope.fixture().map(|r| r.id.clone()),
            notes: state.notes.clone(),
            started_at: scope.inner.started_at,
            finished_at,
            duration_ms: u64::try_from(scope.inner.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        drop(state);

        match outcome {
            TestOutcome::Failed => {
                error!(test = %record.test, reason = ?record.reason, "test failed");
            }
            _ => info!(test = %record.test, %outcome, duration_ms = record.duration_ms, "test finished"),
        }
        self.records.lock().push(record.clone());
        record
    }

    /// Drain the pool and build the suite report.
    pub async fn finish(&self) -> SuiteReport {
        let ctx = self.ctx();
        let drain = ctx.teardown().await;
        for warning in drain.warnings() {
            warn!(suite = %ctx.suite_id(), %warning, "cleanup warning");
        }
        SuiteReport {
            suite: ctx.suite_id().to_string(),
            run_id: ctx.run_id(),
            provider: ctx.provider().name().to_string(),
            region: ctx.config().region.clone(),
            records: std::mem::take(&mut *self.records.lock()),
            drain,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
