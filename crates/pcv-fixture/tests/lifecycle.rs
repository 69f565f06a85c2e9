//! Begin/end bracketing, outcomes and the suite report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pcv_core::{Feature, PcvError, Provider, ResourceKind, ResourceSpec, ResourceState};
use pcv_fixture::{
    Begin, CapabilityQuery, FixtureConfig, FixtureRequirement, RequirementTable, SuiteContext,
    TestLifecycleController, TestOutcome,
};
use pcv_testkit::{fixtures, MockProvider};

fn compute() -> MockProvider {
    MockProvider::new(fixtures::full_compute_capabilities()).with_products(fixtures::product_catalog())
}

fn table() -> RequirementTable {
    RequirementTable::new()
        .bind(
            "terminate",
            FixtureRequirement::removed(ResourceKind::Instance).in_state(ResourceState::Running),
        )
        .bind(
            "reboot",
            FixtureRequirement::stateful(ResourceKind::Instance).in_state(ResourceState::Running),
        )
        .bind("send_message", FixtureRequirement::stateful(ResourceKind::Queue))
        .bind("get_database", FixtureRequirement::stateful(ResourceKind::Database))
        .bind(
            "pause",
            FixtureRequirement::stateful(ResourceKind::Instance)
                .in_state(ResourceState::Running)
                .soft(),
        )
        .bind(
            "launch_from_image",
            FixtureRequirement::private(ResourceKind::Instance).gated_by(
                CapabilityQuery::with_companion(Feature::ClientRequestToken, ResourceKind::Image),
            ),
        )
        .no_fixture("launch")
}

fn controller(provider: &MockProvider) -> TestLifecycleController {
    pcv_testkit::init_test_tracing();
    let config = FixtureConfig {
        region: fixtures::TEST_REGION.into(),
        ..FixtureConfig::default()
    };
    let ctx = SuiteContext::init("compute", Arc::new(provider.clone()), config).unwrap();
    TestLifecycleController::new(ctx, table())
}

#[tokio::test(start_paused = true)]
async fn removed_fixture_is_released_after_failure() {
    let provider = compute();
    let ctl = controller(&provider);

    let outcome = ctl
        .run("terminate", |scope| async move {
            scope.require_fixture()?;
            Err(PcvError::precondition("instance did not report an address"))
        })
        .await;

    assert_eq!(outcome, TestOutcome::Failed);
    let record = &ctl.records()[0];
    let fixture = record.fixture.clone().unwrap();
    assert_eq!(provider.deletes(), vec![fixture]);
    assert!(ctl.ctx().pool().is_empty());
    assert_eq!(record.error.as_ref().map(PcvError::code), Some("precondition_failed"));
}

#[tokio::test(start_paused = true)]
async fn panicking_test_fails_and_still_releases() {
    let provider = compute();
    let ctl = controller(&provider);

    let outcome = ctl
        .run("terminate", |scope| async move {
            let fixture = scope.require_fixture()?;
            assert_eq!(fixture.state, ResourceState::Stopped, "wrong launch state");
            Ok(())
        })
        .await;

    assert_eq!(outcome, TestOutcome::Failed);
    let record = &ctl.records()[0];
    assert!(record.reason.as_deref().unwrap().contains("test panicked"));
    assert!(record.reason.as_deref().unwrap().contains("wrong launch state"));
    assert_eq!(provider.deletes().len(), 1);
    assert!(provider.is_empty());
}

#[tokio::test]
async fn skipped_test_body_never_runs() {
    let provider = compute();
    let ctl = controller(&provider);
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    let outcome = ctl
        .run("send_message", |_scope| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert_eq!(outcome, TestOutcome::Skipped);
    assert!(!ran.load(Ordering::SeqCst));
    assert!(ctl.records()[0].reason.is_some());
}

#[tokio::test]
async fn unsubscribed_fixture_skips_the_test() {
    let provider = MockProvider::new(fixtures::database_capabilities(false));
    let ctl = controller(&provider);

    let outcome = ctl
        .run("get_database", |scope| async move {
            scope.require_fixture()?;
            Ok(())
        })
        .await;

    assert_eq!(outcome, TestOutcome::Skipped);
}

#[tokio::test]
async fn missing_soft_fixture_passes_with_warning() {
    let provider = compute();
    provider.fail_next_create(
        ResourceKind::Instance,
        PcvError::QuotaExceeded {
            kind: ResourceKind::Instance,
            message: "instance limit reached".into(),
        },
    );
    let ctl = controller(&provider);
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    let outcome = ctl
        .run("pause", |_scope| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert_eq!(outcome, TestOutcome::PassedWithWarnings);
    assert!(!ran.load(Ordering::SeqCst));
    assert!(ctl.records()[0].warnings()[0].contains("instance limit reached"));
}

#[tokio::test]
async fn resolution_error_fails_without_running() {
    let provider = compute();
    let ctl = controller(&provider);

    match ctl.begin("launch_from_image").await {
        Begin::Concluded(record) => {
            assert_eq!(record.outcome, TestOutcome::Failed);
            assert!(matches!(record.error, Some(PcvError::PreconditionFailed { .. })));
        }
        Begin::Run(_) => panic!("test should not run"),
    }
}

#[tokio::test(start_paused = true)]
async fn lost_fixture_passes_with_warning() {
    let provider = compute();
    let ctl = controller(&provider);
    let handle = provider.clone();

    let outcome = ctl
        .run("reboot", |scope| async move {
            let fixture = scope.require_fixture()?.clone();
            handle.vanish(&fixture.id);
            scope
                .ctx()
                .await_state(&fixture, ResourceState::Running, Duration::from_secs(3600))
                .await?
                .into_converged(ResourceState::Running)?;
            Ok(())
        })
        .await;

    assert_eq!(outcome, TestOutcome::PassedWithWarnings);
    assert!(!ctl.records()[0].warnings().is_empty());
}

#[tokio::test(start_paused = true)]
async fn expected_disappearance_passes() {
    let provider = compute();
    let ctl = controller(&provider);
    let handle = provider.clone();

    let outcome = ctl
        .run("terminate", |scope| async move {
            scope.expect_deletion();
            let fixture = scope.require_fixture()?.clone();
            handle.vanish(&fixture.id);
            scope
                .ctx()
                .await_state(&fixture, ResourceState::Stopped, Duration::from_secs(3600))
                .await?
                .into_converged(ResourceState::Stopped)?;
            Ok(())
        })
        .await;

    assert_eq!(outcome, TestOutcome::Passed);
    assert!(provider.deletes().is_empty());
}

#[tokio::test]
async fn tracked_resources_are_released_with_the_test() {
    let provider = compute();
    let ctl = controller(&provider);

    let outcome = ctl
        .run("launch", |scope| async move {
            let spec = ResourceSpec::named(scope.resource_name()).with_product("m1.small");
            let created = scope
                .ctx()
                .provider()
                .create(ResourceKind::Instance, spec)
                .await?;
            scope.track(&created)?;
            scope.ok(format!("launched {}", created.id));
            Ok(())
        })
        .await;

    assert_eq!(outcome, TestOutcome::Passed);
    assert_eq!(provider.deletes().len(), 1);
    assert!(provider.is_empty());
    assert!(ctl.ctx().pool().is_empty());
}

#[tokio::test]
async fn warning_note_downgrades_pass() {
    let provider = compute();
    let ctl = controller(&provider);

    let outcome = ctl
        .run("launch", |scope| async move {
            scope.warn("no private address reported");
            Ok(())
        })
        .await;

    assert_eq!(outcome, TestOutcome::PassedWithWarnings);
}

#[tokio::test]
async fn failed_release_becomes_a_warning() {
    let provider = compute();
    let ctl = controller(&provider);

    let Begin::Run(scope) = ctl.begin("terminate").await else {
        panic!("test should run");
    };
    let fixture = scope.fixture().unwrap().id.clone();
    provider.fail_delete(&fixture, PcvError::provider("mock", "termination protection"));

    let record = ctl.end(scope, Ok(())).await;
    assert_eq!(record.outcome, TestOutcome::PassedWithWarnings);
    assert!(record.warnings()[0].contains("termination protection"));

    let report = ctl.finish().await;
    assert!(report.all_passed());
    assert_eq!(report.cleanup_warnings().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn finish_drains_pool_and_reports() {
    let provider = compute();
    let ctl = controller(&provider);

    ctl.run("reboot", |scope| async move {
        scope.require_fixture()?;
        Ok(())
    })
    .await;
    ctl.run("send_message", |_scope| async move { Ok(()) }).await;

    let report = ctl.finish().await;
    let counts = report.counts();
    assert_eq!((counts.passed, counts.skipped, counts.failed), (1, 1, 0));
    assert_eq!(report.drain.deleted.len(), 1);
    assert!(provider.is_empty());
    assert!(ctl.ctx().pool().is_closed());

    let lines: Vec<serde_json::Value> = report
        .to_json_lines()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2]["type"], "summary");
    assert_eq!(lines[2]["provider"], "mock");
}
