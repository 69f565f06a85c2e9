//! Queue and database suites, plus all suites side by side.

use std::sync::Arc;

use pcv_core::{OperationKind, Placement, ResourceKind, ResourceState};
use pcv_fixture::{FixtureConfig, SuiteReport, TestOutcome};
use pcv_suites::{database, queue, run_all, run_suite, SuiteDefinition};
use pcv_testkit::{fixtures, MockProvider};

fn config() -> FixtureConfig {
    FixtureConfig {
        region: fixtures::TEST_REGION.into(),
        ..FixtureConfig::default()
    }
}

async fn run(provider: &MockProvider, suite: SuiteDefinition) -> SuiteReport {
    pcv_testkit::init_test_tracing();
    run_suite(Arc::new(provider.clone()), config(), suite)
        .await
        .unwrap()
}

fn outcome(report: &SuiteReport, test: &str) -> TestOutcome {
    report
        .record(test)
        .unwrap_or_else(|| panic!("no record for {test}"))
        .outcome
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn queue_suite_passes_and_cleans_up() {
    let provider = MockProvider::new(fixtures::queue_capabilities());
    let report = run(&provider, queue::suite()).await;

    for test in ["create_message_queue", "send_message", "remove_message_queue"] {
        assert_eq!(outcome(&report, test), TestOutcome::Passed, "{test}");
    }
    let removed = report.record("remove_message_queue").unwrap().fixture.clone().unwrap();
    let shared = report.record("send_message").unwrap().fixture.clone().unwrap();
    assert_ne!(removed, shared);
    assert!(provider.deletes().contains(&removed));
    assert!(provider.is_empty());
}

#[tokio::test(start_paused = true)]
async fn queue_suite_skips_without_queue_support() {
    let provider = MockProvider::new(fixtures::basic_compute_capabilities());
    let report = run(&provider, queue::suite()).await;

    assert!(report
        .records
        .iter()
        .all(|r| r.outcome == TestOutcome::Skipped));
    assert_eq!(provider.create_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn queue_removal_needs_delete_permission() {
    let caps = pcv_core::CapabilitySet::new(fixtures::TEST_REGION).with_kind(ResourceKind::Queue);
    let provider = MockProvider::new(caps);
    let report = run(&provider, queue::suite().only(&["remove_message_queue"])).await;

    assert_eq!(outcome(&report, "remove_message_queue"), TestOutcome::Skipped);
    assert!(provider.is_empty());
    // Released when the test ended, not deleted by the test.
    assert_eq!(provider.deletes().len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Database
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn database_suite_provisions_when_none_exists() {
    let provider = MockProvider::new(fixtures::database_capabilities(true));
    let report = run(&provider, database::suite()).await;

    assert!(report.all_passed(), "{}", report.to_json_lines());
    for record in &report.records {
        assert_eq!(record.outcome, TestOutcome::Passed, "{}", record.test);
    }
    assert_eq!(provider.create_count_for(ResourceKind::Database), 1);
    assert!(provider.is_empty());
}

#[tokio::test(start_paused = true)]
async fn existing_database_is_reused_and_kept() {
    let provider = MockProvider::new(fixtures::database_capabilities(true));
    let existing = fixtures::available_database("db-0001", "orders")
        .with_placement(Placement::in_region(fixtures::TEST_REGION));
    provider.seed(existing.clone());

    let report = run(&provider, database::suite()).await;

    assert!(report.all_passed(), "{}", report.to_json_lines());
    assert_eq!(
        report.record("get_database").unwrap().fixture.as_ref(),
        Some(&existing.id)
    );
    assert_eq!(provider.create_count(), 0);
    assert!(provider.deletes().is_empty());
    assert_eq!(report.drain.retained, vec![existing.id.clone()]);
    let kept = provider.resource(&existing.id).expect("database was kept");
    pcv_testkit::assert_valid(&kept);
    pcv_testkit::assert_state(&kept, ResourceState::Available);
}

#[tokio::test(start_paused = true)]
async fn database_in_another_region_fails_content_check() {
    let provider = MockProvider::new(fixtures::database_capabilities(true));
    provider.seed(
        fixtures::available_database("db-0001", "orders")
            .with_placement(Placement::in_region("elsewhere-1")),
    );

    let report = run(&provider, database::suite()).await;

    assert_eq!(outcome(&report, "get_database"), TestOutcome::Passed);
    assert_eq!(outcome(&report, "database_content"), TestOutcome::Failed);
    assert_eq!(outcome(&report, "list_databases"), TestOutcome::Failed);
    let record = report.record("database_content").unwrap();
    assert_eq!(
        record.error.as_ref().map(pcv_core::PcvError::code),
        Some("assertion_failed")
    );
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_database_account_sees_nothing() {
    let provider = MockProvider::new(fixtures::database_capabilities(false));
    let report = run(&provider, database::suite()).await;

    assert!(report.all_passed());
    assert_eq!(outcome(&report, "get_bogus_database"), TestOutcome::Passed);
    assert_eq!(outcome(&report, "get_database"), TestOutcome::Passed);
    assert_eq!(outcome(&report, "database_content"), TestOutcome::Skipped);
    assert_eq!(outcome(&report, "list_databases"), TestOutcome::Passed);
    assert_eq!(outcome(&report, "compare_list_and_fetch"), TestOutcome::Passed);
    assert!(provider.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_account_listing_databases_fails() {
    let provider = MockProvider::new(fixtures::database_capabilities(false));
    provider.seed(
        fixtures::available_database("db-0001", "leftover")
            .with_placement(Placement::in_region(fixtures::TEST_REGION)),
    );

    let report = run(&provider, database::suite().only(&["list_databases"])).await;

    assert_eq!(outcome(&report, "list_databases"), TestOutcome::Failed);
}

// ─────────────────────────────────────────────────────────────────────────────
// All suites
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn all_suites_run_side_by_side() {
    pcv_testkit::init_test_tracing();
    let caps = fixtures::full_compute_capabilities()
        .with_kind(ResourceKind::Queue)
        .with_kind(ResourceKind::Database)
        .allow(ResourceKind::Queue, OperationKind::Delete, [ResourceState::Available])
        .allow(ResourceKind::Database, OperationKind::Delete, [ResourceState::Available]);
    let provider = MockProvider::new(caps).with_products(fixtures::product_catalog());

    let reports = run_all(Arc::new(provider.clone()), config()).await.unwrap();

    let suites: Vec<&str> = reports.iter().map(|r| r.suite.as_str()).collect();
    assert_eq!(suites, vec!["compute", "queue", "database"]);
    for report in &reports {
        assert!(report.all_passed(), "{}", report.to_json_lines());
        assert_eq!(report.counts().failed, 0);
    }
    let run_ids: std::collections::HashSet<_> = reports.iter().map(|r| r.run_id).collect();
    assert_eq!(run_ids.len(), 3);
    assert!(provider.is_empty());
}

#[tokio::test]
async fn invalid_config_is_rejected_before_any_test() {
    let provider = MockProvider::new(fixtures::queue_capabilities());
    let mut config = config();
    config.region = String::new();

    let err = run_suite(Arc::new(provider.clone()), config, queue::suite())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "config");
    assert!(provider.calls().is_empty());
}
