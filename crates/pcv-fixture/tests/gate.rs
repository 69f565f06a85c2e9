//! Companion lookups are scoped to the suite's region and data center.

use pcv_core::{Feature, ManagedResource, Placement, ResourceKind, ResourceState};
use pcv_fixture::{CapabilityGate, CapabilityQuery, Verdict};
use pcv_testkit::{fixtures, MockProvider};

fn gate() -> CapabilityGate {
    CapabilityGate::new(fixtures::TEST_REGION).in_data_center(Some("dc-1".into()))
}

fn affinity_group(id: &str, placement: Placement) -> ManagedResource {
    ManagedResource::new(id, ResourceKind::AffinityGroup, id, ResourceState::Available)
        .with_placement(placement)
}

fn affinity_query() -> CapabilityQuery {
    CapabilityQuery::with_companion(Feature::AffinityGroups, ResourceKind::AffinityGroup)
}

#[tokio::test]
async fn companions_elsewhere_do_not_count() {
    pcv_testkit::init_test_tracing();
    let provider = MockProvider::new(fixtures::placement_capabilities());
    provider.seed(affinity_group("ag-far", Placement::in_region("elsewhere-1")));
    provider.seed(affinity_group(
        "ag-next-door",
        Placement::in_region(fixtures::TEST_REGION).with_data_center("dc-2"),
    ));

    let verdict = gate().evaluate(&provider, &affinity_query()).await.unwrap();
    assert!(
        matches!(&verdict, Verdict::Fail { reason } if reason.contains(fixtures::TEST_REGION)),
        "{verdict}"
    );
    assert!(gate()
        .find_companion(&provider, ResourceKind::AffinityGroup)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn companion_in_scope_is_found() {
    let provider = MockProvider::new(fixtures::placement_capabilities());
    provider.seed(affinity_group("ag-far", Placement::in_region("elsewhere-1")));
    provider.seed(affinity_group(
        "ag-near",
        Placement::in_region(fixtures::TEST_REGION).with_data_center("dc-1"),
    ));

    let verdict = gate().evaluate(&provider, &affinity_query()).await.unwrap();
    assert!(verdict.is_run(), "{verdict}");
    let found = gate()
        .find_companion(&provider, ResourceKind::AffinityGroup)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id.as_str(), "ag-near");
}

#[tokio::test]
async fn unplaced_companion_counts_everywhere() {
    let provider = MockProvider::new(fixtures::placement_capabilities());
    provider.seed(affinity_group("ag-global", Placement::default()));

    let verdict = gate().evaluate(&provider, &affinity_query()).await.unwrap();
    assert!(verdict.is_run(), "{verdict}");
}

#[tokio::test]
async fn deleted_companion_does_not_count() {
    let provider = MockProvider::new(fixtures::placement_capabilities());
    let mut gone = affinity_group("ag-gone", Placement::in_region(fixtures::TEST_REGION));
    gone.state = ResourceState::Terminated;
    provider.seed(gone);

    let verdict = gate().evaluate(&provider, &affinity_query()).await.unwrap();
    assert!(matches!(verdict, Verdict::Fail { .. }), "{verdict}");
}
