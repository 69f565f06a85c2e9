//! Resource pool: idempotent lookup, LIFO teardown, best-effort cleanup.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pcv_core::{ManagedResource, PcvError, ResourceKind, ResourceState, ReusePolicy};
use pcv_fixture::{Acquired, CleanupObligation, PoolKey, ReleaseOutcome, ResourcePool};
use pcv_testkit::{fixtures, MockProvider};

fn setup() -> (Arc<MockProvider>, ResourcePool) {
    pcv_testkit::init_test_tracing();
    let provider = Arc::new(MockProvider::new(fixtures::full_compute_capabilities()));
    let pool = ResourcePool::new(provider.clone());
    (provider, pool)
}

fn seeded(provider: &MockProvider, id: &str) -> ManagedResource {
    let vm = fixtures::running_instance(id);
    provider.seed(vm.clone());
    vm
}

fn stopped_key() -> PoolKey {
    PoolKey::new(
        ResourceKind::Instance,
        ReusePolicy::Stateful,
        Some(ResourceState::Stopped),
    )
}

#[tokio::test(start_paused = true)]
async fn concurrent_lookups_run_one_factory() {
    let (provider, pool) = setup();
    let vm = seeded(&provider, "i-1");
    let calls = AtomicUsize::new(0);

    let (pool_ref, calls_ref, vm_ref) = (&pool, &calls, &vm);
    let lookup = move || async move {
        pool_ref
            .lookup_or_create(stopped_key(), || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Acquired::created(vm_ref.clone()))
            })
            .await
    };
    let results = futures_util::future::join_all((0..5).map(|_| lookup())).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap().id, vm.id);
    }
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.lookup(&stopped_key()).await.map(|r| r.id), Some(vm.id));
}

#[tokio::test]
async fn distinct_keys_get_distinct_fixtures() {
    let (provider, pool) = setup();
    let a = seeded(&provider, "i-a");
    let b = seeded(&provider, "i-b");
    let running = PoolKey::new(
        ResourceKind::Instance,
        ReusePolicy::Stateful,
        Some(ResourceState::Running),
    );

    let got_a = pool
        .lookup_or_create(stopped_key(), || async { Ok(Acquired::created(a.clone())) })
        .await
        .unwrap();
    let got_b = pool
        .lookup_or_create(running, || async { Ok(Acquired::created(b.clone())) })
        .await
        .unwrap();

    assert_ne!(got_a.id, got_b.id);
    assert_eq!(pool.len(), 2);
}

#[tokio::test]
async fn failed_factory_leaves_key_empty() {
    let (provider, pool) = setup();
    let vm = seeded(&provider, "i-1");

    let err = pool
        .lookup_or_create(stopped_key(), || async {
            Err(PcvError::QuotaExceeded {
                kind: ResourceKind::Instance,
                message: "0 of 0 left".into(),
            })
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "quota_exceeded");
    assert!(pool.is_empty());

    let got = pool
        .lookup_or_create(stopped_key(), || async { Ok(Acquired::created(vm.clone())) })
        .await
        .unwrap();
    assert_eq!(got.id, vm.id);
}

#[tokio::test]
async fn drain_deletes_in_reverse_insertion_order() {
    let (provider, pool) = setup();
    let ids: Vec<_> = ["i-1", "i-2", "i-3"]
        .into_iter()
        .map(|id| seeded(&provider, id))
        .map(|vm| {
            pool.register(&vm, ReusePolicy::Private, CleanupObligation::Delete)
                .unwrap();
            vm.id
        })
        .collect();

    let report = pool.drain_all().await;

    let mut expected = ids.clone();
    expected.reverse();
    assert_eq!(provider.deletes(), expected);
    assert_eq!(report.deleted, expected);
    assert!(report.is_clean());
    assert!(provider.is_empty());
    assert!(pool.is_empty());
}

#[tokio::test]
async fn drain_continues_past_failures() {
    let (provider, pool) = setup();
    let first = seeded(&provider, "i-1");
    let stuck = seeded(&provider, "i-2");
    let last = seeded(&provider, "i-3");
    for vm in [&first, &stuck, &last] {
        pool.register(vm, ReusePolicy::Private, CleanupObligation::Delete)
            .unwrap();
    }
    provider.fail_delete(&stuck.id, PcvError::provider("mock", "volume still attached"));

    let report = pool.drain_all().await;

    assert_eq!(report.deleted, vec![last.id.clone(), first.id.clone()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, stuck.id);
    assert!(!report.is_clean());
    assert!(report.warnings()[0].contains("volume still attached"));
}

#[tokio::test]
async fn drain_tolerates_resources_already_gone() {
    let (provider, pool) = setup();
    let vm = seeded(&provider, "i-1");
    pool.register(&vm, ReusePolicy::Removed, CleanupObligation::Delete)
        .unwrap();
    provider.vanish(&vm.id);

    let report = pool.drain_all().await;

    assert_eq!(report.already_gone, vec![vm.id]);
    assert!(report.deleted.is_empty());
    assert!(report.is_clean());
    assert!(provider.deletes().is_empty());
}

#[tokio::test]
async fn retained_fixtures_are_left_alone() {
    let (provider, pool) = setup();
    let borrowed = seeded(&provider, "i-pre");
    pool.register(&borrowed, ReusePolicy::Stateless, CleanupObligation::Retain)
        .unwrap();

    let report = pool.drain_all().await;

    assert_eq!(report.retained, vec![borrowed.id.clone()]);
    assert!(provider.resource(&borrowed.id).is_some());
}

#[tokio::test]
async fn closed_pool_refuses_new_fixtures() {
    let (provider, pool) = setup();
    let vm = seeded(&provider, "i-1");
    pool.drain_all().await;

    assert!(pool.is_closed());
    let err = pool
        .lookup_or_create(stopped_key(), || async { Ok(Acquired::created(vm.clone())) })
        .await
        .unwrap_err();
    assert_eq!(err, PcvError::PoolClosed);
    assert_eq!(
        pool.register(&vm, ReusePolicy::Private, CleanupObligation::Delete),
        Err(PcvError::PoolClosed)
    );
}

#[tokio::test(start_paused = true)]
async fn drain_racing_a_factory_still_reclaims_its_fixture() {
    let (provider, pool) = setup();
    let pooled = seeded(&provider, "i-1");
    let late = seeded(&provider, "i-2");

    let (created, report, registered) = tokio::join!(
        pool.lookup_or_create(stopped_key(), || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Acquired::created(pooled.clone()))
        }),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            pool.drain_all().await
        },
        async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            pool.register(&late, ReusePolicy::Private, CleanupObligation::Delete)
        },
    );

    assert_eq!(created.unwrap().id, pooled.id);
    assert_eq!(registered, Err(PcvError::PoolClosed));
    assert_eq!(report.deleted, vec![pooled.id.clone()]);
    assert!(pool.is_empty());
    // Refused registrations were never owed a delete.
    assert!(provider.resource(&late.id).is_some());
}

#[tokio::test]
async fn release_reclaims_one_resource() {
    let (provider, pool) = setup();
    let vm = seeded(&provider, "i-1");
    let pooled = pool
        .lookup_or_create(stopped_key(), || async { Ok(Acquired::created(vm.clone())) })
        .await
        .unwrap();

    assert_eq!(pool.release(&pooled.id).await, Ok(ReleaseOutcome::Deleted));
    assert!(pool.is_empty());
    assert!(pool.lookup(&stopped_key()).await.is_none());
    assert_eq!(pool.release(&pooled.id).await, Ok(ReleaseOutcome::Untracked));
}

#[tokio::test]
async fn failed_release_keeps_ledger_row_for_drain() {
    let (provider, pool) = setup();
    let vm = seeded(&provider, "i-1");
    pool.register(&vm, ReusePolicy::Private, CleanupObligation::Delete)
        .unwrap();
    provider.fail_delete(&vm.id, PcvError::provider("mock", "busy"));

    assert!(pool.release(&vm.id).await.is_err());
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.drain_all().await.failures.len(), 1);
}
