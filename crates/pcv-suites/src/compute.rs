//! Stateful compute suite: virtual machine lifecycle.
//!
//! Every test that mutates an instance first asks the capability surface
//! whether the operation is allowed from the instance's current state. A
//! "no" skips the test without attempting the operation.

use futures_util::{FutureExt, StreamExt};
use pcv_core::{
    Feature, ManagedResource, Operation, OperationKind, PcvError, PcvResult, Placement,
    ResizeTarget, ResourceFilter, ResourceId, ResourceKind, ResourceSpec, ResourceState,
};
use pcv_fixture::{
    select, Binding, CapabilityQuery, Convergence, FixtureRequirement, RequirementTable,
    ResizeDirection, TestScope,
};
use tracing::{debug, info};

use crate::{SuiteDefinition, TestCase};

pub const SUITE_ID: &str = "compute";

/// Instances started by `launch_many`.
const LAUNCH_MANY_COUNT: usize = 2;

/// Private address requested by `launch_with_ip`.
const TEST_PRIVATE_IP: &str = "192.168.101.100";

/// Fixture bindings for the compute suite.
#[must_use]
pub fn requirements() -> RequirementTable {
    use ResourceState as S;

    let vm = |state| FixtureRequirement::stateful(ResourceKind::Instance).in_state(state);
    RequirementTable::new()
        .no_fixture("launch")
        .no_fixture("launch_many")
        .no_fixture("launch_with_client_request_token")
        .no_fixture("launch_with_ip")
        .no_fixture("launch_with_resource_pool")
        .no_fixture("launch_with_affinity_group")
        .no_fixture("launch_with_storage_pool")
        .no_fixture("launch_with_folder")
        .bind(
            "filter_instances",
            FixtureRequirement::private(ResourceKind::Instance).soft(),
        )
        .bind_all(["stop", "pause", "suspend", "reboot"], &vm(S::Running))
        .bind("start", vm(S::Stopped))
        .bind("unpause", vm(S::Paused))
        .bind("resume", vm(S::Suspended))
        .bind(
            "terminate",
            FixtureRequirement::removed(ResourceKind::Instance).in_state(S::Running),
        )
        .bind_prefix(
            "modify_instance",
            FixtureRequirement::stateful(ResourceKind::Instance).first_allowing(OperationKind::Resize),
        )
        .with_default(Binding::Requirement(FixtureRequirement::stateful(
            ResourceKind::Instance,
        )))
}

/// The compute suite in run order.
#[must_use]
pub fn suite() -> SuiteDefinition {
    SuiteDefinition {
        id: SUITE_ID,
        tests: vec![
            TestCase::new("launch", |s| launch(s).boxed()),
            TestCase::new("launch_many", |s| launch_many(s).boxed()),
            TestCase::new("launch_with_client_request_token", |s| {
                launch_with_client_request_token(s).boxed()
            }),
            TestCase::new("launch_with_ip", |s| launch_with_ip(s).boxed()),
            TestCase::new("launch_with_resource_pool", |s| launch_with_resource_pool(s).boxed()),
            TestCase::new("launch_with_affinity_group", |s| {
                launch_with_affinity_group(s).boxed()
            }),
            TestCase::new("launch_with_storage_pool", |s| launch_with_storage_pool(s).boxed()),
            TestCase::new("launch_with_folder", |s| launch_with_folder(s).boxed()),
            TestCase::new("filter_instances", |s| filter_instances(s).boxed()),
            TestCase::new("stop", |s| stop(s).boxed()),
            TestCase::new("start", |s| start(s).boxed()),
            TestCase::new("pause", |s| pause(s).boxed()),
            TestCase::new("unpause", |s| unpause(s).boxed()),
            TestCase::new("suspend", |s| suspend(s).boxed()),
            TestCase::new("resume", |s| resume(s).boxed()),
            TestCase::new("reboot", |s| reboot(s).boxed()),
            TestCase::new("enable_analytics", |s| enable_analytics(s).boxed()),
            TestCase::new("disable_analytics", |s| disable_analytics(s).boxed()),
            TestCase::new("modify_instance", |s| modify_instance(s).boxed()),
            TestCase::new("modify_instance_smaller", |s| modify_instance_smaller(s).boxed()),
            TestCase::new("terminate", |s| terminate(s).boxed()),
        ],
        requirements: requirements(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Fresh view of the test's fixture.
async fn current(scope: &TestScope) -> PcvResult<ManagedResource> {
    let fixture = scope.require_fixture()?;
    scope
        .ctx()
        .provider()
        .fetch(fixture.kind, &fixture.id)
        .await?
        .ok_or_else(|| PcvError::Lost {
            kind: fixture.kind,
            id: fixture.id.clone(),
            misses: 1,
        })
}

/// Gate on `op` from the instance's current state.
async fn require_from(scope: &TestScope, vm: &ManagedResource, op: OperationKind) -> PcvResult<()> {
    scope
        .require(&CapabilityQuery::operation(vm.kind, op, vm.state))
        .await
}

/// Issue `op` and wait for `vm` to settle in `target`.
async fn apply(
    scope: &TestScope,
    vm: &ManagedResource,
    op: Operation,
    target: ResourceState,
) -> PcvResult<Convergence> {
    let ctx = scope.ctx();
    ctx.provider().transition(vm.kind, &vm.id, op.clone()).await?;
    debug!(id = %vm.id, %op, %target, "operation issued");
    ctx.await_state(vm, target, ctx.timeout_for(op.kind())).await
}

/// Shared body of the single-operation lifecycle tests.
async fn exercise(scope: &TestScope, op: Operation) -> PcvResult<()> {
    let vm = current(scope).await?;
    require_from(scope, &vm, op.kind()).await?;
    let target = op
        .expected_state()
        .ok_or_else(|| PcvError::internal(format!("{op} has no settled state")))?;

    scope.out(format!("before {op}: {} is {}", vm.id, vm.state));
    let after = apply(scope, &vm, op.clone(), target)
        .await?
        .into_converged(target)?;
    scope.out(format!("after {op}: {} is {}", after.id, after.state));
    scope.ok(format!("{op} reached {target}"));
    Ok(())
}

fn expect_state(resource: &ManagedResource, state: ResourceState) -> PcvResult<()> {
    if resource.state == state {
        Ok(())
    } else {
        Err(PcvError::assertion(format!(
            "{} {} is {}, expected {state}",
            resource.kind, resource.id, resource.state
        )))
    }
}

/// Create an instance the test owns and wait for it to run.
///
/// Placement fields the spec leaves unset come from the suite config.
async fn launch_owned(scope: &TestScope, spec: ResourceSpec) -> PcvResult<ManagedResource> {
    let ctx = scope.ctx();
    let placement = spec.placement.clone().or(&ctx.config().default_placement());
    let spec = spec.with_placement(placement);
    let created = ctx.provider().create(ResourceKind::Instance, spec).await?;
    scope.track(&created)?;
    created.validate()?;

    let running = ctx
        .await_state(&created, ResourceState::Running, ctx.config().timeouts.launch)
        .await?
        .into_converged(ResourceState::Running)?;
    running.validate()?;
    info!(id = %running.id, product = ?running.product_id, "instance launched");
    Ok(running)
}

// ─────────────────────────────────────────────────────────────────────────────
// Launch
// ─────────────────────────────────────────────────────────────────────────────

/// Launch one instance, or confirm the provider refuses it when the account
/// is not subscribed.
///
/// # Errors
/// Fails the test on any unexpected provider answer.
pub async fn launch(scope: TestScope) -> PcvResult<()> {
    scope
        .require(&CapabilityQuery::kind(ResourceKind::Instance))
        .await?;
    let subscribed = scope
        .supports(&CapabilityQuery::subscribed(ResourceKind::Instance))
        .await?;
    let spec = ResourceSpec::named(scope.resource_name()).with_description("launch");

    if !subscribed {
        let refused = scope
            .ctx()
            .provider()
            .create(ResourceKind::Instance, spec)
            .await;
        return match refused {
            Err(PcvError::NotSubscribed { .. }) => {
                scope.ok("launch refused for unsubscribed account");
                Ok(())
            }
            Err(err) => Err(err),
            Ok(created) => {
                scope.track(&created)?;
                Err(PcvError::assertion(format!(
                    "launched {} without a subscription",
                    created.id
                )))
            }
        };
    }

    let vm = launch_owned(&scope, spec).await?;
    expect_state(&vm, ResourceState::Running)?;
    scope.ok(format!("launched {}", vm.id));
    Ok(())
}

/// Launch several instances in one test and check they are distinct.
///
/// # Errors
/// Fails the test if any launch fails or two launches share an identifier.
pub async fn launch_many(scope: TestScope) -> PcvResult<()> {
    scope
        .require(&CapabilityQuery::subscribed(ResourceKind::Instance))
        .await?;
    let base = scope.resource_name();
    let mut launched = Vec::with_capacity(LAUNCH_MANY_COUNT);
    for index in 0..LAUNCH_MANY_COUNT {
        let spec = ResourceSpec::named(format!("{base}-{index}"));
        launched.push(launch_owned(&scope, spec).await?);
    }
    for (index, vm) in launched.iter().enumerate() {
        if launched[..index].iter().any(|other| other.id == vm.id) {
            return Err(PcvError::assertion(format!("duplicate instance id {}", vm.id)));
        }
    }
    scope.ok(format!("launched {} instances", launched.len()));
    Ok(())
}

/// Launch with a client request token and check it is echoed back.
///
/// # Errors
/// Fails the test if the token does not round-trip.
pub async fn launch_with_client_request_token(scope: TestScope) -> PcvResult<()> {
    scope
        .require(&CapabilityQuery::all([
            CapabilityQuery::subscribed(ResourceKind::Instance),
            CapabilityQuery::feature(Feature::ClientRequestToken),
        ]))
        .await?;
    let token = scope.resource_name();
    let spec = ResourceSpec::named(token.clone()).with_client_request_token(token.clone());
    let vm = launch_owned(&scope, spec).await?;

    match vm.client_request_token.as_deref() {
        Some(echoed) if echoed == token => {
            scope.ok("client request token preserved");
            Ok(())
        }
        other => Err(PcvError::assertion(format!(
            "client request token {other:?}, expected {token}"
        ))),
    }
}

/// Launch with a user-defined private address and check it was honored.
///
/// # Errors
/// Fails the test if the instance comes up with another address.
pub async fn launch_with_ip(scope: TestScope) -> PcvResult<()> {
    scope
        .require(&CapabilityQuery::all([
            CapabilityQuery::subscribed(ResourceKind::Instance),
            CapabilityQuery::feature(Feature::UserDefinedPrivateIp),
        ]))
        .await?;
    let spec = ResourceSpec::named(scope.resource_name()).with_private_ip(TEST_PRIVATE_IP);
    let vm = launch_owned(&scope, spec).await?;

    match vm.private_ip.as_deref() {
        Some(ip) if ip == TEST_PRIVATE_IP => {
            scope.ok(format!("{} has private address {ip}", vm.id));
            Ok(())
        }
        other => Err(PcvError::assertion(format!(
            "{} has private address {other:?}, expected {TEST_PRIVATE_IP}",
            vm.id
        ))),
    }
}

/// Placement construct an instance can be launched into.
#[derive(Debug, Clone, Copy)]
enum PlacementTarget {
    ResourcePool,
    AffinityGroup,
    StoragePool,
    Folder,
}

impl PlacementTarget {
    const fn feature(self) -> Feature {
        match self {
            Self::ResourcePool => Feature::ResourcePools,
            Self::AffinityGroup => Feature::AffinityGroups,
            Self::StoragePool => Feature::StoragePools,
            Self::Folder => Feature::Folders,
        }
    }

    const fn kind(self) -> ResourceKind {
        match self {
            Self::ResourcePool => ResourceKind::ResourcePool,
            Self::AffinityGroup => ResourceKind::AffinityGroup,
            Self::StoragePool => ResourceKind::StoragePool,
            Self::Folder => ResourceKind::Folder,
        }
    }

    fn assign(self, placement: Placement, id: ResourceId) -> Placement {
        match self {
            Self::ResourcePool => placement.with_resource_pool(id),
            Self::AffinityGroup => placement.with_affinity_group(id),
            Self::StoragePool => placement.with_storage_pool(id),
            Self::Folder => placement.with_folder(id),
        }
    }

    const fn read(self, placement: &Placement) -> Option<&ResourceId> {
        match self {
            Self::ResourcePool => placement.resource_pool.as_ref(),
            Self::AffinityGroup => placement.affinity_group.as_ref(),
            Self::StoragePool => placement.storage_pool.as_ref(),
            Self::Folder => placement.folder.as_ref(),
        }
    }
}

/// Launch into the first companion of `target`'s kind and check the instance
/// reports it. A supported feature with no companion in reach fails the test.
async fn launch_into(scope: &TestScope, target: PlacementTarget) -> PcvResult<()> {
    let kind = target.kind();
    scope
        .require(&CapabilityQuery::all([
            CapabilityQuery::subscribed(ResourceKind::Instance),
            CapabilityQuery::with_companion(target.feature(), kind),
        ]))
        .await?;
    let ctx = scope.ctx();
    let companion = ctx
        .gate()
        .find_companion(ctx.provider(), kind)
        .await?
        .ok_or_else(|| PcvError::precondition(format!("no {kind} to launch into")))?;

    let placement = target.assign(ctx.config().default_placement(), companion.id.clone());
    let spec = ResourceSpec::named(scope.resource_name()).with_placement(placement);
    let vm = launch_owned(scope, spec).await?;

    match target.read(&vm.placement) {
        Some(id) if *id == companion.id => {
            scope.out(format!("{} in {kind} {id}", vm.id));
            scope.ok(format!("launched into {kind} {id}"));
            Ok(())
        }
        other => Err(PcvError::assertion(format!(
            "{} landed in {kind} {other:?}, expected {}",
            vm.id, companion.id
        ))),
    }
}

/// # Errors
/// Fails the test if no resource pool is available or the instance is not in it.
pub async fn launch_with_resource_pool(scope: TestScope) -> PcvResult<()> {
    launch_into(&scope, PlacementTarget::ResourcePool).await
}

/// # Errors
/// Fails the test if no affinity group is available or the instance is not in it.
pub async fn launch_with_affinity_group(scope: TestScope) -> PcvResult<()> {
    launch_into(&scope, PlacementTarget::AffinityGroup).await
}

/// # Errors
/// Fails the test if no storage pool is available or the instance is not in it.
pub async fn launch_with_storage_pool(scope: TestScope) -> PcvResult<()> {
    launch_into(&scope, PlacementTarget::StoragePool).await
}

/// # Errors
/// Fails the test if no folder is available or the instance is not in it.
pub async fn launch_with_folder(scope: TestScope) -> PcvResult<()> {
    launch_into(&scope, PlacementTarget::Folder).await
}

/// List instances by the suite's name prefix; the fixture must be among them.
///
/// # Errors
/// Fails the test if the listing omits the fixture or includes foreign names.
pub async fn filter_instances(scope: TestScope) -> PcvResult<()> {
    let fixture = scope.require_fixture()?.clone();
    let ctx = scope.ctx();
    let prefix = ctx.naming().suite_prefix(ctx.suite_id());
    let mut listed = ctx.provider().list(
        ResourceKind::Instance,
        ResourceFilter::all().with_name_prefix(prefix.clone()),
    );

    let mut found = false;
    let mut count = 0_usize;
    while let Some(item) = listed.next().await {
        let vm = item?;
        count += 1;
        if !vm.name.starts_with(&prefix) {
            return Err(PcvError::assertion(format!(
                "filter by {prefix} returned {}",
                vm.name
            )));
        }
        found |= vm.id == fixture.id;
    }
    scope.out(format!("{count} instances under {prefix}"));
    if found {
        scope.ok(format!("found {}", fixture.id));
        Ok(())
    } else {
        Err(PcvError::assertion(format!(
            "{} missing from instances under {prefix}",
            fixture.id
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// # Errors
/// Fails the test if the instance does not reach `Running`.
pub async fn start(scope: TestScope) -> PcvResult<()> {
    exercise(&scope, Operation::Start).await
}

/// Stop gracefully; if that does not converge in time, stop by force.
///
/// # Errors
/// Fails the test if even the forced stop does not reach `Stopped`.
pub async fn stop(scope: TestScope) -> PcvResult<()> {
    let vm = current(&scope).await?;
    require_from(&scope, &vm, OperationKind::Stop).await?;
    scope.out(format!("before stop: {} is {}", vm.id, vm.state));

    match apply(&scope, &vm, Operation::stop(), ResourceState::Stopped).await? {
        Convergence::Converged { resource } => {
            scope.out(format!("after stop: {} is {}", resource.id, resource.state));
            scope.ok("graceful stop reached stopped");
            Ok(())
        }
        Convergence::TimedOut { resource } => {
            scope.out(format!(
                "graceful stop timed out with {} in {}",
                resource.id, resource.state
            ));
            scope
                .require(&CapabilityQuery::any_operation(resource.kind, OperationKind::Stop))
                .await?;
            let forced = apply(
                &scope,
                &resource,
                Operation::Stop { force: true },
                ResourceState::Stopped,
            )
            .await?
            .into_converged(ResourceState::Stopped)?;
            scope.out(format!("after forced stop: {} is {}", forced.id, forced.state));
            scope.ok("forced stop reached stopped");
            Ok(())
        }
        lost @ Convergence::Lost { .. } => lost.into_converged(ResourceState::Stopped).map(drop),
    }
}

/// # Errors
/// Fails the test if the instance does not reach `Paused`.
pub async fn pause(scope: TestScope) -> PcvResult<()> {
    exercise(&scope, Operation::Pause).await
}

/// # Errors
/// Fails the test if the instance does not reach `Running`.
pub async fn unpause(scope: TestScope) -> PcvResult<()> {
    exercise(&scope, Operation::Unpause).await
}

/// # Errors
/// Fails the test if the instance does not reach `Suspended`.
pub async fn suspend(scope: TestScope) -> PcvResult<()> {
    exercise(&scope, Operation::Suspend).await
}

/// # Errors
/// Fails the test if the instance does not reach `Running`.
pub async fn resume(scope: TestScope) -> PcvResult<()> {
    exercise(&scope, Operation::Resume).await
}

/// # Errors
/// Fails the test if the instance is not running again afterwards.
pub async fn reboot(scope: TestScope) -> PcvResult<()> {
    exercise(&scope, Operation::Reboot).await
}

/// # Errors
/// Fails the test if analytics are not reported enabled afterwards.
pub async fn enable_analytics(scope: TestScope) -> PcvResult<()> {
    toggle_analytics(&scope, true).await
}

/// # Errors
/// Fails the test if analytics are still reported enabled afterwards.
pub async fn disable_analytics(scope: TestScope) -> PcvResult<()> {
    toggle_analytics(&scope, false).await
}

async fn toggle_analytics(scope: &TestScope, enabled: bool) -> PcvResult<()> {
    let vm = current(scope).await?;
    scope
        .require(&CapabilityQuery::all([
            CapabilityQuery::feature(Feature::Analytics),
            CapabilityQuery::operation(vm.kind, OperationKind::Analytics, vm.state),
        ]))
        .await?;
    let op = Operation::SetAnalytics { enabled };
    scope
        .ctx()
        .provider()
        .transition(vm.kind, &vm.id, op.clone())
        .await?;

    let after = current(scope).await?;
    if after.analytics == enabled {
        scope.ok(format!("{op} on {}", after.id));
        Ok(())
    } else {
        Err(PcvError::assertion(format!(
            "{} reports analytics {} after {op}",
            after.id,
            if after.analytics { "on" } else { "off" }
        )))
    }
}

/// Delete the fixture and wait for it to disappear.
///
/// # Errors
/// Fails the test if the instance is still around at the delete deadline.
pub async fn terminate(scope: TestScope) -> PcvResult<()> {
    scope.expect_deletion();
    let vm = current(&scope).await?;
    require_from(&scope, &vm, OperationKind::Delete).await?;
    scope.out(format!("terminating {} in {}", vm.id, vm.state));
    apply(&scope, &vm, Operation::Delete, ResourceState::Terminated)
        .await?
        .into_converged(ResourceState::Terminated)?;
    scope.ok(format!("{} terminated", vm.id));
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Resize
// ─────────────────────────────────────────────────────────────────────────────

/// Move the instance to a larger product.
///
/// # Errors
/// Fails the test if the resize is refused or does not take effect.
pub async fn modify_instance(scope: TestScope) -> PcvResult<()> {
    modify(&scope, ResizeDirection::Larger).await
}

/// Move the instance to a smaller product.
///
/// # Errors
/// Fails the test if the resize is refused or does not take effect.
pub async fn modify_instance_smaller(scope: TestScope) -> PcvResult<()> {
    modify(&scope, ResizeDirection::Smaller).await
}

async fn modify(scope: &TestScope, direction: ResizeDirection) -> PcvResult<()> {
    let vm = current(scope).await?;
    require_from(scope, &vm, OperationKind::Resize).await?;

    // Shape changes are preferred; whole-product changes are the fallback.
    let by_shape = scope
        .supports(&CapabilityQuery::feature(Feature::ProductSizeChanges))
        .await?;
    if !by_shape
        && !scope
            .supports(&CapabilityQuery::feature(Feature::ProductChanges))
            .await?
    {
        return Err(PcvError::unsupported("product changes"));
    }

    let catalog = scope
        .ctx()
        .provider()
        .products(vm.kind, vm.image_id.as_ref())
        .await?;
    let Some(current_product) = vm
        .product_id
        .as_deref()
        .and_then(|id| catalog.iter().find(|p| p.id == id))
    else {
        scope.warn(format!(
            "product {:?} of {} is not in the catalog",
            vm.product_id, vm.id
        ));
        return Ok(());
    };
    let Some(target) = select(current_product, &catalog, direction) else {
        scope.warn(format!(
            "no {} product than {} in a catalog of {}",
            match direction {
                ResizeDirection::Larger => "larger",
                ResizeDirection::Smaller => "smaller",
            },
            current_product.id,
            catalog.len()
        ));
        return Ok(());
    };

    let resize = if by_shape {
        ResizeTarget::Shape {
            cpu_count: target.cpu_count,
            memory_mb: target.memory_mb,
        }
    } else {
        ResizeTarget::Product {
            product_id: target.id.clone(),
        }
    };
    scope.out(format!(
        "resizing {} from {} to {}",
        vm.id, current_product.id, target.id
    ));
    scope
        .ctx()
        .provider()
        .transition(vm.kind, &vm.id, Operation::Resize { target: resize })
        .await?;

    let after = current(scope).await?;
    after.validate()?;
    if after.product_id.as_deref() != Some(target.id.as_str()) {
        return Err(PcvError::assertion(format!(
            "{} runs on {:?} after resize, expected {}",
            after.id, after.product_id, target.id
        )));
    }
    if after.state != vm.state && !after.state.is_transitional() {
        scope.warn(format!("resize moved {} from {} to {}", after.id, vm.state, after.state));
    }
    scope.ok(format!("{} now on {}", after.id, target.id));
    Ok(())
}
