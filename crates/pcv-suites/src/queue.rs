//! Stateful message queue suite.

use futures_util::{FutureExt, StreamExt};
use pcv_core::{
    ManagedResource, Operation, OperationKind, PcvError, PcvResult, ResourceFilter, ResourceKind,
    ResourceSpec, ResourceState,
};
use pcv_fixture::{CapabilityQuery, FixtureRequirement, RequirementTable, TestScope};

use crate::{SuiteDefinition, TestCase};

pub const SUITE_ID: &str = "queue";

#[must_use]
pub fn requirements() -> RequirementTable {
    RequirementTable::new()
        .no_fixture("create_message_queue")
        .bind(
            "remove_message_queue",
            FixtureRequirement::removed(ResourceKind::Queue).in_state(ResourceState::Available),
        )
        .bind(
            "send_message",
            FixtureRequirement::stateful(ResourceKind::Queue).in_state(ResourceState::Available),
        )
}

#[must_use]
pub fn suite() -> SuiteDefinition {
    SuiteDefinition {
        id: SUITE_ID,
        tests: vec![
            TestCase::new("create_message_queue", |s| create_message_queue(s).boxed()),
            TestCase::new("send_message", |s| send_message(s).boxed()),
            TestCase::new("remove_message_queue", |s| remove_message_queue(s).boxed()),
        ],
        requirements: requirements(),
    }
}

fn expect_available(queue: &ManagedResource) -> PcvResult<()> {
    if queue.state == ResourceState::Available {
        Ok(())
    } else {
        Err(PcvError::assertion(format!(
            "queue {} is {}, expected available",
            queue.id, queue.state
        )))
    }
}

/// Create a queue and wait for it to become available.
///
/// # Errors
/// Fails the test if creation fails or the queue never becomes available.
pub async fn create_message_queue(scope: TestScope) -> PcvResult<()> {
    scope
        .require(&CapabilityQuery::subscribed(ResourceKind::Queue))
        .await?;
    let ctx = scope.ctx();
    let spec = ResourceSpec::named(scope.resource_name())
        .with_description("conformance queue")
        .with_placement(ctx.config().default_placement());
    let created = ctx.provider().create(ResourceKind::Queue, spec).await?;
    scope.track(&created)?;
    created.validate()?;

    let queue = ctx
        .await_state(&created, ResourceState::Available, ctx.config().timeouts.launch)
        .await?
        .into_converged(ResourceState::Available)?;
    expect_available(&queue)?;
    scope.ok(format!("created queue {}", queue.id));
    Ok(())
}

/// The shared queue a sender would use must be listed and available.
///
/// Message exchange itself sits outside the provider contract.
///
/// # Errors
/// Fails the test if the queue is gone, not available, or not listed.
pub async fn send_message(scope: TestScope) -> PcvResult<()> {
    let fixture = scope.require_fixture()?.clone();
    let ctx = scope.ctx();
    let queue = ctx
        .provider()
        .fetch(fixture.kind, &fixture.id)
        .await?
        .ok_or_else(|| PcvError::Lost {
            kind: fixture.kind,
            id: fixture.id.clone(),
            misses: 1,
        })?;
    expect_available(&queue)?;

    let mut listed = ctx.provider().list(
        ResourceKind::Queue,
        ResourceFilter::all().in_state(ResourceState::Available),
    );
    while let Some(item) = listed.next().await {
        if item?.id == queue.id {
            scope.ok(format!("queue {} ready for messages", queue.id));
            return Ok(());
        }
    }
    Err(PcvError::assertion(format!(
        "available queue {} is not listed",
        queue.id
    )))
}

/// Delete the fixture queue and wait for it to disappear.
///
/// # Errors
/// Fails the test if the queue outlives the delete deadline.
pub async fn remove_message_queue(scope: TestScope) -> PcvResult<()> {
    scope.expect_deletion();
    let queue = scope.require_fixture()?.clone();
    scope
        .require(&CapabilityQuery::operation(
            queue.kind,
            OperationKind::Delete,
            queue.state,
        ))
        .await?;

    let ctx = scope.ctx();
    ctx.provider()
        .transition(queue.kind, &queue.id, Operation::Delete)
        .await?;
    ctx.await_state(
        &queue,
        ResourceState::Terminated,
        ctx.timeout_for(OperationKind::Delete),
    )
    .await?
    .into_converged(ResourceState::Terminated)?;
    scope.ok(format!("removed queue {}", queue.id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcv_fixture::Binding;

    #[test]
    fn only_creation_runs_without_a_fixture() {
        let table = requirements();
        assert_eq!(table.lookup("create_message_queue"), Some(&Binding::NoFixture));
        assert!(matches!(
            table.lookup("remove_message_queue"),
            Some(Binding::Requirement(r)) if !r.policy.is_pooled()
        ));
        assert!(table.lookup("receive_message").is_none());
    }
}
