//! Stateless relational database suite.
//!
//! Tests share one read-only database. An existing database is reused when
//! one is found; otherwise one is provisioned and deleted at teardown.

use std::collections::BTreeMap;

use futures_util::{FutureExt, StreamExt};
use pcv_core::{ManagedResource, PcvError, PcvResult, ResourceFilter, ResourceId, ResourceKind};
use pcv_fixture::{
    Binding, CapabilityQuery, FixtureRequirement, RequirementTable, Resolution, TestScope,
};
use uuid::Uuid;

use crate::{SuiteDefinition, TestCase};

pub const SUITE_ID: &str = "database";

#[must_use]
pub fn requirements() -> RequirementTable {
    RequirementTable::new()
        .no_fixture("get_bogus_database")
        .no_fixture("list_databases")
        .no_fixture("compare_list_and_fetch")
        .with_default(Binding::Requirement(FixtureRequirement::stateless(
            ResourceKind::Database,
        )))
}

#[must_use]
pub fn suite() -> SuiteDefinition {
    SuiteDefinition {
        id: SUITE_ID,
        tests: vec![
            TestCase::new("get_bogus_database", |s| get_bogus_database(s).boxed()),
            TestCase::new("get_database", |s| get_database(s).boxed()),
            TestCase::new("database_content", |s| database_content(s).boxed()),
            TestCase::new("list_databases", |s| list_databases(s).boxed()),
            TestCase::new("compare_list_and_fetch", |s| compare_list_and_fetch(s).boxed()),
        ],
        requirements: requirements(),
    }
}

/// Field checks every database must pass, including region consistency.
fn check_database(scope: &TestScope, db: &ManagedResource) -> PcvResult<()> {
    db.validate()?;
    let region = &scope.ctx().config().region;
    match db.placement.region.as_deref() {
        Some(actual) if actual == region => Ok(()),
        actual => Err(PcvError::assertion(format!(
            "database {} is in region {actual:?}, expected {region}",
            db.id
        ))),
    }
}

async fn gate_kind(scope: &TestScope) -> PcvResult<bool> {
    scope.require(&CapabilityQuery::kind(ResourceKind::Database)).await?;
    scope
        .supports(&CapabilityQuery::subscribed(ResourceKind::Database))
        .await
}

/// Fetching a random identifier must return nothing.
///
/// # Errors
/// Fails the test if the provider returns a database for the random id.
pub async fn get_bogus_database(scope: TestScope) -> PcvResult<()> {
    scope.require(&CapabilityQuery::kind(ResourceKind::Database)).await?;
    let bogus = ResourceId::new(Uuid::new_v4().to_string());
    let found = scope
        .ctx()
        .provider()
        .fetch(ResourceKind::Database, &bogus)
        .await?;
    scope.out(format!("bogus database {bogus}: {found:?}"));
    match found {
        None => {
            scope.ok("random id resolved to nothing");
            Ok(())
        }
        Some(db) => Err(PcvError::assertion(format!(
            "random id {bogus} returned database {}",
            db.id
        ))),
    }
}

/// The shared database can be fetched by id.
///
/// # Errors
/// Fails the test if the fixture cannot be fetched.
pub async fn get_database(scope: TestScope) -> PcvResult<()> {
    if let Resolution::NotSubscribed { reason } = scope.resolution() {
        scope.ok(format!("not subscribed to relational databases: {reason}"));
        return Ok(());
    }
    let fixture = scope.require_fixture()?;
    let db = scope
        .ctx()
        .provider()
        .fetch(ResourceKind::Database, &fixture.id)
        .await?
        .ok_or_else(|| {
            PcvError::assertion(format!("test database {} returned nothing", fixture.id))
        })?;
    scope.out(format!("database {} ({}) is {}", db.id, db.name, db.state));
    scope.ok(format!("fetched {}", db.id));
    Ok(())
}

/// Every field of the shared database is populated and consistent.
///
/// # Errors
/// Fails the test if a field is missing or the region does not match.
pub async fn database_content(scope: TestScope) -> PcvResult<()> {
    let fixture = scope.require_fixture()?;
    let db = scope
        .ctx()
        .provider()
        .fetch(ResourceKind::Database, &fixture.id)
        .await?
        .ok_or_else(|| {
            PcvError::assertion(format!("test database {} returned nothing", fixture.id))
        })?;
    scope.out(format!("id: {}", db.id));
    scope.out(format!("state: {}", db.state));
    scope.out(format!("name: {}", db.name));
    scope.out(format!("region: {:?}", db.placement.region));
    scope.out(format!("data center: {:?}", db.placement.data_center));
    check_database(&scope, &db)?;
    scope.ok("database content is consistent");
    Ok(())
}

async fn list_all(scope: &TestScope) -> PcvResult<Vec<ManagedResource>> {
    let mut listed = scope
        .ctx()
        .provider()
        .list(ResourceKind::Database, ResourceFilter::all());
    let mut databases = Vec::new();
    while let Some(item) = listed.next().await {
        databases.push(item?);
    }
    Ok(databases)
}

/// List databases; an unsubscribed account must see none.
///
/// # Errors
/// Fails the test if an unsubscribed account lists databases or a listed
/// database is malformed.
pub async fn list_databases(scope: TestScope) -> PcvResult<()> {
    let subscribed = gate_kind(&scope).await?;
    let databases = list_all(&scope).await?;
    scope.out(format!("database count: {}", databases.len()));

    if !subscribed {
        if databases.is_empty() {
            scope.ok("no databases for an unsubscribed account");
            return Ok(());
        }
        return Err(PcvError::assertion(format!(
            "unsubscribed account lists {} databases",
            databases.len()
        )));
    }
    if databases.is_empty() {
        scope.warn("no databases to verify");
    }
    for db in &databases {
        check_database(&scope, db)?;
    }
    Ok(())
}

/// Listing and fetching agree on which databases exist and their states.
///
/// # Errors
/// Fails the test if a listed database cannot be fetched or reports a
/// different state.
pub async fn compare_list_and_fetch(scope: TestScope) -> PcvResult<()> {
    let subscribed = gate_kind(&scope).await?;
    let listed: BTreeMap<ResourceId, ManagedResource> = list_all(&scope)
        .await?
        .into_iter()
        .map(|db| (db.id.clone(), db))
        .collect();
    if !subscribed && !listed.is_empty() {
        return Err(PcvError::assertion(format!(
            "unsubscribed account lists {} databases",
            listed.len()
        )));
    }

    for (id, db) in &listed {
        let fetched = scope
            .ctx()
            .provider()
            .fetch(ResourceKind::Database, id)
            .await?
            .ok_or_else(|| PcvError::assertion(format!("listed database {id} cannot be fetched")))?;
        if fetched.state != db.state && !fetched.state.is_transitional() {
            return Err(PcvError::assertion(format!(
                "database {id} listed as {} but fetched as {}",
                db.state, fetched.state
            )));
        }
    }
    scope.ok(format!("{} databases consistent", listed.len()));
    Ok(())
}
