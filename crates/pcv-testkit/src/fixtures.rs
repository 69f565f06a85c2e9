//! Ready-made capability surfaces, catalogs and resources.

use pcv_core::{
    CapabilitySet, Feature, ManagedResource, OperationKind, Placement, Product, ResourceKind,
    ResourceState,
};

/// Region used by the fixtures below.
pub const TEST_REGION: &str = "test-region-1";

// ─────────────────────────────────────────────────────────────────────────────
// Capability fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Compute surface where every lifecycle operation is allowed from its
/// natural source state.
#[must_use]
pub fn full_compute_capabilities() -> CapabilitySet {
    use OperationKind as Op;
    use ResourceState as S;

    CapabilitySet::new(TEST_REGION)
        .with_kind(ResourceKind::Instance)
        .with_kind(ResourceKind::Image)
        .with_feature(Feature::ClientRequestToken)
        .with_feature(Feature::ProductSizeChanges)
        .with_feature(Feature::ProductChanges)
        .with_feature(Feature::UserDefinedPrivateIp)
        .with_feature(Feature::Analytics)
        .allow(ResourceKind::Instance, Op::Start, [S::Stopped])
        .allow(ResourceKind::Instance, Op::Stop, [S::Running])
        .allow(ResourceKind::Instance, Op::Pause, [S::Running])
        .allow(ResourceKind::Instance, Op::Unpause, [S::Paused])
        .allow(ResourceKind::Instance, Op::Suspend, [S::Running])
        .allow(ResourceKind::Instance, Op::Resume, [S::Suspended])
        .allow(ResourceKind::Instance, Op::Reboot, [S::Running])
        .allow(ResourceKind::Instance, Op::Resize, [S::Stopped])
        .allow(ResourceKind::Instance, Op::Analytics, [S::Running, S::Stopped])
        .allow(ResourceKind::Instance, Op::Delete, [S::Running, S::Stopped, S::Paused, S::Suspended])
}

/// Full compute surface that also claims every placement feature.
#[must_use]
pub fn placement_capabilities() -> CapabilitySet {
    full_compute_capabilities()
        .with_feature(Feature::ResourcePools)
        .with_feature(Feature::AffinityGroups)
        .with_feature(Feature::StoragePools)
        .with_feature(Feature::Folders)
}

/// Compute surface with only start/stop/reboot/delete.
#[must_use]
pub fn basic_compute_capabilities() -> CapabilitySet {
    use OperationKind as Op;
    use ResourceState as S;

    CapabilitySet::new(TEST_REGION)
        .with_kind(ResourceKind::Instance)
        .allow(ResourceKind::Instance, Op::Start, [S::Stopped])
        .allow(ResourceKind::Instance, Op::Stop, [S::Running])
        .allow(ResourceKind::Instance, Op::Reboot, [S::Running])
        .allow(ResourceKind::Instance, Op::Delete, [S::Running, S::Stopped])
}

/// Message queue surface.
#[must_use]
pub fn queue_capabilities() -> CapabilitySet {
    CapabilitySet::new(TEST_REGION)
        .with_kind(ResourceKind::Queue)
        .allow(ResourceKind::Queue, OperationKind::Delete, [ResourceState::Available])
}

/// Relational database surface; `subscribed` controls the entitlement.
#[must_use]
pub fn database_capabilities(subscribed: bool) -> CapabilitySet {
    let caps = CapabilitySet::new(TEST_REGION);
    let caps = if subscribed {
        caps.with_kind(ResourceKind::Database)
    } else {
        caps.with_unsubscribed_kind(ResourceKind::Database)
    };
    caps.allow(ResourceKind::Database, OperationKind::Delete, [ResourceState::Available])
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Three-product catalog, smallest first.
#[must_use]
pub fn product_catalog() -> Vec<Product> {
    vec![
        Product::new("m1.small", 1, 2048, 20).with_name("Small"),
        Product::new("m1.medium", 2, 4096, 40).with_name("Medium"),
        Product::new("m1.large", 4, 8192, 80).with_name("Large"),
    ]
}

/// Catalog with a single product, so no resize target exists.
#[must_use]
pub fn single_product_catalog() -> Vec<Product> {
    vec![Product::new("m1.only", 2, 4096, 40)]
}

// ─────────────────────────────────────────────────────────────────────────────
// Resource fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// A running instance on `m1.medium`.
#[must_use]
pub fn running_instance(id: &str) -> ManagedResource {
    ManagedResource::new(id, ResourceKind::Instance, format!("vm-{id}"), ResourceState::Running)
        .with_product("m1.medium")
}

/// A pre-existing placement companion (affinity group, storage pool, ...) in
/// [`TEST_REGION`].
#[must_use]
pub fn companion(kind: ResourceKind, id: &str) -> ManagedResource {
    ManagedResource::new(id, kind, format!("{kind}-{id}"), ResourceState::Available)
        .with_placement(Placement::in_region(TEST_REGION))
}

/// One companion for each placement feature.
#[must_use]
pub fn placement_companions() -> Vec<ManagedResource> {
    vec![
        companion(ResourceKind::ResourcePool, "rp-1"),
        companion(ResourceKind::AffinityGroup, "ag-1"),
        companion(ResourceKind::StoragePool, "sp-1"),
        companion(ResourceKind::Folder, "f-1"),
    ]
}

/// A pre-existing, available database.
#[must_use]
pub fn available_database(id: &str, name: &str) -> ManagedResource {
    ManagedResource::new(id, ResourceKind::Database, name, ResourceState::Available)
}
