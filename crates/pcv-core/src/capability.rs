//! Provider capability surface.
//!
//! Capabilities are reported per region by the live provider; nothing in this
//! module is a static feature table.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{OperationKind, ResourceKind, ResourceState};

/// Optional features a provider may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    ResourcePools,
    AffinityGroups,
    StoragePools,
    Folders,
    ClientRequestToken,
    UserDefinedPrivateIp,
    /// Resize by raw (cpu, memory) shape.
    ProductSizeChanges,
    /// Resize by switching catalog product.
    ProductChanges,
    Analytics,
}

impl Feature {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ResourcePools => "resource_pools",
            Self::AffinityGroups => "affinity_groups",
            Self::StoragePools => "storage_pools",
            Self::Folders => "folders",
            Self::ClientRequestToken => "client_request_token",
            Self::UserDefinedPrivateIp => "user_defined_private_ip",
            Self::ProductSizeChanges => "product_size_changes",
            Self::ProductChanges => "product_changes",
            Self::Analytics => "analytics",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities of one provider in one region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// Region the set was reported for.
    pub region: String,
    /// Kinds the provider implements at all.
    #[serde(default)]
    pub kinds: BTreeSet<ResourceKind>,
    /// Kinds the account is entitled to provision.
    #[serde(default)]
    pub subscribed: BTreeSet<ResourceKind>,
    #[serde(default)]
    pub features: BTreeSet<Feature>,
    /// States from which each operation is permitted, per kind.
    #[serde(default)]
    pub operations: BTreeMap<ResourceKind, BTreeMap<OperationKind, BTreeSet<ResourceState>>>,
}

impl CapabilitySet {
    /// Empty capability set for a region.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Self::default()
        }
    }

    /// Declare a kind as implemented and subscribed.
    #[must_use]
    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kinds.insert(kind);
        self.subscribed.insert(kind);
        self
    }

    /// Declare a kind as implemented but not subscribed.
    #[must_use]
    pub fn with_unsubscribed_kind(mut self, kind: ResourceKind) -> Self {
        self.kinds.insert(kind);
        self.subscribed.remove(&kind);
        self
    }

    #[must_use]
    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.insert(feature);
        self
    }

    /// Permit `op` on `kind` from each of `states`.
    #[must_use]
    pub fn allow(
        mut self,
        kind: ResourceKind,
        op: OperationKind,
        states: impl IntoIterator<Item = ResourceState>,
    ) -> Self {
        self.operations
            .entry(kind)
            .or_default()
            .entry(op)
            .or_default()
            .extend(states);
        self
    }

    #[must_use]
    pub fn supports_kind(&self, kind: ResourceKind) -> bool {
        self.kinds.contains(&kind)
    }

    #[must_use]
    pub fn is_subscribed(&self, kind: ResourceKind) -> bool {
        self.subscribed.contains(&kind)
    }

    #[must_use]
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Returns true if `op` may be issued against a `kind` resource in `state`.
    #[must_use]
    pub fn can(&self, kind: ResourceKind, op: OperationKind, state: ResourceState) -> bool {
        self.operations
            .get(&kind)
            .and_then(|ops| ops.get(&op))
            .is_some_and(|states| states.contains(&state))
    }

    /// Returns true if `op` is permitted from at least one state.
    #[must_use]
    pub fn supports_operation(&self, kind: ResourceKind, op: OperationKind) -> bool {
        self.operations
            .get(&kind)
            .and_then(|ops| ops.get(&op))
            .is_some_and(|states| !states.is_empty())
    }

    /// First state (in [`ResourceState::ALL`] order) from which `op` is allowed.
    #[must_use]
    pub fn first_state_allowing(
        &self,
        kind: ResourceKind,
        op: OperationKind,
    ) -> Option<ResourceState> {
        ResourceState::ALL
            .into_iter()
            .find(|state| self.can(kind, op, *state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compute() -> CapabilitySet {
        CapabilitySet::new("region-1")
            .with_kind(ResourceKind::Instance)
            .allow(
                ResourceKind::Instance,
                OperationKind::Stop,
                [ResourceState::Running],
            )
            .allow(
                ResourceKind::Instance,
                OperationKind::Resize,
                [ResourceState::Stopped, ResourceState::Running],
            )
    }

    #[test]
    fn operation_permission_is_state_dependent() {
        let caps = compute();
        assert!(caps.can(ResourceKind::Instance, OperationKind::Stop, ResourceState::Running));
        assert!(!caps.can(ResourceKind::Instance, OperationKind::Stop, ResourceState::Stopped));
        assert!(!caps.can(ResourceKind::Queue, OperationKind::Stop, ResourceState::Running));
    }

    #[test]
    fn first_state_allowing_uses_declaration_order() {
        let caps = compute();
        assert_eq!(
            caps.first_state_allowing(ResourceKind::Instance, OperationKind::Resize),
            Some(ResourceState::Running)
        );
        assert_eq!(
            caps.first_state_allowing(ResourceKind::Instance, OperationKind::Pause),
            None
        );
    }

    #[test]
    fn unsubscribed_kind_is_supported_but_not_subscribed() {
        let caps = CapabilitySet::new("r").with_unsubscribed_kind(ResourceKind::Database);
        assert!(caps.supports_kind(ResourceKind::Database));
        assert!(!caps.is_subscribed(ResourceKind::Database));
    }
}
