//! The provider contract every driver under test implements.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::{
    CapabilitySet, ManagedResource, Operation, PcvResult, Product, ResourceId, ResourceKind,
    ResourceSpec, ResourceState,
};

/// Lazy, finite stream of listed resources. Calling `list` again restarts it.
pub type ResourceStream = Pin<Box<dyn Stream<Item = PcvResult<ManagedResource>> + Send>>;

/// Filter for `list` calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFilter {
    /// Match names starting with this prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ResourceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_center: Option<String>,
    /// Required labels (`key == value`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<(String, String)>,
}

impl ResourceFilter {
    /// Filter that matches everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub const fn in_state(mut self, state: ResourceState) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn in_data_center(mut self, data_center: impl Into<String>) -> Self {
        self.data_center = Some(data_center.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Returns true if `resource` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, resource: &ManagedResource) -> bool {
        if let Some(prefix) = &self.name_prefix {
            if !resource.name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(state) = self.state {
            if resource.state != state {
                return false;
            }
        }
        if let Some(dc) = &self.data_center {
            if resource.placement.data_center.as_deref() != Some(dc.as_str()) {
                return false;
            }
        }
        self.labels
            .iter()
            .all(|(k, v)| resource.labels.get(k).is_some_and(|actual| actual == v))
    }
}

/// Driver for one remote provider.
///
/// Implementations wrap a specific provider's API; the conformance core only
/// talks to providers through this trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name used in logs and resource names.
    fn name(&self) -> &str;

    /// Capability surface for `region`. Must not fail for valid regions.
    async fn capabilities(&self, region: &str) -> PcvResult<CapabilitySet>;

    /// Provision a resource.
    ///
    /// Fails with `NotSubscribed`, `QuotaExceeded` or `InvalidSpec`.
    async fn create(&self, kind: ResourceKind, spec: ResourceSpec) -> PcvResult<ManagedResource>;

    /// Fetch the current view of a resource; `Ok(None)` means it does not exist.
    async fn fetch(&self, kind: ResourceKind, id: &ResourceId)
        -> PcvResult<Option<ManagedResource>>;

    /// Issue a state-changing operation.
    ///
    /// Fails with `Unsupported` or `InvalidState`.
    async fn transition(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
        operation: Operation,
    ) -> PcvResult<()>;

    /// List resources of a kind.
    fn list(&self, kind: ResourceKind, filter: ResourceFilter) -> ResourceStream;

    /// Product catalog for a kind, optionally narrowed to products usable with an image.
    async fn products(
        &self,
        kind: ResourceKind,
        image: Option<&ResourceId>,
    ) -> PcvResult<Vec<Product>>;
}
