//! Managed resources and the vocabulary used to describe them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PcvError, PcvResult};

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque provider-assigned resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Wrap a provider identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Compute instance (virtual machine).
    Instance,
    /// Machine image instances launch from.
    Image,
    /// Message queue.
    Queue,
    /// Relational database.
    Database,
    /// Virtual network / VLAN.
    Network,
    /// Block storage volume.
    Volume,
    /// Affinity group used for placement.
    AffinityGroup,
    /// Storage pool used for placement.
    StoragePool,
    /// Compute resource pool used for placement.
    ResourcePool,
    /// Folder used for placement.
    Folder,
}

impl ResourceKind {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Image => "image",
            Self::Queue => "queue",
            Self::Database => "database",
            Self::Network => "network",
            Self::Volume => "volume",
            Self::AffinityGroup => "affinity_group",
            Self::StoragePool => "storage_pool",
            Self::ResourcePool => "resource_pool",
            Self::Folder => "folder",
        }
    }

    /// Kinds whose lifecycle has a running/stopped distinction.
    #[must_use]
    pub const fn is_stateful(&self) -> bool {
        matches!(self, Self::Instance | Self::Database)
    }

    /// Steady state a freshly provisioned resource of this kind settles in.
    #[must_use]
    pub const fn ready_state(&self) -> ResourceState {
        match self {
            Self::Instance => ResourceState::Running,
            _ => ResourceState::Available,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// States
// ─────────────────────────────────────────────────────────────────────────────

/// Last-observed state of a managed resource.
///
/// `Terminated` is the deletion state: a resource awaited into `Terminated`
/// has converged as soon as the provider stops reporting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Pausing,
    Paused,
    Suspending,
    Suspended,
    Rebooting,
    /// Ready state for kinds without a running/stopped distinction.
    Available,
    Deleting,
    Terminated,
    Error,
    Unknown,
}

impl ResourceState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::Pending,
        Self::Running,
        Self::Stopping,
        Self::Stopped,
        Self::Pausing,
        Self::Paused,
        Self::Suspending,
        Self::Suspended,
        Self::Rebooting,
        Self::Available,
        Self::Deleting,
        Self::Terminated,
        Self::Error,
        Self::Unknown,
    ];

    /// Returns true if this state denotes deletion.
    #[must_use]
    pub const fn is_deletion(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Returns true if the provider is expected to move out of this state
    /// without further requests.
    #[must_use]
    pub const fn is_transitional(&self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::Stopping
                | Self::Pausing
                | Self::Suspending
                | Self::Rebooting
                | Self::Deleting
        )
    }

    /// Steady state a transitional state ends in without further requests.
    ///
    /// `Pending` depends on the resource kind, see [`ResourceKind::ready_state`].
    #[must_use]
    pub const fn settles_to(&self) -> Option<Self> {
        match self {
            Self::Stopping => Some(Self::Stopped),
            Self::Pausing => Some(Self::Paused),
            Self::Suspending => Some(Self::Suspended),
            Self::Rebooting => Some(Self::Running),
            Self::Deleting => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Suspending => "suspending",
            Self::Suspended => "suspended",
            Self::Rebooting => "rebooting",
            Self::Available => "available",
            Self::Deleting => "deleting",
            Self::Terminated => "terminated",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reuse policy
// ─────────────────────────────────────────────────────────────────────────────

/// Whether a fixture may be shared across tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReusePolicy {
    /// Shared across tests in a suite; tests may change its state.
    Stateful,
    /// Shared read-only fixture; tests never mutate it.
    Stateless,
    /// Provisioned so that the test itself can destroy it.
    Removed,
    /// Provisioned fresh for one test and never pooled.
    Private,
}

impl ReusePolicy {
    /// Returns true if resources under this policy live in the suite pool.
    #[must_use]
    pub const fn is_pooled(&self) -> bool {
        matches!(self, Self::Stateful | Self::Stateless)
    }

    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stateful => "stateful",
            Self::Stateless => "stateless",
            Self::Removed => "removed",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for ReusePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Placement
// ─────────────────────────────────────────────────────────────────────────────

/// Placement hints for provisioning or discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_center: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_pool: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity_group: Option<ResourceId>,
}

impl Placement {
    /// Placement pinned to a region.
    #[must_use]
    pub fn in_region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_data_center(mut self, data_center: impl Into<String>) -> Self {
        self.data_center = Some(data_center.into());
        self
    }

    #[must_use]
    pub fn with_affinity_group(mut self, id: impl Into<ResourceId>) -> Self {
        self.affinity_group = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_storage_pool(mut self, id: impl Into<ResourceId>) -> Self {
        self.storage_pool = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_resource_pool(mut self, id: impl Into<ResourceId>) -> Self {
        self.resource_pool = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_folder(mut self, id: impl Into<ResourceId>) -> Self {
        self.folder = Some(id.into());
        self
    }

    /// Returns true if something placed here is usable from `scope`: region
    /// and data center must agree wherever both sides name one.
    #[must_use]
    pub fn is_within(&self, scope: &Self) -> bool {
        fn agrees(a: Option<&str>, b: Option<&str>) -> bool {
            a.zip(b).map_or(true, |(a, b)| a == b)
        }
        agrees(self.region.as_deref(), scope.region.as_deref())
            && agrees(self.data_center.as_deref(), scope.data_center.as_deref())
    }

    /// Fill unset fields from `defaults`.
    #[must_use]
    pub fn or(mut self, defaults: &Self) -> Self {
        if self.region.is_none() {
            self.region.clone_from(&defaults.region);
        }
        if self.data_center.is_none() {
            self.data_center.clone_from(&defaults.data_center);
        }
        if self.resource_pool.is_none() {
            self.resource_pool.clone_from(&defaults.resource_pool);
        }
        if self.storage_pool.is_none() {
            self.storage_pool.clone_from(&defaults.storage_pool);
        }
        if self.folder.is_none() {
            self.folder.clone_from(&defaults.folder);
        }
        if self.affinity_group.is_none() {
            self.affinity_group.clone_from(&defaults.affinity_group);
        }
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Managed resource
// ─────────────────────────────────────────────────────────────────────────────

/// A provider-side resource as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedResource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub name: String,
    pub state: ResourceState,
    #[serde(default)]
    pub placement: Placement,
    /// Product (shape) the resource runs on, if the kind has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    /// Image the resource was launched from, if the kind has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_token: Option<String>,
    /// User-assigned private address, if one was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    /// Whether extended monitoring is enabled.
    #[serde(default)]
    pub analytics: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// When the state was observed.
    pub observed_at: DateTime<Utc>,
}

impl ManagedResource {
    /// Create a resource observation stamped with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<ResourceId>,
        kind: ResourceKind,
        name: impl Into<String>,
        state: ResourceState,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            state,
            placement: Placement::default(),
            product_id: None,
            image_id: None,
            client_request_token: None,
            private_ip: None,
            analytics: false,
            labels: BTreeMap::new(),
            observed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    #[must_use]
    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Copy of this observation with a new state and timestamp.
    #[must_use]
    pub fn observed_in(&self, state: ResourceState) -> Self {
        Self {
            state,
            observed_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Check fields every provider must populate.
    ///
    /// # Errors
    /// Returns [`PcvError::Invalid`] when the identifier or name is empty, or
    /// when an instance has no product.
    pub fn validate(&self) -> PcvResult<()> {
        if self.id.as_str().is_empty() {
            return Err(PcvError::invalid(format!("{} with empty id", self.kind)));
        }
        if self.name.is_empty() {
            return Err(PcvError::invalid(format!("{} {} has no name", self.kind, self.id)));
        }
        if self.kind == ResourceKind::Instance && self.product_id.is_none() {
            return Err(PcvError::invalid(format!("instance {} has no product", self.id)));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provisioning spec
// ─────────────────────────────────────────────────────────────────────────────

/// What to provision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ResourceSpec {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    #[must_use]
    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    #[must_use]
    pub fn with_image(mut self, image_id: impl Into<ResourceId>) -> Self {
        self.image_id = Some(image_id.into());
        self
    }

    #[must_use]
    pub fn with_client_request_token(mut self, token: impl Into<String>) -> Self {
        self.client_request_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_private_ip(mut self, address: impl Into<String>) -> Self {
        self.private_ip = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_terminated_denotes_deletion() {
        let deletions: Vec<_> = ResourceState::ALL
            .iter()
            .filter(|s| s.is_deletion())
            .collect();
        assert_eq!(deletions, vec![&ResourceState::Terminated]);
    }

    #[test]
    fn transitional_states_settle() {
        assert_eq!(ResourceState::Stopping.settles_to(), Some(ResourceState::Stopped));
        assert_eq!(ResourceState::Deleting.settles_to(), Some(ResourceState::Terminated));
        assert_eq!(ResourceState::Pending.settles_to(), None);
        assert_eq!(ResourceKind::Instance.ready_state(), ResourceState::Running);
        assert_eq!(ResourceKind::Queue.ready_state(), ResourceState::Available);
    }

    #[test]
    fn pooled_policies() {
        assert!(ReusePolicy::Stateful.is_pooled());
        assert!(ReusePolicy::Stateless.is_pooled());
        assert!(!ReusePolicy::Removed.is_pooled());
        assert!(!ReusePolicy::Private.is_pooled());
    }

    #[test]
    fn placement_or_keeps_explicit_fields() {
        let defaults = Placement::in_region("us-east-1")
            .with_data_center("us-east-1a")
            .with_resource_pool("rp-1")
            .with_storage_pool("sp-1")
            .with_folder("f-1");
        let merged = Placement::default()
            .with_data_center("us-east-1b")
            .with_folder("f-2")
            .with_affinity_group("ag-1")
            .or(&defaults);
        assert_eq!(merged.region.as_deref(), Some("us-east-1"));
        assert_eq!(merged.data_center.as_deref(), Some("us-east-1b"));
        assert_eq!(merged.resource_pool.as_ref().map(ResourceId::as_str), Some("rp-1"));
        assert_eq!(merged.storage_pool.as_ref().map(ResourceId::as_str), Some("sp-1"));
        assert_eq!(merged.folder.as_ref().map(ResourceId::as_str), Some("f-2"));
        assert_eq!(merged.affinity_group.as_ref().map(ResourceId::as_str), Some("ag-1"));
    }

    #[test]
    fn placement_within_scope() {
        let scope = Placement::in_region("us-east-1").with_data_center("us-east-1a");
        assert!(Placement::default().is_within(&scope));
        assert!(Placement::in_region("us-east-1").is_within(&scope));
        assert!(Placement::in_region("us-east-1")
            .with_data_center("us-east-1a")
            .is_within(&scope));
        assert!(!Placement::in_region("eu-west-1").is_within(&scope));
        assert!(!Placement::default()
            .with_data_center("us-east-1b")
            .is_within(&scope));
    }

    #[test]
    fn instance_without_product_is_invalid() {
        let vm = ManagedResource::new("i-1", ResourceKind::Instance, "vm", ResourceState::Running);
        assert!(matches!(vm.validate(), Err(PcvError::Invalid { .. })));
        assert!(vm.with_product("small").validate().is_ok());
    }

    #[test]
    fn observed_in_keeps_identity() {
        let vm = ManagedResource::new("i-1", ResourceKind::Instance, "vm", ResourceState::Running)
            .with_product("small");
        let stopped = vm.observed_in(ResourceState::Stopped);
        assert_eq!(stopped.id, vm.id);
        assert_eq!(stopped.product_id, vm.product_id);
        assert_eq!(stopped.state, ResourceState::Stopped);
    }
}
