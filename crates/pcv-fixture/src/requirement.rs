//! Declarative fixture requirements.
//!
//! Suites describe which fixture each test needs as data: a
//! [`RequirementTable`] maps test names to [`Binding`]s. Adding a test/fixture
//! pair is a table entry, not a control-flow edit.

use std::collections::HashMap;

use pcv_core::{
    OperationKind, Placement, ResourceId, ResourceKind, ResourceSpec, ResourceState, ReusePolicy,
};
use serde::{Deserialize, Serialize};

use crate::{CapabilityQuery, PoolKey};

/// State a fixture must be in when the test starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pre_state", content = "value", rename_all = "snake_case")]
pub enum PreState {
    /// Any settled, non-deleted state.
    Any,
    Exactly(ResourceState),
    /// The first state from which the capability surface permits the operation.
    FirstAllowing(OperationKind),
}

/// What happens when no fixture can be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Absence {
    /// The test fails.
    #[default]
    Fail,
    /// The test runs without a fixture and records a warning.
    Warn,
}

/// Declarative description of the fixture a test needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureRequirement {
    pub kind: ResourceKind,
    pub policy: ReusePolicy,
    pub pre_state: PreState,
    /// Placement constraints, merged over the suite defaults.
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub on_missing: Absence,
    /// Extra capability predicate checked before provisioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<CapabilityQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<ResourceId>,
}

impl FixtureRequirement {
    /// Requirement for a `kind` fixture under `policy`, in any state.
    #[must_use]
    pub fn new(kind: ResourceKind, policy: ReusePolicy) -> Self {
        Self {
            kind,
            policy,
            pre_state: PreState::Any,
            placement: Placement::default(),
            on_missing: Absence::Fail,
            capability: None,
            product_id: None,
            image_id: None,
        }
    }

    #[must_use]
    pub fn stateful(kind: ResourceKind) -> Self {
        Self::new(kind, ReusePolicy::Stateful)
    }

    #[must_use]
    pub fn stateless(kind: ResourceKind) -> Self {
        Self::new(kind, ReusePolicy::Stateless)
    }

    #[must_use]
    pub fn removed(kind: ResourceKind) -> Self {
        Self::new(kind, ReusePolicy::Removed)
    }

    #[must_use]
    pub fn private(kind: ResourceKind) -> Self {
        Self::new(kind, ReusePolicy::Private)
    }

    #[must_use]
    pub const fn in_state(mut self, state: ResourceState) -> Self {
        self.pre_state = PreState::Exactly(state);
        self
    }

    #[must_use]
    pub const fn first_allowing(mut self, op: OperationKind) -> Self {
        self.pre_state = PreState::FirstAllowing(op);
        self
    }

    #[must_use]
    pub fn placed(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Absence of a fixture becomes a warning instead of a failure.
    #[must_use]
    pub const fn soft(mut self) -> Self {
        self.on_missing = Absence::Warn;
        self
    }

    #[must_use]
    pub fn gated_by(mut self, query: CapabilityQuery) -> Self {
        self.capability = Some(query);
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

    /// Gate query covering kind support plus the extra capability, if any.
    #[must_use]
    pub fn gate_query(&self) -> CapabilityQuery {
        let kind = CapabilityQuery::kind(self.kind);
        match &self.capability {
            Some(extra) => CapabilityQuery::all([kind, extra.clone()]),
            None => kind,
        }
    }

    /// Pool key for a resolved pre-state, or `None` for single-use policies.
    #[must_use]
    pub fn pool_key(&self, state: Option<ResourceState>) -> Option<PoolKey> {
        self.policy
            .is_pooled()
            .then(|| PoolKey::new(self.kind, self.policy, state))
    }

    /// Provisioning spec named `name`, with placement merged over `defaults`.
    #[must_use]
    pub fn spec(&self, name: impl Into<String>, defaults: &Placement) -> ResourceSpec {
        let mut spec =
            ResourceSpec::named(name).with_placement(self.placement.clone().or(defaults));
        if let Some(product) = &self.product_id {
            spec = spec.with_product(product.clone());
        }
        if let Some(image) = &self.image_id {
            spec = spec.with_image(image.clone());
        }
        spec
    }
}

/// What a test is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "binding", rename_all = "snake_case")]
pub enum Binding {
    Requirement(FixtureRequirement),
    /// The test provisions whatever it needs itself.
    NoFixture,
}

/// Test name → fixture binding.
///
/// Lookup order: exact name, then the longest matching prefix, then the
/// default binding.
#[derive(Debug, Clone, Default)]
pub struct RequirementTable {
    exact: HashMap<String, Binding>,
    prefixes: Vec<(String, Binding)>,
    default: Option<Binding>,
}

impl RequirementTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind one test name to a requirement.
    #[must_use]
    pub fn bind(mut self, test: impl Into<String>, requirement: FixtureRequirement) -> Self {
        self.exact
            .insert(test.into(), Binding::Requirement(requirement));
        self
    }

    /// Bind several test names to the same requirement.
    #[must_use]
    pub fn bind_all<I, S>(mut self, tests: I, requirement: &FixtureRequirement) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for test in tests {
            self.exact
                .insert(test.into(), Binding::Requirement(requirement.clone()));
        }
        self
    }

    /// Bind every test whose name starts with `prefix`.
    #[must_use]
    pub fn bind_prefix(mut self, prefix: impl Into<String>, requirement: FixtureRequirement) -> Self {
        self.prefixes
            .push((prefix.into(), Binding::Requirement(requirement)));
        self
    }

    /// Declare that a test provisions its own resources.
    #[must_use]
    pub fn no_fixture(mut self, test: impl Into<String>) -> Self {
        self.exact.insert(test.into(), Binding::NoFixture);
        self
    }

    #[must_use]
    pub fn with_default(mut self, binding: Binding) -> Self {
        self.default = Some(binding);
        self
    }

    /// Binding for `test`, if any entry matches.
    #[must_use]
    pub fn lookup(&self, test: &str) -> Option<&Binding> {
        self.exact
            .get(test)
            .or_else(|| {
                self.prefixes
                    .iter()
                    .filter(|(prefix, _)| test.starts_with(prefix.as_str()))
                    .max_by_key(|(prefix, _)| prefix.len())
                    .map(|(_, binding)| binding)
            })
            .or(self.default.as_ref())
    }

    /// Number of exact and prefix entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty() && self.default.is_none()
    }
}
