//! Capability gate: decides whether a test (or fixture) should run at all.
//!
//! Verdicts are computed from the provider's live capability surface for the
//! suite's region. `Skip` means the feature is categorically absent and the
//! test passes by irrelevance; `Fail` means the capability claims support but
//! the test's own preconditions (a companion fixture) are missing.
//!
//! Companion fixtures only count when they sit in the suite's region and
//! data center, or name no location at all.

use std::fmt;

use futures_util::StreamExt;
use pcv_core::{
    CapabilitySet, Feature, ManagedResource, OperationKind, PcvResult, Placement, Provider,
    ResourceFilter, ResourceKind, ResourceState,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Capability predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum CapabilityQuery {
    /// The provider implements the resource kind.
    Kind { kind: ResourceKind },
    /// The account is entitled to provision the kind.
    Subscribed { kind: ResourceKind },
    Feature { feature: Feature },
    /// The operation is allowed, from `state` if given, else from any state.
    Operation {
        kind: ResourceKind,
        op: OperationKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<ResourceState>,
    },
    /// The feature is supported and at least one `companion` resource exists
    /// to exercise it with.
    FeatureWithCompanion {
        feature: Feature,
        companion: ResourceKind,
    },
    /// Every sub-query must pass; the first non-run verdict wins.
    All { queries: Vec<CapabilityQuery> },
}

impl CapabilityQuery {
    #[must_use]
    pub const fn kind(kind: ResourceKind) -> Self {
        Self::Kind { kind }
    }

    #[must_use]
    pub const fn subscribed(kind: ResourceKind) -> Self {
        Self::Subscribed { kind }
    }

    #[must_use]
    pub const fn feature(feature: Feature) -> Self {
        Self::Feature { feature }
    }

    #[must_use]
    pub const fn operation(kind: ResourceKind, op: OperationKind, state: ResourceState) -> Self {
        Self::Operation {
            kind,
            op,
            state: Some(state),
        }
    }

    #[must_use]
    pub const fn any_operation(kind: ResourceKind, op: OperationKind) -> Self {
        Self::Operation {
            kind,
            op,
            state: None,
        }
    }

    #[must_use]
    pub const fn with_companion(feature: Feature, companion: ResourceKind) -> Self {
        Self::FeatureWithCompanion { feature, companion }
    }

    #[must_use]
    pub fn all(queries: impl IntoIterator<Item = Self>) -> Self {
        Self::All {
            queries: queries.into_iter().collect(),
        }
    }
}

/// Tri-state gate verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Run,
    Skip { reason: String },
    Fail { reason: String },
}

impl Verdict {
    #[must_use]
    pub const fn is_run(&self) -> bool {
        matches!(self, Self::Run)
    }

    fn skip(reason: impl Into<String>) -> Self {
        Self::Skip {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => f.write_str("run"),
            Self::Skip { reason } => write!(f, "skip ({reason})"),
            Self::Fail { reason } => write!(f, "fail ({reason})"),
        }
    }
}

/// Evaluates capability queries for one region. Pure query, no side effects.
#[derive(Debug, Clone)]
pub struct CapabilityGate {
    region: String,
    data_center: Option<String>,
}

impl CapabilityGate {
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            data_center: None,
        }
    }

    /// Narrow companion lookups to one data center.
    #[must_use]
    pub fn in_data_center(mut self, data_center: Option<String>) -> Self {
        self.data_center = data_center;
        self
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn scope(&self) -> Placement {
        let scope = Placement::in_region(self.region.clone());
        match &self.data_center {
            Some(dc) => scope.with_data_center(dc.clone()),
            None => scope,
        }
    }

    /// First live `kind` resource usable from the suite's placement.
    ///
    /// # Errors
    /// Propagates provider errors from listing.
    pub async fn find_companion(
        &self,
        provider: &dyn Provider,
        kind: ResourceKind,
    ) -> PcvResult<Option<ManagedResource>> {
        let scope = self.scope();
        let mut listed = provider.list(kind, ResourceFilter::all());
        while let Some(item) = listed.next().await {
            let resource = item?;
            if !resource.state.is_deletion() && resource.placement.is_within(&scope) {
                return Ok(Some(resource));
            }
            debug!(id = %resource.id, %kind, "companion out of scope");
        }
        Ok(None)
    }

    /// Evaluate `query` against the provider's live capabilities.
    ///
    /// # Errors
    /// Propagates provider errors from `capabilities` or from listing
    /// companion fixtures.
    pub async fn evaluate(
        &self,
        provider: &dyn Provider,
        query: &CapabilityQuery,
    ) -> PcvResult<Verdict> {
        let caps = provider.capabilities(&self.region).await?;
        let verdict = self.evaluate_with(provider, &caps, query).await?;
        debug!(region = %self.region, ?query, %verdict, "capability gate");
        Ok(verdict)
    }

    /// Evaluate `query` against an already-fetched capability set.
    ///
    /// # Errors
    /// Propagates provider errors from listing companion fixtures.
    pub async fn evaluate_with(
        &self,
        provider: &dyn Provider,
        caps: &CapabilitySet,
        query: &CapabilityQuery,
    ) -> PcvResult<Verdict> {
        let mut pending = vec![query];
        while let Some(query) = pending.pop() {
            let verdict = match query {
                CapabilityQuery::All { queries } => {
                    pending.extend(queries.iter().rev());
                    continue;
                }
                CapabilityQuery::FeatureWithCompanion { feature, companion } => {
                    if caps.has_feature(*feature) {
                        match self.find_companion(provider, *companion).await? {
                            Some(_) => Verdict::Run,
                            None => Verdict::Fail {
                                reason: format!(
                                    "{feature} is supported but no {companion} exists in {} to test with",
                                    self.region
                                ),
                            },
                        }
                    } else {
                        Verdict::skip(format!("{feature} not supported in {}", caps.region))
                    }
                }
                other => evaluate_static(caps, other),
            };
            if !verdict.is_run() {
                return Ok(verdict);
            }
        }
        Ok(Verdict::Run)
    }
}

/// Verdict for queries answerable from the capability set alone.
#[must_use]
pub fn evaluate_static(caps: &CapabilitySet, query: &CapabilityQuery) -> Verdict {
    match query {
        CapabilityQuery::Kind { kind } => {
            if caps.supports_kind(*kind) {
                Verdict::Run
            } else {
                Verdict::skip(format!("no {kind} support in {}", caps.region))
            }
        }
        CapabilityQuery::Subscribed { kind } => {
            if !caps.supports_kind(*kind) {
                Verdict::skip(format!("no {kind} support in {}", caps.region))
            } else if caps.is_subscribed(*kind) {
                Verdict::Run
            } else {
                Verdict::skip(format!("account not subscribed to {kind} in {}", caps.region))
            }
        }
        CapabilityQuery::Feature { feature }
        | CapabilityQuery::FeatureWithCompanion { feature, .. } => {
            if caps.has_feature(*feature) {
                Verdict::Run
            } else {
                Verdict::skip(format!("{feature} not supported in {}", caps.region))
            }
        }
        CapabilityQuery::Operation { kind, op, state } => {
            let allowed = match state {
                Some(state) => caps.can(*kind, *op, *state),
                None => caps.supports_operation(*kind, *op),
            };
            match (allowed, state) {
                (true, _) => Verdict::Run,
                (false, Some(state)) => {
                    Verdict::skip(format!("{op} not supported for {kind} in state {state}"))
                }
                (false, None) => Verdict::skip(format!("{op} not supported for {kind}")),
            }
        }
        CapabilityQuery::All { queries } => queries
            .iter()
            .map(|q| evaluate_static(caps, q))
            .find(|v| !v.is_run())
            .unwrap_or(Verdict::Run),
    }
}
