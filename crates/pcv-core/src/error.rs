//! Error taxonomy for provider conformance runs.
//!
//! Categories:
//! - Capability: `Unsupported`, `NotSubscribed`
//! - Provider request: `QuotaExceeded`, `InvalidSpec`, `InvalidState`, `NotFound`
//! - Observation: `TransientObservation`, `Lost`, `TimedOut`
//! - Contract: `Invalid`, `PreconditionFailed`, `Assertion`
//! - Harness: `FixtureUnavailable`, `PoolClosed`, `Config`, `Internal`
//! - Unclassified provider failures: `Provider`

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{OperationKind, ResourceId, ResourceKind, ResourceState};

/// Error type covering every category the harness distinguishes.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum PcvError {
    // ─────────────────────────────────────────────────────────────────────────
    // Capability errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The provider does not offer the feature or operation at all.
    #[error("unsupported: {what}")]
    Unsupported { what: String },

    /// The account lacks the entitlement for this kind of resource.
    #[error("account not subscribed to {kind}")]
    NotSubscribed { kind: ResourceKind },

    // ─────────────────────────────────────────────────────────────────────────
    // Provider request errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("quota exceeded for {kind}: {message}")]
    QuotaExceeded { kind: ResourceKind, message: String },

    #[error("invalid resource spec: {message}")]
    InvalidSpec { message: String },

    /// The operation is not allowed from the resource's current state.
    #[error("{operation} not allowed for {id} in state {state}")]
    InvalidState {
        id: ResourceId,
        operation: OperationKind,
        state: ResourceState,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: ResourceId },

    // ─────────────────────────────────────────────────────────────────────────
    // Observation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A fetch or list call failed in a way that may succeed on retry.
    #[error("transient observation error: {message}")]
    TransientObservation { message: String },

    /// The resource disappeared while a non-deletion state was awaited.
    #[error("{kind} {id} disappeared after {misses} consecutive misses")]
    Lost {
        kind: ResourceKind,
        id: ResourceId,
        misses: u32,
    },

    /// The convergence deadline passed before the target state was observed.
    #[error("{id} did not reach {target} in time (last observed {observed})")]
    TimedOut {
        id: ResourceId,
        target: ResourceState,
        observed: ResourceState,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Contract errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Provider output contradicts the contract (e.g. a missing mandatory field).
    #[error("invalid provider response: {message}")]
    Invalid { message: String },

    /// The test's own preconditions do not hold.
    #[error("precondition failed: {message}")]
    PreconditionFailed { message: String },

    /// The driver behaved differently than the contract requires.
    #[error("assertion failed: {message}")]
    Assertion { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Harness errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("no fixture available for {test}: {reason}")]
    FixtureUnavailable { test: String, reason: String },

    #[error("resource pool already drained")]
    PoolClosed,

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Unclassified
    // ─────────────────────────────────────────────────────────────────────────
    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },
}

impl PcvError {
    /// Create an `Unsupported` error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
    }

    /// Create a `TransientObservation` error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientObservation {
            message: message.into(),
        }
    }

    /// Create an `Invalid` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a `PreconditionFailed` error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Create an `Assertion` error.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }

    /// Create an unclassified provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the error means "not applicable here" and the test
    /// should be reported as skipped rather than failed.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Returns true if the error may clear up on its own and is safe to retry
    /// while waiting for convergence.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientObservation { .. } | Self::Provider { .. })
    }

    /// Returns true if the error always fails the test, regardless of context.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Invalid { .. } | Self::PreconditionFailed { .. } | Self::Internal { .. }
        )
    }

    /// Stable short code used in reports.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unsupported { .. } => "unsupported",
            Self::NotSubscribed { .. } => "not_subscribed",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::InvalidSpec { .. } => "invalid_spec",
            Self::InvalidState { .. } => "invalid_state",
            Self::NotFound { .. } => "not_found",
            Self::TransientObservation { .. } => "transient_observation",
            Self::Lost { .. } => "lost",
            Self::TimedOut { .. } => "timed_out",
            Self::Invalid { .. } => "invalid",
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::Assertion { .. } => "assertion_failed",
            Self::FixtureUnavailable { .. } => "fixture_unavailable",
            Self::PoolClosed => "pool_closed",
            Self::Config { .. } => "config",
            Self::Internal { .. } => "internal",
            Self::Provider { .. } => "provider",
        }
    }
}

/// Result type for conformance operations.
pub type PcvResult<T> = Result<T, PcvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_is_skip_not_fatal() {
        let err = PcvError::unsupported("affinity groups");
        assert!(err.is_skip());
        assert!(!err.is_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn invalid_is_fatal() {
        let err = PcvError::invalid("instance missing product id");
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn assertion_failures_are_plain_failures() {
        let err = PcvError::assertion("product did not change");
        assert!(!err.is_fatal());
        assert!(!err.is_skip());
        assert_eq!(err.code(), "assertion_failed");
    }

    #[test]
    fn unclassified_provider_errors_are_retryable_during_polling() {
        let err = PcvError::provider("mock", "connection reset");
        assert!(err.is_transient());
        assert_eq!(err.code(), "provider");
    }

    #[test]
    fn serializes_with_category_tag() {
        let err = PcvError::NotSubscribed {
            kind: ResourceKind::Instance,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["category"], "not_subscribed");
        assert_eq!(json["kind"], "instance");
    }
}
