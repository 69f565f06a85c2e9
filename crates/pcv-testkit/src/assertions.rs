//! Assertion helpers for conformance tests.

use std::fmt::Debug;

use pcv_core::{ManagedResource, PcvError, PcvResult, ResourceKind, ResourceState};

// ─────────────────────────────────────────────────────────────────────────────
// Result assertions
// ─────────────────────────────────────────────────────────────────────────────

/// Assert that `result` failed with an error of category `code`
/// (see [`PcvError::code`]).
///
/// # Panics
///
/// Panics if the result is Ok or has a different category.
pub fn assert_error_code<T: Debug>(result: &PcvResult<T>, code: &str) {
    match result {
        Ok(value) => panic!("expected {code} error but got Ok({value:?})"),
        Err(err) => assert_eq!(err.code(), code, "unexpected error: {err}"),
    }
}

/// Assert that provisioning was refused for lack of entitlement to `kind`.
///
/// # Panics
///
/// Panics on any other result.
pub fn assert_not_subscribed<T: Debug>(result: &PcvResult<T>, kind: ResourceKind) {
    match result {
        Err(PcvError::NotSubscribed { kind: actual }) if *actual == kind => {}
        other => panic!("expected NotSubscribed for {kind} but got: {other:?}"),
    }
}

/// Assert that the operation was reported as unsupported.
///
/// # Panics
///
/// Panics if the result is not an `Unsupported` error.
pub fn assert_unsupported<T: Debug>(result: &PcvResult<T>) {
    assert!(
        matches!(result, Err(PcvError::Unsupported { .. })),
        "expected Unsupported but got: {result:?}"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Resource assertions
// ─────────────────────────────────────────────────────────────────────────────

/// Assert that a resource was observed in `state`.
///
/// # Panics
///
/// Panics if the state differs.
pub fn assert_state(resource: &ManagedResource, state: ResourceState) {
    assert_eq!(
        resource.state, state,
        "{} {} is {} but expected {state}",
        resource.kind, resource.id, resource.state
    );
}

/// Assert that a fetched resource passes contract validation.
///
/// # Panics
///
/// Panics if [`ManagedResource::validate`] fails.
pub fn assert_valid(resource: &ManagedResource) {
    if let Err(err) = resource.validate() {
        panic!("invalid resource {resource:?}: {err}");
    }
}
