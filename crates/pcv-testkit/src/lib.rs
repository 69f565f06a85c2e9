//! PCV Test Kit - mock provider and helpers for testing the conformance core.
//!
//! - [`MockProvider`] - in-memory provider with scripted observations and call recording
//! - [`fixtures`] - capability surfaces, product catalogs and resources
//! - assertion helpers for conformance results
//! - tracing configuration for test output
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pcv_testkit::{fixtures, MockProvider, Observation};
//!
//! #[tokio::test(start_paused = true)]
//! async fn survives_transient_misses() {
//!     pcv_testkit::init_test_tracing();
//!
//!     let provider = MockProvider::new(fixtures::full_compute_capabilities());
//!     let vm = fixtures::running_instance("i-1");
//!     provider.seed(vm.clone());
//!     provider.script(&vm.id, [Observation::Missing, Observation::Missing]);
//!     // ... hand `Arc::new(provider)` to the code under test
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod assertions;
pub mod fixtures;
mod mock_provider;
mod tracing_config;

pub use assertions::*;
pub use mock_provider::*;
pub use tracing_config::*;

// Re-export core types for convenience
pub use pcv_core::{ManagedResource, PcvError, PcvResult, Provider, ResourceKind, ResourceState};
