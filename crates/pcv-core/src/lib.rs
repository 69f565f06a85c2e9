//! PCV Core - core types and the provider contract for provider conformance
//! verification.
//!
//! This crate provides the data model shared by the fixture core, the test
//! kit and the conformance suites:
//!
//! - [`ManagedResource`], [`ResourceKind`], [`ResourceState`], [`ReusePolicy`]
//! - [`Operation`] and [`plan_transition`]
//! - [`CapabilitySet`] and [`Feature`]
//! - [`Product`] catalog entries
//! - the [`Provider`] trait drivers implement
//! - [`NamingConvention`] for harness-created resources
//! - the [`PcvError`] taxonomy

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod capability;
mod error;
mod naming;
mod operation;
mod product;
mod provider;
mod resource;

pub use capability::*;
pub use error::*;
pub use naming::*;
pub use operation::*;
pub use product::*;
pub use provider::*;
pub use resource::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use chrono::{DateTime, Utc};
