//! PCV Suites - conformance suites for provider drivers.
//!
//! Each suite module exposes its requirement table, one async function per
//! test, and a [`SuiteDefinition`] tying them together:
//!
//! - [`compute`]: stateful virtual machine lifecycle
//! - [`queue`]: stateful message queues
//! - [`database`]: stateless relational database lookups
//!
//! [`run_suite`] runs one definition against a provider with its own
//! [`pcv_fixture::SuiteContext`]; [`run_all`] runs every suite side by side.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod compute;
pub mod database;
pub mod queue;
mod runner;

pub use runner::{run_all, run_suite, SuiteDefinition, TestCase, TestFn};
