//! PCV Fixture - fixture orchestration and state convergence for provider
//! conformance suites.
//!
//! Components, leaves first:
//!
//! - [`CapabilityGate`]: run / skip / fail verdicts from the live capability surface
//! - [`select_larger`] / [`select_smaller`]: product selection for resize tests
//! - [`ResourcePool`]: per-suite fixture ledger with LIFO teardown
//! - [`StateConvergencePoller`]: bounded, disappearance-tolerant state polling
//! - [`FixtureOrchestrator`]: test name → ready fixture, via a [`RequirementTable`]
//! - [`TestLifecycleController`]: begin/end bracketing and the [`SuiteReport`]
//!
//! A [`SuiteContext`] ties them together for one suite run.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod context;
mod gate;
mod lifecycle;
mod logging;
mod orchestrator;
mod poller;
mod pool;
mod report;
mod requirement;
mod selector;

pub use config::{FixtureConfig, LoggingConfig, NamingConfig, PollConfig, TimeoutConfig};
pub use context::SuiteContext;
pub use gate::{evaluate_static, CapabilityGate, CapabilityQuery, Verdict};
pub use lifecycle::{Begin, TestLifecycleController, TestScope};
pub use logging::init_logging;
pub use orchestrator::{FixtureOrchestrator, Resolution};
pub use poller::{Convergence, ConvergenceQuery, StateConvergencePoller};
pub use pool::{
    Acquired, CleanupObligation, DrainFailure, DrainReport, LedgerEntry, PoolKey, Prepared,
    ReleaseOutcome, ResourcePool,
};
pub use report::{Note, NoteLevel, OutcomeCounts, SuiteReport, TestOutcome, TestRecord};
pub use requirement::{Absence, Binding, FixtureRequirement, PreState, RequirementTable};
pub use selector::{select, select_larger, select_smaller, ResizeDirection};
