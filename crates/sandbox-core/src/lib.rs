//! Sandbox Core
//!
//! Deterministic execution engine for untrusted class files.
//!
//! User code is analyzed, rewritten into the `sandbox/` namespace,
//! instrumented with cost accounting, and run by an interpreter whose only
//! view of the outside world is a replacement library with deterministic
//! stand-ins for clocks, randomness and identity hashes.
//!
//! # Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Locate bytes | [`source`] | raw class files from directories, archives or memory |
//! | Analyze | [`analysis`] | members, references and hierarchy per class |
//! | Rewrite | [`rewrite`] | sandboxed names, API rules, cost hooks |
//! | Load | [`loader`] | verified [`loader::RuntimeClass`] definitions |
//! | Execute | [`interpreter`] | results metered by [`costing`] |
//! | Report | [`executor`] | [`SandboxResult`] with costs and diagnostics |
//!
//! # Example
//!
//! ```ignore
//! use sandbox_core::{execute, SandboxConfiguration, SerializedValue};
//!
//! let config = SandboxConfiguration::default().with_classpath("classes/");
//! let summary = execute("app/Sum", &SerializedValue::array([1, 2, 3, 4, 5]), config)?;
//! println!("{:?} after {}", summary.output, summary.costs);
//! ```

#![allow(clippy::result_large_err)]
#![allow(clippy::too_many_arguments)]

pub mod analysis;
pub mod bootstrap;
pub mod config;
pub mod costing;
pub mod errors;
pub mod executor;
pub mod interpreter;
pub mod loader;
pub mod messages;
pub mod natives;
pub mod rewrite;
pub mod source;
pub mod unicode;
pub mod value;
pub mod well_known;

pub use bootstrap::BootstrapLibrary;
pub use config::{ClockPolicy, DeterminismPolicy, RandomPolicy, RewriteOptions, SandboxConfiguration};
pub use costing::{CostCounter, CostSummary, CostThresholds, ExecutionProfile, Threshold, ThresholdViolation};
pub use errors::{HostException, LoadError, SandboxClassLoadingException, SandboxFailure, StackFrame};
pub use executor::{
    execute, execute_batch, execute_with_report, ExecutionReport, ExecutionRequest, ExecutionState,
    ExecutionSummary, SandboxExecutor, SandboxResult,
};
pub use messages::{DiagnosticsReport, Message, Severity};
pub use source::{ClassProvider, MemoryProvider, SourceClassLoader};
pub use value::SerializedValue;
