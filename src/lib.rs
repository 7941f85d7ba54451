//! Deterministic Sandbox
//!
//! Runs untrusted class files in an isolated, metered and deterministic
//! sandbox:
//!
//! - **Isolation**: every user class is renamed into a reserved namespace
//!   and can only link against a replacement library
//! - **Metering**: invocations, allocations and backward jumps are counted
//!   against configurable thresholds
//! - **Determinism**: clocks, randomness and identity hashes are injected
//!   stand-ins, so equal inputs give byte-identical outputs
//!
//! See [`engine`] for the pipeline and [`types`] for the class-file model.
//!
//! # Example
//!
//! ```ignore
//! use det_sandbox::{execute, SandboxConfiguration, SerializedValue};
//!
//! let config = SandboxConfiguration::default().with_classpath("build/classes");
//! let summary = execute("com.acme.Sum", &SerializedValue::array([1, 2, 3]), config)?;
//! assert_eq!(summary.output, SerializedValue::Int(6));
//! ```

#![allow(clippy::result_large_err)]

use std::sync::Arc;

use tracing::debug;

pub use sandbox_core as engine;
pub use sandbox_types as types;

pub use sandbox_core::{
    execute, execute_batch, execute_with_report, ClockPolicy, CostCounter, CostSummary, CostThresholds,
    DeterminismPolicy, DiagnosticsReport, ExecutionProfile, ExecutionReport, ExecutionRequest, ExecutionState,
    ExecutionSummary, HostException, RandomPolicy, RewriteOptions, SandboxConfiguration, SandboxExecutor,
    SandboxFailure, SandboxResult, SerializedValue, Severity, Threshold, ThresholdViolation,
};

use sandbox_core::analysis::AnalysisCache;
use sandbox_core::{BootstrapLibrary, MemoryProvider, SourceClassLoader};
use sandbox_types::{encode_class, ClassFile};

/// Run `entry` with `classes` served ahead of the configured classpath.
///
/// For callers that generate or receive class files in memory instead of
/// shipping them on disk.
pub fn execute_classes(
    entry: &str,
    classes: &[ClassFile],
    input: &SerializedValue,
    config: SandboxConfiguration,
) -> SandboxResult {
    let malformed = |e: anyhow::Error| SandboxFailure::MalformedInput {
        reason: format!("{:#}", e),
    };
    config.validate().map_err(malformed)?;
    let mut provider = MemoryProvider::new();
    for class in classes {
        provider.insert(class.name.clone(), encode_class(class).map_err(malformed)?);
    }
    let bootstrap = BootstrapLibrary::load(config.bootstrap_path.as_deref()).map_err(malformed)?;
    let source = SourceClassLoader::new()
        .with_provider(provider)
        .chain(SourceClassLoader::from_classpath(&config.classpath).map_err(malformed)?);
    debug!(entry = %entry, classes = classes.len(), "executing in-memory classes");
    let mut executor = SandboxExecutor::with_shared(
        config,
        Arc::new(bootstrap),
        Arc::new(source),
        Arc::new(AnalysisCache::new()),
    );
    executor.run(entry, input)
}
