//! # Sandbox Executor
//!
//! Runs one entry point in a fresh sandbox: its own classloader, heap,
//! statics and cost meter. Only the bootstrap library, the source loader and
//! the analysis cache are shared, and all three are immutable or
//! content-addressed.
//!
//! ## States
//!
//! ```text
//! Created ─► ClassloaderInitialized ─► EntryPointLoaded ─► Running ─┬─► Completed ─┐
//!    │                  │                      │                    ├─► Faulted   ─┼─► TornDown
//!    └──────────────────┴──────────────────────┴────────────────────┴─► Violated  ─┘
//! ```
//!
//! `Faulted` covers input errors and user exceptions, `Violated` threshold
//! and rule violations. Teardown always closes the classloader, whatever the
//! outcome.
//!
//! ## Failure mapping
//!
//! | Interpreter outcome | [`SandboxFailure`] |
//! |---------------------|--------------------|
//! | throwable escapes `apply` | `UserException` |
//! | fatal error reaches a guarded handler | `UserException` |
//! | cost threshold exceeded | `ThresholdViolation` |
//! | sandbox rule broken | `RuleViolation` |
//! | class loading failed | `ClassLoading` with diagnostics (`Internal` for rewriter defects) |
//! | unexecutable bytecode | `MalformedInput` |

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use sandbox_types::names::is_valid_class_name;

use crate::analysis::AnalysisCache;
use crate::bootstrap::BootstrapLibrary;
use crate::config::SandboxConfiguration;
use crate::costing::CostSummary;
use crate::errors::{LoadError, SandboxClassLoadingException, SandboxFailure};
use crate::interpreter::{Abort, Interpreter, Unwind};
use crate::loader::SandboxClassLoader;
use crate::messages::DiagnosticsReport;
use crate::source::SourceClassLoader;
use crate::value::{from_runtime, to_runtime, SerializedValue};
use crate::well_known::FUNCTION;

/// Result of one execution.
pub type SandboxResult = Result<ExecutionSummary, SandboxFailure>;

/// Lifecycle of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Created,
    ClassloaderInitialized,
    EntryPointLoaded,
    Running,
    Completed,
    Faulted,
    Violated,
    TornDown,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Created => "created",
            ExecutionState::ClassloaderInitialized => "classloader_initialized",
            ExecutionState::EntryPointLoaded => "entry_point_loaded",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Faulted => "faulted",
            ExecutionState::Violated => "violated",
            ExecutionState::TornDown => "torn_down",
        };
        f.write_str(name)
    }
}

/// What a successful execution produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub output: SerializedValue,
    pub costs: CostSummary,
    pub diagnostics: DiagnosticsReport,
}

/// A finished execution, successful or not, for logs and reports.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub entry_point: String,
    /// `completed` or the failure kind.
    pub outcome: String,
    pub summary: Option<ExecutionSummary>,
    pub failure: Option<String>,
}

/// One request of [`execute_batch`].
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub entry_point: String,
    pub input: SerializedValue,
}

impl ExecutionRequest {
    pub fn new(entry_point: impl Into<String>, input: SerializedValue) -> Self {
        Self {
            entry_point: entry_point.into(),
            input,
        }
    }
}

/// Runs entry points under one configuration.
pub struct SandboxExecutor {
    config: SandboxConfiguration,
    bootstrap: Arc<BootstrapLibrary>,
    source: Arc<SourceClassLoader>,
    analysis_cache: Arc<AnalysisCache>,
    state: ExecutionState,
}

impl fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxExecutor")
            .field("state", &self.state)
            .field("classpath", &self.config.classpath)
            .finish()
    }
}

impl SandboxExecutor {
    /// Validate `config` and open its classpath and bootstrap library.
    pub fn new(config: SandboxConfiguration) -> Result<Self> {
        config.validate()?;
        let bootstrap = Arc::new(BootstrapLibrary::load(config.bootstrap_path.as_deref())?);
        let source = Arc::new(SourceClassLoader::from_classpath(&config.classpath)?);
        Ok(Self::with_shared(config, bootstrap, source, Arc::new(AnalysisCache::new())))
    }

    /// Build an executor over already opened shared components.
    pub fn with_shared(
        config: SandboxConfiguration,
        bootstrap: Arc<BootstrapLibrary>,
        source: Arc<SourceClassLoader>,
        analysis_cache: Arc<AnalysisCache>,
    ) -> Self {
        Self {
            config,
            bootstrap,
            source,
            analysis_cache,
            state: ExecutionState::Created,
        }
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn config(&self) -> &SandboxConfiguration {
        &self.config
    }

    pub fn analysis_cache(&self) -> &Arc<AnalysisCache> {
        &self.analysis_cache
    }

    fn transition(&mut self, next: ExecutionState) {
        debug!(from = %self.state, to = %next, "executor state");
        self.state = next;
    }

    /// Run `entry` (original name, `/` or `.` separated) on `input`.
    pub fn run(&mut self, entry: &str, input: &SerializedValue) -> SandboxResult {
        self.state = ExecutionState::Created;
        let mut loader = SandboxClassLoader::new(
            &self.config,
            Arc::clone(&self.bootstrap),
            Arc::clone(&self.source),
            Arc::clone(&self.analysis_cache),
        );
        let result = self.run_in(&mut loader, &entry.replace('.', "/"), input);
        match &result {
            Ok(_) => self.transition(ExecutionState::Completed),
            Err(SandboxFailure::ThresholdViolation(_) | SandboxFailure::RuleViolation { .. }) => {
                self.transition(ExecutionState::Violated)
            }
            Err(_) => self.transition(ExecutionState::Faulted),
        }
        loader.close();
        self.transition(ExecutionState::TornDown);
        result
    }

    fn run_in(&mut self, loader: &mut SandboxClassLoader, entry: &str, input: &SerializedValue) -> SandboxResult {
        if !is_valid_class_name(entry) {
            return Err(SandboxFailure::MalformedInput {
                reason: format!("'{}' is not a valid class name", entry),
            });
        }
        if let Err(e) = loader.initialize() {
            return Err(loading_failure(loader, entry, e));
        }
        self.transition(ExecutionState::ClassloaderInitialized);

        if self.config.validate_references {
            if let Err(e) = loader.validate(entry) {
                return Err(loading_failure(loader, entry, e));
            }
        }
        let class = match loader.load_class(entry) {
            Ok(loaded) => loaded.class,
            Err(e) => return Err(loading_failure(loader, entry, e)),
        };
        if !class.is_subclass_of(FUNCTION) || class.is_abstract() || class.is_interface() {
            return Err(SandboxFailure::MalformedInput {
                reason: format!("Entry point {} must be a concrete class implementing {}", entry, FUNCTION),
            });
        }
        self.transition(ExecutionState::EntryPointLoaded);

        self.transition(ExecutionState::Running);
        let outcome = {
            let mut interpreter = Interpreter::new(loader, &self.config);
            let returned = match to_runtime(&mut interpreter, input) {
                Ok(argument) => interpreter.call_entry(&class, argument),
                Err(unwind) => Err(unwind),
            };
            let costs = interpreter.meter().summary();
            match returned {
                Ok(value) => Ok((from_runtime(&interpreter, value), costs)),
                Err(Unwind::Throw(thrown) | Unwind::Abort(Abort::Fatal(thrown))) => {
                    Err(Outcome::Failure(SandboxFailure::UserException(interpreter.host_exception(thrown))))
                }
                Err(Unwind::Abort(abort)) => Err(Outcome::Abort(abort)),
            }
        };
        match outcome {
            Ok((output, costs)) => {
                let diagnostics = loader.diagnostics();
                info!(entry = %entry, %costs, "execution completed");
                Ok(ExecutionSummary {
                    output,
                    costs,
                    diagnostics,
                })
            }
            Err(Outcome::Failure(failure)) => {
                debug!(entry = %entry, error = %failure, "user exception escaped");
                Err(failure)
            }
            Err(Outcome::Abort(abort)) => Err(abort_failure(loader, entry, abort)),
        }
    }
}

/// A failed run whose heap-dependent parts were already converted.
enum Outcome {
    Failure(SandboxFailure),
    Abort(Abort),
}

fn loading_failure(loader: &SandboxClassLoader, entry: &str, error: LoadError) -> SandboxFailure {
    if let LoadError::Internal { reason, class_name } = &error {
        warn!(class = %class_name, reason = %reason, "sandbox defect while loading");
        return SandboxFailure::Internal {
            reason: error.to_string(),
        };
    }
    SandboxFailure::ClassLoading(SandboxClassLoadingException {
        class_name: entry.to_string(),
        cause: error,
        diagnostics: loader.diagnostics(),
    })
}

fn abort_failure(loader: &SandboxClassLoader, entry: &str, abort: Abort) -> SandboxFailure {
    match abort {
        Abort::Threshold(violation) => {
            warn!(entry = %entry, counter = %violation.counter, limit = violation.limit, "cost threshold exceeded");
            SandboxFailure::ThresholdViolation(violation)
        }
        Abort::RuleViolation(message) => {
            warn!(entry = %entry, message = %message, "sandbox rule violated");
            SandboxFailure::RuleViolation { message }
        }
        Abort::ClassLoading(error) => loading_failure(loader, entry, error),
        Abort::Malformed(reason) => SandboxFailure::MalformedInput { reason },
        Abort::Internal(reason) => SandboxFailure::Internal { reason },
        // Converted before the interpreter was dropped.
        Abort::Fatal(_) => SandboxFailure::Internal {
            reason: "fatal error escaped without a host exception".to_string(),
        },
    }
}

// =============================================================================
// Invocation boundary
// =============================================================================

/// Run `entry` on `input` in a sandbox configured by `config`.
pub fn execute(entry: &str, input: &SerializedValue, config: SandboxConfiguration) -> SandboxResult {
    let mut executor = SandboxExecutor::new(config).map_err(|e| SandboxFailure::MalformedInput {
        reason: format!("{:#}", e),
    })?;
    executor.run(entry, input)
}

/// [`execute`], packaged as a report with a fresh execution id.
pub fn execute_with_report(entry: &str, input: &SerializedValue, config: SandboxConfiguration) -> ExecutionReport {
    let execution_id = Uuid::new_v4().to_string();
    debug!(execution_id = %execution_id, entry = %entry, "starting execution");
    let result = execute(entry, input, config);
    let outcome = match &result {
        Ok(_) => "completed".to_string(),
        Err(failure) => failure.kind().to_string(),
    };
    info!(execution_id = %execution_id, entry = %entry, outcome = %outcome, "execution finished");
    let (summary, failure) = match result {
        Ok(summary) => (Some(summary), None),
        Err(failure) => (None, Some(failure.to_string())),
    };
    ExecutionReport {
        execution_id,
        entry_point: entry.to_string(),
        outcome,
        summary,
        failure,
    }
}

/// Run independent requests in parallel. Each request gets its own
/// classloader, heap and meter; the bootstrap library, classpath and
/// analysis cache are shared. Results are in request order.
pub fn execute_batch(requests: &[ExecutionRequest], config: SandboxConfiguration) -> Vec<SandboxResult> {
    use rayon::prelude::*;

    let shared = config.validate().and_then(|_| {
        let bootstrap = Arc::new(BootstrapLibrary::load(config.bootstrap_path.as_deref())?);
        let source = Arc::new(SourceClassLoader::from_classpath(&config.classpath)?);
        Ok((bootstrap, source))
    });
    let (bootstrap, source) = match shared {
        Ok(shared) => shared,
        Err(e) => {
            let reason = format!("{:#}", e);
            return requests
                .iter()
                .map(|_| {
                    Err(SandboxFailure::MalformedInput {
                        reason: reason.clone(),
                    })
                })
                .collect();
        }
    };
    let analysis_cache = Arc::new(AnalysisCache::new());
    info!(requests = requests.len(), "starting batch execution");
    requests
        .par_iter()
        .map(|request| {
            let mut executor = SandboxExecutor::with_shared(
                config.clone(),
                Arc::clone(&bootstrap),
                Arc::clone(&source),
                Arc::clone(&analysis_cache),
            );
            executor.run(&request.entry_point, &request.input)
        })
        .collect()
}
