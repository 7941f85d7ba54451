//! Sandbox configuration.
//!
//! [`SandboxConfiguration`] carries everything one execution needs to know:
//! where classes come from, the cost thresholds, diagnostic filters, which
//! rewriter passes run and how clock and randomness behave.
//!
//! # Example
//!
//! ```
//! use sandbox_core::config::{ClockPolicy, SandboxConfiguration};
//! use sandbox_core::costing::ExecutionProfile;
//!
//! let config = SandboxConfiguration::default()
//!     .with_classpath("/tmp/classes")
//!     .with_profile(ExecutionProfile::SLOW)
//!     .with_clock(ClockPolicy::Frozen { timestamp_ms: 1_704_067_200_000 });
//! assert_eq!(config.classpath.len(), 1);
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::costing::{CostCounter, CostThresholds, ExecutionProfile, Threshold};
use crate::messages::Severity;

/// Default base timestamp for deterministic clocks (2024-01-01 00:00:00 UTC).
pub const DEFAULT_CLOCK_BASE_MS: u64 = 1_704_067_200_000;

/// Default tick of an advancing clock.
pub const DEFAULT_CLOCK_TICK_MS: u64 = 1_000;

/// Default limit on nested bytecode calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

// =============================================================================
// Determinism
// =============================================================================

/// What sandboxed reads of the wall clock observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockPolicy {
    /// Clock APIs are rejected when the class is loaded.
    Reject,
    /// Every read returns the same timestamp.
    Frozen { timestamp_ms: u64 },
    /// Each read advances by `tick_ms`, starting at `base_ms`.
    Advancing { base_ms: u64, tick_ms: u64 },
}

/// What sandboxed randomness produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RandomPolicy {
    /// Random APIs are rejected when the class is loaded.
    Reject,
    /// Random APIs are served by a SHA-256 counter PRNG with this seed.
    Seeded { seed: [u8; 32] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminismPolicy {
    pub clock: ClockPolicy,
    pub random: RandomPolicy,
}

impl Default for DeterminismPolicy {
    fn default() -> Self {
        Self {
            clock: ClockPolicy::Reject,
            random: RandomPolicy::Seeded { seed: [0u8; 32] },
        }
    }
}

// =============================================================================
// Rewriter Passes
// =============================================================================

/// Rewriter passes. Each can be switched off on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteOptions {
    pub namespace_isolation: bool,
    pub api_substitution: bool,
    pub interface_stitching: bool,
    pub cost_instrumentation: bool,
    pub exception_remapping: bool,
    pub strict_floating_point: bool,
    pub stub_native_methods: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self::all()
    }
}

impl RewriteOptions {
    pub const fn all() -> Self {
        Self {
            namespace_isolation: true,
            api_substitution: true,
            interface_stitching: true,
            cost_instrumentation: true,
            exception_remapping: true,
            strict_floating_point: true,
            stub_native_methods: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            namespace_isolation: false,
            api_substitution: false,
            interface_stitching: false,
            cost_instrumentation: false,
            exception_remapping: false,
            strict_floating_point: false,
            stub_native_methods: false,
        }
    }
}

// =============================================================================
// Sandbox Configuration
// =============================================================================

/// Configuration of one sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfiguration {
    /// Directories and `.sar` archives searched for user classes, in order.
    pub classpath: Vec<PathBuf>,

    /// Optional replacement-library archive served ahead of user classes.
    pub bootstrap_path: Option<PathBuf>,

    /// Per-counter cost thresholds (default: `ExecutionProfile::DEFAULT`).
    pub thresholds: CostThresholds,

    /// Messages below this severity are dropped (default: `Warning`).
    pub minimum_severity: Severity,

    /// Only keep messages about classes with one of these prefixes.
    /// Empty keeps everything.
    pub prefix_filters: Vec<String>,

    /// Rewriter passes (default: all enabled).
    pub rewrite: RewriteOptions,

    /// Clock and randomness behaviour (default: clock rejected, seeded PRNG).
    pub determinism: DeterminismPolicy,

    /// Maximum nesting of bytecode calls before `StackOverflowError`
    /// (default: 256).
    pub max_call_depth: usize,

    /// Load and check the whole reference graph of the entry point before
    /// running it (default: false).
    pub validate_references: bool,
}

impl Default for SandboxConfiguration {
    fn default() -> Self {
        Self {
            classpath: Vec::new(),
            bootstrap_path: None,
            thresholds: ExecutionProfile::DEFAULT.thresholds(),
            minimum_severity: Severity::Warning,
            prefix_filters: Vec::new(),
            rewrite: RewriteOptions::all(),
            determinism: DeterminismPolicy::default(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            validate_references: false,
        }
    }
}

impl SandboxConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration overlaid with `SANDBOX_*` environment variables.
    ///
    /// - `SANDBOX_CLASSPATH` - comma-separated classpath entries
    /// - `SANDBOX_BOOTSTRAP_PATH` - replacement-library archive
    /// - `SANDBOX_MAX_CALL_DEPTH` - call depth limit
    /// - `SANDBOX_VALIDATE_REFERENCES` - `1`/`true`/`yes`/`on`
    /// - `SANDBOX_JUMP_LIMIT`, `SANDBOX_INVOCATION_LIMIT`,
    ///   `SANDBOX_ALLOCATION_LIMIT` - per-counter limits
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Default configuration overlaid with the `SANDBOX_*` variables that
    /// `lookup` knows about. [`Self::from_env`] reads the process environment.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = Vars(lookup);
        let mut config = Self::default();
        config.classpath.extend(vars.list("SANDBOX_CLASSPATH").into_iter().map(PathBuf::from));
        if let Some(path) = vars.parse::<String>("SANDBOX_BOOTSTRAP_PATH") {
            config.bootstrap_path = Some(PathBuf::from(path));
        }
        config.max_call_depth = vars.parse("SANDBOX_MAX_CALL_DEPTH").unwrap_or(config.max_call_depth);
        config.validate_references = vars.bool_or("SANDBOX_VALIDATE_REFERENCES", config.validate_references);
        for (key, counter) in [
            ("SANDBOX_JUMP_LIMIT", CostCounter::Jump),
            ("SANDBOX_INVOCATION_LIMIT", CostCounter::Invocation),
            ("SANDBOX_ALLOCATION_LIMIT", CostCounter::Allocation),
        ] {
            if let Some(limit) = vars.parse::<u64>(key) {
                config.thresholds = config.thresholds.with(counter, Threshold::Limited(limit));
            }
        }
        config
    }

    /// Check that the configuration can drive an execution.
    pub fn validate(&self) -> Result<()> {
        if !self.rewrite.namespace_isolation {
            bail!("namespace isolation cannot be disabled for execution");
        }
        if self.max_call_depth == 0 {
            bail!("max_call_depth must be at least 1");
        }
        Ok(())
    }

    /// Builder method: append a classpath entry.
    pub fn with_classpath(mut self, entry: impl Into<PathBuf>) -> Self {
        self.classpath.push(entry.into());
        self
    }

    /// Builder method: set the replacement-library archive.
    pub fn with_bootstrap_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bootstrap_path = Some(path.into());
        self
    }

    /// Builder method: use the thresholds of a profile.
    pub fn with_profile(mut self, profile: ExecutionProfile) -> Self {
        self.thresholds = profile.thresholds();
        self
    }

    /// Builder method: set all thresholds.
    pub fn with_thresholds(mut self, thresholds: CostThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Builder method: set one counter's threshold.
    pub fn with_threshold(mut self, counter: CostCounter, threshold: Threshold) -> Self {
        self.thresholds = self.thresholds.with(counter, threshold);
        self
    }

    pub fn with_minimum_severity(mut self, severity: Severity) -> Self {
        self.minimum_severity = severity;
        self
    }

    pub fn with_prefix_filter(mut self, prefix: impl Into<String>) -> Self {
        self.prefix_filters.push(prefix.into());
        self
    }

    pub fn with_rewrite_options(mut self, options: RewriteOptions) -> Self {
        self.rewrite = options;
        self
    }

    pub fn with_determinism(mut self, policy: DeterminismPolicy) -> Self {
        self.determinism = policy;
        self
    }

    pub fn with_clock(mut self, clock: ClockPolicy) -> Self {
        self.determinism.clock = clock;
        self
    }

    pub fn with_random(mut self, random: RandomPolicy) -> Self {
        self.determinism.random = random;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_validate_references(mut self, validate: bool) -> Self {
        self.validate_references = validate;
        self
    }
}

// =============================================================================
// Environment Helpers
// =============================================================================

/// Typed reads over a variable lookup.
struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        (self.0)(key).and_then(|v| v.trim().parse().ok())
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        match (self.0)(key) {
            Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        (self.0)(key)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = SandboxConfiguration::default();
        assert_eq!(config.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(config.minimum_severity, Severity::Warning);
        assert_eq!(config.determinism.clock, ClockPolicy::Reject);
        assert_eq!(config.rewrite, RewriteOptions::all());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let config = SandboxConfiguration::default()
            .with_classpath("/opt/classes")
            .with_classpath("/opt/lib.sar")
            .with_threshold(CostCounter::Jump, Threshold::Limited(1000))
            .with_prefix_filter("com/acme/")
            .with_clock(ClockPolicy::Advancing {
                base_ms: DEFAULT_CLOCK_BASE_MS,
                tick_ms: DEFAULT_CLOCK_TICK_MS,
            })
            .with_random(RandomPolicy::Seeded { seed: [7u8; 32] });
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: SandboxConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validation() {
        let mut options = RewriteOptions::all();
        options.namespace_isolation = false;
        assert!(SandboxConfiguration::default()
            .with_rewrite_options(options)
            .validate()
            .is_err());
        assert!(SandboxConfiguration::default()
            .with_max_call_depth(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_env_overlay() {
        let vars = HashMap::from([
            ("SANDBOX_MAX_CALL_DEPTH", "64"),
            ("SANDBOX_JUMP_LIMIT", "5000"),
            ("SANDBOX_CLASSPATH", "/a, /b.sar"),
            ("SANDBOX_VALIDATE_REFERENCES", "Yes"),
            ("SANDBOX_ALLOCATION_LIMIT", "lots"),
        ]);
        let config = SandboxConfiguration::from_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.thresholds.jump, Threshold::Limited(5000));
        assert_eq!(config.thresholds.allocation, SandboxConfiguration::default().thresholds.allocation);
        assert!(config.validate_references);
        assert_eq!(config.classpath, vec![PathBuf::from("/a"), PathBuf::from("/b.sar")]);
    }

    #[test]
    fn test_empty_overlay_is_default() {
        let config = SandboxConfiguration::from_vars(|_| None);
        let default = SandboxConfiguration::default();
        assert_eq!(config.max_call_depth, default.max_call_depth);
        assert_eq!(config.validate_references, default.validate_references);
        assert!(config.classpath.is_empty());
    }
}
