//! The per-execution cost meter.
//!
//! Counters saturate instead of overflowing. Once a threshold has been
//! crossed the violation is sticky: every later `record` call reports the
//! same violation.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::CostSummary;

/// The kind of work being metered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CostCounter {
    Invocation,
    Allocation,
    Jump,
}

impl CostCounter {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostCounter::Invocation => "invocation",
            CostCounter::Allocation => "allocation",
            CostCounter::Jump => "jump",
        }
    }

    fn activity(&self) -> &'static str {
        match self {
            CostCounter::Invocation => "method invocation",
            CostCounter::Allocation => "allocation",
            CostCounter::Jump => "looping",
        }
    }
}

impl fmt::Display for CostCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limit for one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Threshold {
    Limited(u64),
    Unlimited,
}

impl Threshold {
    /// True when `count` is beyond this threshold.
    pub fn is_exceeded_by(&self, count: u64) -> bool {
        match self {
            Threshold::Limited(limit) => count > *limit,
            Threshold::Unlimited => false,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            Threshold::Limited(limit) => Some(*limit),
            Threshold::Unlimited => None,
        }
    }
}

/// Thresholds for all three counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostThresholds {
    pub invocation: Threshold,
    pub allocation: Threshold,
    pub jump: Threshold,
}

impl CostThresholds {
    pub const UNLIMITED: CostThresholds = CostThresholds {
        invocation: Threshold::Unlimited,
        allocation: Threshold::Unlimited,
        jump: Threshold::Unlimited,
    };

    pub fn get(&self, counter: CostCounter) -> Threshold {
        match counter {
            CostCounter::Invocation => self.invocation,
            CostCounter::Allocation => self.allocation,
            CostCounter::Jump => self.jump,
        }
    }

    pub fn with(mut self, counter: CostCounter, threshold: Threshold) -> Self {
        match counter {
            CostCounter::Invocation => self.invocation = threshold,
            CostCounter::Allocation => self.allocation = threshold,
            CostCounter::Jump => self.jump = threshold,
        }
        self
    }
}

/// A counter went past its configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdViolation {
    pub counter: CostCounter,
    pub limit: u64,
    pub observed: u64,
}

impl fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Terminated due to excessive {} ({} count {} exceeded limit {})",
            self.counter.activity(),
            self.counter,
            self.observed,
            self.limit
        )
    }
}

impl std::error::Error for ThresholdViolation {}

/// Counters and thresholds for one execution.
#[derive(Debug, Clone)]
pub struct RuntimeCostMeter {
    thresholds: CostThresholds,
    invocations: u64,
    allocations: u64,
    jumps: u64,
    violation: Option<ThresholdViolation>,
}

impl RuntimeCostMeter {
    pub fn new(thresholds: CostThresholds) -> Self {
        Self {
            thresholds,
            invocations: 0,
            allocations: 0,
            jumps: 0,
            violation: None,
        }
    }

    /// A meter that counts but never aborts.
    pub fn unlimited() -> Self {
        Self::new(CostThresholds::UNLIMITED)
    }

    pub fn thresholds(&self) -> CostThresholds {
        self.thresholds
    }

    /// Add `weight` to a counter, failing if it now exceeds its threshold.
    pub fn record(&mut self, counter: CostCounter, weight: u64) -> Result<(), ThresholdViolation> {
        if let Some(violation) = self.violation {
            return Err(violation);
        }
        let slot = match counter {
            CostCounter::Invocation => &mut self.invocations,
            CostCounter::Allocation => &mut self.allocations,
            CostCounter::Jump => &mut self.jumps,
        };
        *slot = slot.saturating_add(weight);
        let observed = *slot;

        let threshold = self.thresholds.get(counter);
        if let (true, Some(limit)) = (threshold.is_exceeded_by(observed), threshold.limit()) {
            let violation = ThresholdViolation {
                counter,
                limit,
                observed,
            };
            warn!(counter = %counter, limit, observed, "cost threshold exceeded");
            self.violation = Some(violation);
            return Err(violation);
        }
        Ok(())
    }

    pub fn record_invocation(&mut self) -> Result<(), ThresholdViolation> {
        self.record(CostCounter::Invocation, 1)
    }

    pub fn record_allocation(&mut self) -> Result<(), ThresholdViolation> {
        self.record(CostCounter::Allocation, 1)
    }

    /// Arrays cost one unit for the header plus one per element. Negative
    /// lengths are charged as empty; the allocation itself fails later.
    pub fn record_array_allocation(&mut self, length: i32) -> Result<(), ThresholdViolation> {
        let elements = u64::try_from(length).unwrap_or(0);
        self.record(CostCounter::Allocation, elements.saturating_add(1))
    }

    pub fn record_jump(&mut self) -> Result<(), ThresholdViolation> {
        self.record(CostCounter::Jump, 1)
    }

    pub fn count(&self, counter: CostCounter) -> u64 {
        match counter {
            CostCounter::Invocation => self.invocations,
            CostCounter::Allocation => self.allocations,
            CostCounter::Jump => self.jumps,
        }
    }

    pub fn violation(&self) -> Option<ThresholdViolation> {
        self.violation
    }

    pub fn summary(&self) -> CostSummary {
        CostSummary {
            invocations: self.invocations,
            allocations: self.allocations,
            jumps: self.jumps,
        }
    }
}
