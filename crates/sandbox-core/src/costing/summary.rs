//! Cost summaries and execution profiles.

use serde::{Deserialize, Serialize};

use super::{CostThresholds, Threshold};

/// Final counter values of one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSummary {
    /// Invocation sites executed
    pub invocations: u64,
    /// Allocation units (objects plus array elements)
    pub allocations: u64,
    /// Backward branches executed
    pub jumps: u64,
}

impl CostSummary {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl std::fmt::Display for CostSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invocations={} allocations={} jumps={}",
            self.invocations, self.allocations, self.jumps
        )
    }
}

/// Named threshold presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionProfile {
    /// No limits at all.
    Unlimited,
    /// Limits suitable for ordinary application code.
    Default,
    /// Ten times the default limits, for slow or heavy workloads.
    Slow,
}

impl ExecutionProfile {
    pub const DEFAULT: ExecutionProfile = ExecutionProfile::Default;
    pub const UNLIMITED: ExecutionProfile = ExecutionProfile::Unlimited;
    pub const SLOW: ExecutionProfile = ExecutionProfile::Slow;

    const DEFAULT_LIMIT: u64 = 1_000_000;

    pub fn thresholds(&self) -> CostThresholds {
        let limit = match self {
            ExecutionProfile::Unlimited => return CostThresholds::UNLIMITED,
            ExecutionProfile::Default => Self::DEFAULT_LIMIT,
            ExecutionProfile::Slow => Self::DEFAULT_LIMIT * 10,
        };
        CostThresholds {
            invocation: Threshold::Limited(limit),
            allocation: Threshold::Limited(limit),
            jump: Threshold::Limited(limit),
        }
    }
}
