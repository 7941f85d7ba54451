//! Runtime cost accounting for sandboxed execution.
//!
//! Every execution owns one [`RuntimeCostMeter`]. The rewriter injects calls
//! to `sandbox/RuntimeCostAccounter` into user code; the interpreter routes
//! those calls here. Three counters are tracked independently:
//!
//! - **invocations** - one per method invocation site executed
//! - **allocations** - one per object, `1 + length` per array
//! - **jumps** - one per backward branch executed
//!
//! Each counter has its own [`Threshold`]. Crossing a limit produces a
//! [`ThresholdViolation`] which the interpreter turns into an abort that no
//! sandboxed handler can observe.
//!
//! # Usage
//!
//! ```
//! use sandbox_core::costing::{ExecutionProfile, RuntimeCostMeter};
//!
//! let mut meter = RuntimeCostMeter::new(ExecutionProfile::DEFAULT.thresholds());
//! meter.record_invocation().unwrap();
//! assert_eq!(meter.summary().invocations, 1);
//! ```

mod meter;
mod summary;

pub use meter::{CostCounter, CostThresholds, RuntimeCostMeter, Threshold, ThresholdViolation};
pub use summary::{CostSummary, ExecutionProfile};
