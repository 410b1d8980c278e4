//! Task execution: the executor, the plan scheduler, and monitoring.
//!
//! [`Executor`] runs individual tasks through the hardening pipeline with
//! timeouts, retries, and cancellation; its scheduler drives a whole plan's
//! task DAG, dispatching independent tasks in parallel. The sibling
//! monitors record metrics and progress for everything that runs.

pub mod executor;
pub mod monitor;

pub use executor::{Executor, ProgressCallback, RetryOptions};
pub use monitor::{
    ExecutionMetrics, ExecutionMonitor, ExecutionStats, ListenerId, MetricSummary,
    PerformanceMonitor, ProgressStatus, ProgressTracker, ProgressUpdate,
};
