//! The task executor and plan scheduler.
//!
//! [`Executor::execute_task`] drives a single task through the full
//! invocation pipeline: cancellation check, worker acquisition, tool
//! resolution, rate limiting, sanitization, the plugin `before_task`
//! chain, circuit breaking, the tool body under a timeout watchdog, and
//! finally bookkeeping (status, metrics, bus events, `after_task`).
//!
//! [`Executor::execute_plan`] schedules a plan's task DAG: the ready set
//! (pending tasks whose dependencies are all completed) is dispatched in
//! parallel up to `max_workers`; a failed task never unblocks its
//! dependents — they are cancelled with `error = "dependency failed"`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::monitor::{
    ExecutionMetrics, ExecutionMonitor, PerformanceMonitor, ProgressStatus, ProgressUpdate,
};
use crate::config::Config;
use crate::error::Error;
use crate::events::{EventBus, TASK_CANCELLED, TASK_COMPLETED, TASK_FAILED, TASK_STARTED};
use crate::hardening::{CircuitBreaker, InputSanitizer, RateLimiter};
use crate::plugin::PluginRegistry;
use crate::tool::{ToolOutput, ToolRegistry};
use crate::types::{Context, Plan, PlanStatus, Task, TaskResult, TaskStatus};

/// Per-call progress callback, invoked alongside the monitor's listeners.
pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Options for [`Executor::execute_with_retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Base delay before the first retry, in seconds.
    pub retry_delay: f64,
    /// Multiplier applied to the delay per subsequent attempt.
    pub backoff_multiplier: f64,
    /// Whether to randomize each delay.
    pub jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: 1.0,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryOptions {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.retry_delay * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let seconds = if self.jitter {
            base * (0.5 + fastrand::f64())
        } else {
            base
        };
        Duration::from_secs_f64(seconds.max(0.0))
    }
}

/// Executes tasks against the tool registry with hardening applied.
pub struct Executor {
    tools: Arc<ToolRegistry>,
    plugins: Arc<PluginRegistry>,
    events: Arc<EventBus>,
    monitor: Arc<ExecutionMonitor>,
    performance: Arc<PerformanceMonitor>,
    sanitizer: InputSanitizer,
    limiter: RateLimiter,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    breaker_config: crate::config::CircuitBreakerConfig,
    workers: Arc<Semaphore>,
    max_workers: usize,
    default_timeout: Duration,
    cancelled: Mutex<HashSet<String>>,
    finished: Mutex<HashSet<String>>,
    running: Mutex<HashMap<String, Arc<Notify>>>,
    closed: Mutex<bool>,
}

impl Executor {
    /// Build an executor from configuration and shared services.
    #[must_use]
    pub fn new(
        config: &Config,
        tools: Arc<ToolRegistry>,
        plugins: Arc<PluginRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        let max_workers = config.agent.max_workers.max(1);
        Self {
            tools,
            plugins,
            events,
            monitor: Arc::new(ExecutionMonitor::new()),
            performance: Arc::new(PerformanceMonitor::new()),
            sanitizer: InputSanitizer::new(config.hardening.sanitizer.clone()),
            limiter: RateLimiter::new(config.hardening.rate_limit),
            breakers: Mutex::new(HashMap::new()),
            breaker_config: config.hardening.circuit_breaker,
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            default_timeout: Duration::from_secs_f64(
                config.agent.default_task_timeout_seconds.max(0.001),
            ),
            cancelled: Mutex::new(HashSet::new()),
            finished: Mutex::new(HashSet::new()),
            running: Mutex::new(HashMap::new()),
            closed: Mutex::new(false),
        }
    }

    /// The execution monitor.
    #[must_use]
    pub fn monitor(&self) -> Arc<ExecutionMonitor> {
        Arc::clone(&self.monitor)
    }

    /// The performance sample store.
    #[must_use]
    pub fn performance(&self) -> Arc<PerformanceMonitor> {
        Arc::clone(&self.performance)
    }

    /// Metrics recorded for one task.
    #[must_use]
    pub fn metrics(&self, task_id: &str) -> Option<ExecutionMetrics> {
        self.monitor.metrics(task_id)
    }

    /// Ids of tasks currently executing.
    #[must_use]
    pub fn running_tasks(&self) -> Vec<String> {
        self.running
            .lock()
            .expect("executor lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// The circuit breaker guarding one tool, created on first use.
    #[must_use]
    pub fn breaker(&self, tool_name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("executor lock poisoned");
        Arc::clone(breakers.entry(tool_name.to_owned()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(tool_name, self.breaker_config))
        }))
    }

    /// Mark a task for cancellation.
    ///
    /// Returns `false` if the task has already finished; otherwise `true`,
    /// and any in-flight or future attempt surfaces `error = "cancelled"`.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        if self
            .finished
            .lock()
            .expect("executor lock poisoned")
            .contains(task_id)
        {
            return false;
        }
        self.cancelled
            .lock()
            .expect("executor lock poisoned")
            .insert(task_id.to_owned());
        if let Some(notify) = self
            .running
            .lock()
            .expect("executor lock poisoned")
            .get(task_id)
        {
            // notify_one stores a permit, so a cancellation that lands
            // before the watchdog first polls is not lost.
            notify.notify_one();
        }
        debug!(task_id, "task marked for cancellation");
        true
    }

    fn is_cancelled(&self, task_id: &str) -> bool {
        self.cancelled
            .lock()
            .expect("executor lock poisoned")
            .contains(task_id)
    }

    fn mark_finished(&self, task_id: &str) {
        self.finished
            .lock()
            .expect("executor lock poisoned")
            .insert(task_id.to_owned());
        self.running
            .lock()
            .expect("executor lock poisoned")
            .remove(task_id);
    }

    fn report(
        &self,
        on_progress: Option<&ProgressCallback>,
        task_id: &str,
        status: ProgressStatus,
        percent: f64,
        message: &str,
    ) {
        let update = ProgressUpdate::new(task_id, status, percent, message);
        if let Some(callback) = on_progress {
            callback(&update);
        }
        self.monitor.tracker().update(update);
    }

    /// Execute a single task through the full pipeline.
    ///
    /// The task is mutated in place: status transitions, timestamps,
    /// result/error. Failures of any kind resolve to a failed
    /// [`TaskResult`]; this method never returns an error.
    pub async fn execute_task(
        &self,
        task: &mut Task,
        context: &Context,
        timeout: Option<Duration>,
        on_progress: Option<ProgressCallback>,
    ) -> TaskResult {
        let task_id = task.id.clone();
        let on_progress = on_progress.as_ref();

        if *self.closed.lock().expect("executor lock poisoned") {
            task.set_status(TaskStatus::Cancelled);
            task.error = Some("executor closed".to_owned());
            return TaskResult::fail(&task_id, "executor closed", 0.0);
        }

        // (1) Cancelled before pickup.
        if self.is_cancelled(&task_id) {
            task.set_status(TaskStatus::Cancelled);
            task.error = Some("cancelled".to_owned());
            self.monitor.cancel_task(&task_id);
            self.mark_finished(&task_id);
            self.events.emit(TASK_CANCELLED, json!({ "task_id": task_id }));
            return TaskResult::fail(&task_id, "cancelled", 0.0);
        }

        // Worker acquisition; the semaphore bounds concurrent tool bodies.
        let permit = self
            .workers
            .acquire()
            .await
            .expect("worker semaphore closed");

        // Re-check after possibly waiting for a worker.
        if self.is_cancelled(&task_id) {
            drop(permit);
            task.set_status(TaskStatus::Cancelled);
            task.error = Some("cancelled".to_owned());
            self.monitor.cancel_task(&task_id);
            self.mark_finished(&task_id);
            self.events.emit(TASK_CANCELLED, json!({ "task_id": task_id }));
            return TaskResult::fail(&task_id, "cancelled", 0.0);
        }

        // (2) Started.
        self.monitor.start_task(&task_id);
        self.report(on_progress, &task_id, ProgressStatus::Starting, 0.0, "started");
        self.events.emit(
            TASK_STARTED,
            json!({ "task_id": task_id, "tool": task.tool_name, "session_id": context.session_id }),
        );

        task.started_at = Some(Utc::now());
        task.set_status(TaskStatus::Running);
        let started = Instant::now();

        let outcome = self.run_pipeline(task, timeout, on_progress).await;
        drop(permit);

        let elapsed = started.elapsed().as_secs_f64();
        task.completed_at = Some(Utc::now());
        self.performance
            .record(&task_id, "execution_time", elapsed);
        self.mark_finished(&task_id);

        let result = match outcome {
            PipelineOutcome::Success(output) => {
                task.set_status(TaskStatus::Completed);
                task.result.clone_from(&output.data);
                self.monitor.complete_task(&task_id, true);
                self.report(
                    on_progress,
                    &task_id,
                    ProgressStatus::Completed,
                    100.0,
                    "completed",
                );
                self.events.emit(
                    TASK_COMPLETED,
                    json!({ "task_id": task_id, "tool": task.tool_name }),
                );
                let mut result = TaskResult::ok(&task_id, output.data.clone(), elapsed);
                result.metadata.extend(output.metadata.clone());
                result
            }
            PipelineOutcome::Cancelled => {
                task.set_status(TaskStatus::Cancelled);
                task.error = Some("cancelled".to_owned());
                self.monitor.cancel_task(&task_id);
                self.report(
                    on_progress,
                    &task_id,
                    ProgressStatus::Cancelled,
                    100.0,
                    "cancelled",
                );
                self.events
                    .emit(TASK_CANCELLED, json!({ "task_id": task_id }));
                TaskResult::fail(&task_id, "cancelled", elapsed)
            }
            PipelineOutcome::Failure(message) => {
                task.set_status(TaskStatus::Failed);
                task.error = Some(message.clone());
                self.monitor.complete_task(&task_id, false);
                self.report(
                    on_progress,
                    &task_id,
                    ProgressStatus::Failed,
                    100.0,
                    &message,
                );
                self.events.emit(
                    TASK_FAILED,
                    json!({ "task_id": task_id, "tool": task.tool_name, "error": message }),
                );
                TaskResult::fail(&task_id, message, elapsed)
            }
        };

        self.plugins
            .dispatch_after_task(
                &task_id,
                &task.tool_name,
                result.success,
                &result.output.clone().unwrap_or(Value::Null),
            )
            .await;

        result
    }

    async fn run_pipeline(
        &self,
        task: &Task,
        timeout: Option<Duration>,
        on_progress: Option<&ProgressCallback>,
    ) -> PipelineOutcome {
        // (3) Resolve the tool.
        if !self.tools.has(&task.tool_name) {
            return PipelineOutcome::Failure(format!("Tool not found: {}", task.tool_name));
        }

        // Rate limiting, keyed by tool name.
        if let Err(err) = self.limiter.check(&task.tool_name) {
            return PipelineOutcome::Failure(err.to_string());
        }

        // Sanitization before plugins see the parameters.
        let params = match self
            .sanitizer
            .sanitize_tool_params(&task.tool_name, &task.parameters)
        {
            Ok(params) => params,
            Err(err) => return PipelineOutcome::Failure(err.to_string()),
        };

        // Plugin rewrite chain.
        let params = self
            .plugins
            .dispatch_before_task(&task.id, &task.tool_name, params)
            .await;

        // Circuit breaker gate.
        let breaker = self.breaker(&task.tool_name);
        if let Err(err) = breaker.acquire() {
            return PipelineOutcome::Failure(err.to_string());
        }

        self.report(
            on_progress,
            &task.id,
            ProgressStatus::InProgress,
            50.0,
            "invoking tool",
        );

        // (4) The tool body under a watchdog, racing cancellation.
        let timeout = timeout.unwrap_or(self.default_timeout);
        let notify = Arc::new(Notify::new());
        self.running
            .lock()
            .expect("executor lock poisoned")
            .insert(task.id.clone(), Arc::clone(&notify));

        let output: Option<ToolOutput> = tokio::select! {
            output = self.tools.execute(&task.tool_name, params) => Some(output),
            () = notify.notified() => None,
            () = tokio::time::sleep(timeout) => {
                warn!(task_id = %task.id, tool = %task.tool_name, "task timed out");
                breaker.record_failure();
                return PipelineOutcome::Failure(
                    Error::Timeout { seconds: timeout.as_secs_f64() }.to_string(),
                );
            }
        };

        // A cancel that raced the body still surfaces as cancelled.
        if self.is_cancelled(&task.id) {
            return PipelineOutcome::Cancelled;
        }

        match output {
            Some(output) if output.success => {
                breaker.record_success();
                PipelineOutcome::Success(output)
            }
            Some(output) => {
                breaker.record_failure();
                PipelineOutcome::Failure(
                    output.error.unwrap_or_else(|| "tool failed".to_owned()),
                )
            }
            None => PipelineOutcome::Cancelled,
        }
    }

    /// Execute tasks concurrently, preserving input order in the results.
    ///
    /// Concurrency is bounded by `max_workers` through the shared worker
    /// semaphore; each task still enforces its own timeout and progress
    /// reporting.
    pub async fn execute_parallel(
        &self,
        tasks: &mut [Task],
        context: &Context,
    ) -> Vec<TaskResult> {
        futures::future::join_all(
            tasks
                .iter_mut()
                .map(|task| self.execute_task(task, context, None, None)),
        )
        .await
    }

    /// Execute with exponential-backoff retries.
    ///
    /// The tool body runs at most `max_retries + 1` times and exactly once
    /// on immediate success. Prior attempts are archived under the final
    /// result's `metadata["attempts"]`; exhaustion sets
    /// `metadata["retry_exhausted"] = true`. A cancelled task or an open
    /// circuit breaker stops further retries.
    pub async fn execute_with_retry(
        &self,
        task: &mut Task,
        context: &Context,
        options: RetryOptions,
    ) -> TaskResult {
        let mut prior_attempts: Vec<Value> = Vec::new();

        for attempt in 0..=options.max_retries {
            // Un-finish the id first so a cancel during back-off lands.
            self.finished
                .lock()
                .expect("executor lock poisoned")
                .remove(&task.id);
            if attempt > 0 {
                tokio::time::sleep(options.delay_for_attempt(attempt)).await;
            }

            // Attempts run on a fresh copy so the status machine stays
            // monotonic; only the last attempt writes through.
            let mut attempt_task = task.clone();
            attempt_task.status = TaskStatus::Pending;
            attempt_task.error = None;

            let mut result = self
                .execute_task(&mut attempt_task, context, None, None)
                .await;

            let exhausted = attempt == options.max_retries;
            let stop = result.success
                || self.is_cancelled(&task.id)
                || result
                    .error
                    .as_deref()
                    .is_some_and(|e| e.contains("circuit breaker") || e == "cancelled");

            if stop || exhausted {
                *task = attempt_task;
                if !prior_attempts.is_empty() {
                    result
                        .metadata
                        .insert("attempts".to_owned(), Value::Array(prior_attempts));
                }
                if !result.success && exhausted {
                    result
                        .metadata
                        .insert("retry_exhausted".to_owned(), Value::Bool(true));
                }
                return result;
            }

            debug!(
                task_id = %task.id,
                attempt = attempt + 1,
                error = result.error.as_deref().unwrap_or_default(),
                "attempt failed, retrying"
            );
            prior_attempts.push(json!({
                "attempt": attempt + 1,
                "error": result.error,
                "execution_time_seconds": result.execution_time_seconds,
            }));
        }

        // The loop always returns on the final attempt.
        unreachable!("retry loop exits via stop or exhaustion")
    }

    /// Schedule and execute a plan's task DAG.
    ///
    /// Returns one result per task, in plan order. Dependents of failed or
    /// cancelled tasks are cancelled with `error = "dependency failed"`.
    /// The plan ends `Completed` iff every task succeeded.
    pub async fn execute_plan(
        self: &Arc<Self>,
        plan: &mut Plan,
        context: &Context,
    ) -> Vec<TaskResult> {
        plan.status = PlanStatus::Running;
        let mut results: HashMap<String, TaskResult> = HashMap::new();
        let mut join_set: JoinSet<(Task, TaskResult)> = JoinSet::new();

        loop {
            // Dependents of unsuccessful tasks can never run; cancel them
            // to fixpoint so transitive chains collapse in one pass.
            loop {
                let doomed: Vec<String> = plan
                    .tasks
                    .iter()
                    .filter(|t| {
                        t.status == TaskStatus::Pending
                            && t.dependencies.iter().any(|dep| {
                                plan.task(dep).is_some_and(|d| {
                                    d.status.is_terminal() && d.status != TaskStatus::Completed
                                })
                            })
                    })
                    .map(|t| t.id.clone())
                    .collect();
                if doomed.is_empty() {
                    break;
                }
                for id in doomed {
                    if let Some(task) = plan.task_mut(&id) {
                        task.set_status(TaskStatus::Cancelled);
                        task.error = Some("dependency failed".to_owned());
                        self.events.emit(
                            TASK_CANCELLED,
                            json!({ "task_id": id, "reason": "dependency failed" }),
                        );
                        results.insert(id.clone(), TaskResult::fail(&id, "dependency failed", 0.0));
                    }
                }
            }

            // Ready set: pending tasks whose dependencies all completed.
            let ready: Vec<Task> = plan
                .tasks
                .iter()
                .filter(|t| {
                    t.status == TaskStatus::Pending
                        && t.dependencies.iter().all(|dep| {
                            plan.task(dep)
                                .is_some_and(|d| d.status == TaskStatus::Completed)
                        })
                })
                .cloned()
                .collect();

            for task in ready {
                // Reserve the plan's copy so the task is not re-dispatched.
                if let Some(entry) = plan.task_mut(&task.id) {
                    entry.set_status(TaskStatus::Running);
                }
                let executor = Arc::clone(self);
                let context = context.clone();
                let mut task = task;
                join_set.spawn(async move {
                    let result = executor.execute_task(&mut task, &context, None, None).await;
                    (task, result)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok((task, result)) => {
                    if let Some(entry) = plan.task_mut(&task.id) {
                        *entry = task;
                    }
                    results.insert(result.task_id.clone(), result);
                }
                Err(err) => {
                    warn!(error = %err, "scheduled task panicked");
                }
            }
        }

        let ordered: Vec<TaskResult> = plan
            .tasks
            .iter()
            .map(|t| {
                results.remove(&t.id).unwrap_or_else(|| {
                    // Tasks that were terminal before scheduling (e.g. the
                    // trust gate denied them) carry their own error.
                    let error = t
                        .error
                        .clone()
                        .unwrap_or_else(|| "never scheduled".to_owned());
                    TaskResult::fail(&t.id, error, 0.0)
                })
            })
            .collect();

        plan.status = if ordered.iter().all(|r| r.success) {
            PlanStatus::Completed
        } else {
            PlanStatus::Failed
        };
        ordered
    }

    /// Refuse new work and wait for in-flight tasks to drain.
    pub async fn close(&self) {
        *self.closed.lock().expect("executor lock poisoned") = true;
        // Acquiring every worker permit guarantees teardown: no tool body
        // can still be running once they are all held.
        let permits = self
            .workers
            .acquire_many(self.max_workers as u32)
            .await
            .expect("worker semaphore closed");
        drop(permits);
        debug!("executor closed");
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("max_workers", &self.max_workers)
            .field("default_timeout", &self.default_timeout)
            .field("running", &self.running_tasks().len())
            .finish_non_exhaustive()
    }
}

enum PipelineOutcome {
    Success(ToolOutput),
    Failure(String),
    Cancelled,
}
