//! Execution monitoring: per-task metrics, progress tracking, and
//! performance sampling.
//!
//! The [`ExecutionMonitor`] records wall-clock metrics and checkpoints for
//! every task the executor touches. The embedded [`ProgressTracker`] keeps
//! the latest [`ProgressUpdate`] per task plus an append-only history, and
//! fans every update out to registered listeners in emission order. The
//! [`PerformanceMonitor`] stores named numeric samples and summarizes them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Wall-clock metrics for one task execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMetrics {
    /// The task being measured.
    pub task_id: String,
    /// When execution began.
    pub start_time: DateTime<Utc>,
    /// When execution ended, once it has.
    pub end_time: Option<DateTime<Utc>>,
    /// Duration in seconds, once finished.
    pub execution_time: Option<f64>,
    /// Named midpoints recorded during execution.
    pub checkpoints: Vec<(String, DateTime<Utc>)>,
}

impl ExecutionMetrics {
    fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            start_time: Utc::now(),
            end_time: None,
            execution_time: None,
            checkpoints: Vec::new(),
        }
    }

    fn finish(&mut self) {
        let end = Utc::now();
        self.execution_time =
            Some((end - self.start_time).num_milliseconds() as f64 / 1000.0);
        self.end_time = Some(end);
    }
}

/// Coarse progress phase of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Execution is being set up.
    Starting,
    /// The tool body is running.
    InProgress,
    /// The tool finished; results are being recorded.
    Completing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled.
    Cancelled,
}

/// A single progress report.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    /// The reporting task.
    pub task_id: String,
    /// Progress phase.
    pub status: ProgressStatus,
    /// Completion estimate, 0–100.
    pub progress_percent: f64,
    /// Human-readable note.
    pub message: String,
    /// Structured detail payload.
    pub details: Value,
    /// When the update was emitted.
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    /// Create an update stamped now.
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        status: ProgressStatus,
        progress_percent: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            progress_percent: progress_percent.clamp(0.0, 100.0),
            message: message.into(),
            details: Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Attach a structured detail payload.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Listener invoked for every progress update, in emission order.
pub type ProgressListener = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Handle for removing a progress listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct TrackerState {
    latest: HashMap<String, ProgressUpdate>,
    history: Vec<ProgressUpdate>,
    listeners: Vec<(ListenerId, ProgressListener)>,
}

/// Stores the latest update per task plus an append-only history.
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
    next_listener: AtomicU64,
}

impl ProgressTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                latest: HashMap::new(),
                history: Vec::new(),
                listeners: Vec::new(),
            }),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Record an update and notify listeners in emission order.
    pub fn update(&self, update: ProgressUpdate) {
        let listeners: Vec<ProgressListener> = {
            let mut state = self.state.lock().expect("progress tracker lock poisoned");
            state
                .latest
                .insert(update.task_id.clone(), update.clone());
            state.history.push(update.clone());
            state
                .listeners
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect()
        };
        for listener in listeners {
            listener(&update);
        }
    }

    /// The most recent update for a task.
    #[must_use]
    pub fn latest(&self, task_id: &str) -> Option<ProgressUpdate> {
        self.state
            .lock()
            .expect("progress tracker lock poisoned")
            .latest
            .get(task_id)
            .cloned()
    }

    /// Every update recorded for a task, oldest first.
    #[must_use]
    pub fn history(&self, task_id: &str) -> Vec<ProgressUpdate> {
        self.state
            .lock()
            .expect("progress tracker lock poisoned")
            .history
            .iter()
            .filter(|u| u.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Register a listener for every future update.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.state
            .lock()
            .expect("progress tracker lock poisoned")
            .listeners
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `true` if it existed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock().expect("progress tracker lock poisoned");
        let before = state.listeners.len();
        state.listeners.retain(|(l, _)| *l != id);
        state.listeners.len() != before
    }

    /// Forget a task's latest entry and history.
    pub fn clear(&self, task_id: &str) {
        let mut state = self.state.lock().expect("progress tracker lock poisoned");
        state.latest.remove(task_id);
        state.history.retain(|u| u.task_id != task_id);
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("progress tracker lock poisoned");
        f.debug_struct("ProgressTracker")
            .field("tracked", &state.latest.len())
            .field("history_len", &state.history.len())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

/// Roll-up over every task the monitor has seen.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExecutionStats {
    /// Tasks that started.
    pub total_started: usize,
    /// Tasks that completed successfully.
    pub completed: usize,
    /// Tasks that failed.
    pub failed: usize,
    /// Tasks that were cancelled.
    pub cancelled: usize,
    /// Mean execution time over finished tasks, in seconds.
    pub avg_execution_time: f64,
}

/// Records metrics and progress for every task execution.
#[derive(Debug, Default)]
pub struct ExecutionMonitor {
    metrics: Mutex<HashMap<String, ExecutionMetrics>>,
    tracker: ProgressTracker,
}

impl ExecutionMonitor {
    /// Create an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The embedded progress tracker.
    #[must_use]
    pub const fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Begin tracking a task.
    pub fn start_task(&self, task_id: &str) {
        self.metrics
            .lock()
            .expect("monitor lock poisoned")
            .insert(task_id.to_owned(), ExecutionMetrics::new(task_id));
        self.tracker.update(ProgressUpdate::new(
            task_id,
            ProgressStatus::Starting,
            0.0,
            "task started",
        ));
    }

    /// Record a named checkpoint for a running task.
    pub fn checkpoint(&self, task_id: &str, label: impl Into<String>) {
        if let Some(metrics) = self
            .metrics
            .lock()
            .expect("monitor lock poisoned")
            .get_mut(task_id)
        {
            metrics.checkpoints.push((label.into(), Utc::now()));
        }
    }

    /// Finish tracking a task with a success/failure verdict.
    pub fn complete_task(&self, task_id: &str, success: bool) {
        if let Some(metrics) = self
            .metrics
            .lock()
            .expect("monitor lock poisoned")
            .get_mut(task_id)
        {
            metrics.finish();
        }
        let (status, message) = if success {
            (ProgressStatus::Completed, "task completed")
        } else {
            (ProgressStatus::Failed, "task failed")
        };
        self.tracker
            .update(ProgressUpdate::new(task_id, status, 100.0, message));
    }

    /// Finish tracking a cancelled task.
    pub fn cancel_task(&self, task_id: &str) {
        if let Some(metrics) = self
            .metrics
            .lock()
            .expect("monitor lock poisoned")
            .get_mut(task_id)
        {
            metrics.finish();
        }
        self.tracker.update(ProgressUpdate::new(
            task_id,
            ProgressStatus::Cancelled,
            100.0,
            "task cancelled",
        ));
    }

    /// Metrics for one task.
    #[must_use]
    pub fn metrics(&self, task_id: &str) -> Option<ExecutionMetrics> {
        self.metrics
            .lock()
            .expect("monitor lock poisoned")
            .get(task_id)
            .cloned()
    }

    /// Ids of tasks that started but have not finished.
    #[must_use]
    pub fn running_tasks(&self) -> Vec<String> {
        self.metrics
            .lock()
            .expect("monitor lock poisoned")
            .values()
            .filter(|m| m.end_time.is_none())
            .map(|m| m.task_id.clone())
            .collect()
    }

    /// Roll-up statistics over everything the monitor has seen.
    #[must_use]
    pub fn execution_stats(&self) -> ExecutionStats {
        let metrics = self.metrics.lock().expect("monitor lock poisoned");
        let mut stats = ExecutionStats {
            total_started: metrics.len(),
            ..ExecutionStats::default()
        };

        let mut total_time = 0.0;
        let mut finished = 0usize;
        for m in metrics.values() {
            if let Some(time) = m.execution_time {
                total_time += time;
                finished += 1;
            }
            match self.tracker.latest(&m.task_id).map(|u| u.status) {
                Some(ProgressStatus::Completed) => stats.completed += 1,
                Some(ProgressStatus::Failed) => stats.failed += 1,
                Some(ProgressStatus::Cancelled) => stats.cancelled += 1,
                _ => {}
            }
        }
        if finished > 0 {
            stats.avg_execution_time = total_time / finished as f64;
        }
        stats
    }

    /// Forget one task.
    pub fn clear_task(&self, task_id: &str) {
        self.metrics
            .lock()
            .expect("monitor lock poisoned")
            .remove(task_id);
        self.tracker.clear(task_id);
    }
}

/// Summary of one named metric's samples.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSummary {
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
    /// Mean of samples.
    pub avg: f64,
    /// Number of samples.
    pub count: usize,
}

/// Stores named numeric samples per task.
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    samples: Mutex<HashMap<String, HashMap<String, Vec<f64>>>>,
}

impl PerformanceMonitor {
    /// Create an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample for `(task_id, metric)`.
    pub fn record(&self, task_id: &str, metric: &str, value: f64) {
        self.samples
            .lock()
            .expect("performance monitor lock poisoned")
            .entry(task_id.to_owned())
            .or_default()
            .entry(metric.to_owned())
            .or_default()
            .push(value);
    }

    /// Raw samples for `(task_id, metric)`.
    #[must_use]
    pub fn samples(&self, task_id: &str, metric: &str) -> Vec<f64> {
        self.samples
            .lock()
            .expect("performance monitor lock poisoned")
            .get(task_id)
            .and_then(|m| m.get(metric))
            .cloned()
            .unwrap_or_default()
    }

    /// Summarize `(task_id, metric)`, or `None` if no samples exist.
    #[must_use]
    pub fn summary(&self, task_id: &str, metric: &str) -> Option<MetricSummary> {
        let samples = self.samples(task_id, metric);
        if samples.is_empty() {
            return None;
        }
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(MetricSummary {
            min,
            max,
            avg,
            count: samples.len(),
        })
    }

    /// Forget one task's samples.
    pub fn clear_task(&self, task_id: &str) {
        self.samples
            .lock()
            .expect("performance monitor lock poisoned")
            .remove(task_id);
    }

    /// Forget everything.
    pub fn clear_all(&self) {
        self.samples
            .lock()
            .expect("performance monitor lock poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_start_complete_records_metrics() {
        let monitor = ExecutionMonitor::new();
        monitor.start_task("t1");
        assert_eq!(monitor.running_tasks(), vec!["t1".to_owned()]);

        monitor.checkpoint("t1", "halfway");
        monitor.complete_task("t1", true);

        let metrics = monitor.metrics("t1").expect("metrics");
        assert!(metrics.end_time.is_some());
        assert!(metrics.execution_time.is_some());
        assert_eq!(metrics.checkpoints.len(), 1);
        assert!(monitor.running_tasks().is_empty());
    }

    #[test]
    fn test_progress_history_and_latest() {
        let monitor = ExecutionMonitor::new();
        monitor.start_task("t1");
        monitor.tracker().update(ProgressUpdate::new(
            "t1",
            ProgressStatus::InProgress,
            50.0,
            "working",
        ));
        monitor.complete_task("t1", true);

        let history = monitor.tracker().history("t1");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].status, ProgressStatus::Starting);
        assert_eq!(history[1].status, ProgressStatus::InProgress);

        let latest = monitor.tracker().latest("t1").expect("latest");
        assert_eq!(latest.status, ProgressStatus::Completed);
    }

    #[test]
    fn test_listeners_see_updates_in_order() {
        let tracker = ProgressTracker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        tracker.add_listener(move |update| {
            seen_clone
                .lock()
                .expect("lock")
                .push(update.progress_percent as u32);
        });

        for percent in [0.0, 50.0, 100.0] {
            tracker.update(ProgressUpdate::new(
                "t",
                ProgressStatus::InProgress,
                percent,
                "",
            ));
        }
        assert_eq!(*seen.lock().expect("lock"), vec![0, 50, 100]);
    }

    #[test]
    fn test_remove_listener() {
        let tracker = ProgressTracker::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let id = tracker.add_listener(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        tracker.update(ProgressUpdate::new("t", ProgressStatus::Starting, 0.0, ""));
        assert!(tracker.remove_listener(id));
        assert!(!tracker.remove_listener(id));
        tracker.update(ProgressUpdate::new("t", ProgressStatus::Completed, 100.0, ""));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_execution_stats_roll_up() {
        let monitor = ExecutionMonitor::new();
        monitor.start_task("ok");
        monitor.complete_task("ok", true);
        monitor.start_task("bad");
        monitor.complete_task("bad", false);
        monitor.start_task("gone");
        monitor.cancel_task("gone");

        let stats = monitor.execution_stats();
        assert_eq!(stats.total_started, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cancelled, 1);
        assert!(stats.avg_execution_time >= 0.0);
    }

    #[test]
    fn test_performance_summary() {
        let perf = PerformanceMonitor::new();
        perf.record("t", "latency_ms", 10.0);
        perf.record("t", "latency_ms", 30.0);
        perf.record("t", "latency_ms", 20.0);

        let summary = perf.summary("t", "latency_ms").expect("summary");
        assert!((summary.min - 10.0).abs() < f64::EPSILON);
        assert!((summary.max - 30.0).abs() < f64::EPSILON);
        assert!((summary.avg - 20.0).abs() < f64::EPSILON);
        assert_eq!(summary.count, 3);

        assert!(perf.summary("t", "missing").is_none());
        perf.clear_task("t");
        assert!(perf.summary("t", "latency_ms").is_none());
    }
}
