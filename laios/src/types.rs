//! Core data model for goals, plans, tasks, sessions, and episodes.
//!
//! These types are the currency of the runtime: the planner emits a [`Plan`]
//! of [`Task`]s, the executor produces one [`TaskResult`] per task, the
//! controller aggregates them into an [`Episode`] and hands it to memory.
//!
//! Task status transitions are monotonic. [`TaskStatus::can_transition`]
//! encodes the state machine and [`Task::set_status`] refuses back-edges.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A user-submitted objective for the agent to accomplish.
///
/// Immutable once submitted; the planner decomposes it into a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    /// Unique identifier.
    pub id: String,
    /// Natural-language description of the objective.
    pub description: String,
    /// Arbitrary constraints the planner should honor.
    #[serde(default)]
    pub constraints: HashMap<String, Value>,
    /// Priority from 1 (lowest) to 10 (highest).
    pub priority: u8,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
}

impl Goal {
    /// Create a new goal with default priority 5.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            constraints: HashMap::new(),
            priority: 5,
            created_at: Utc::now(),
        }
    }

    /// Set the priority, clamped to 1..=10.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    /// Attach a constraint.
    #[must_use]
    pub fn with_constraint(mut self, key: impl Into<String>, value: Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }
}

/// Lifecycle state of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or a worker.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` if `self → next` is a legal transition.
    ///
    /// The machine is `Pending → Running → {Completed, Failed, Cancelled}`,
    /// with `Pending → Cancelled` also allowed. No back-edges.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Failed | Self::Cancelled)
        )
    }

    /// Returns `true` if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A single unit of work inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: String,
    /// Identifier of the owning plan.
    pub plan_id: String,
    /// What this task does, in natural language.
    pub description: String,
    /// Fully-qualified tool name to invoke (e.g. `filesystem.read_file`).
    pub tool_name: String,
    /// Parameters passed to the tool.
    #[serde(default)]
    pub parameters: Value,
    /// Ids of tasks in the same plan that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// When execution began.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Final output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form metadata (e.g. `expected_time_seconds`).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Task {
    /// Create a new pending task.
    #[must_use]
    pub fn new(
        plan_id: impl Into<String>,
        description: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            plan_id: plan_id.into(),
            description: description.into(),
            tool_name: tool_name.into(),
            parameters,
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Add a dependency on another task in the same plan.
    #[must_use]
    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Transition to `next`, returning `false` (and leaving the status
    /// untouched) if the transition would be a back-edge.
    pub fn set_status(&mut self, next: TaskStatus) -> bool {
        if self.status.can_transition(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// Lifecycle state of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Being assembled by the planner.
    Draft,
    /// Validated and ready to schedule.
    Ready,
    /// Currently being executed.
    Running,
    /// All tasks succeeded.
    Completed,
    /// At least one task failed.
    Failed,
    /// Abandoned after exhausting replanning attempts.
    Abandoned,
}

/// An ordered set of tasks whose dependency relation forms a DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique identifier.
    pub id: String,
    /// The goal this plan serves.
    pub goal: Goal,
    /// Tasks in planner-emitted order.
    pub tasks: Vec<Task>,
    /// Current lifecycle state.
    pub status: PlanStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Create an empty draft plan for a goal.
    #[must_use]
    pub fn new(goal: Goal) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal,
            tasks: Vec::new(),
            status: PlanStatus::Draft,
            created_at: Utc::now(),
        }
    }

    /// Find a task by id.
    #[must_use]
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Find a task by id, mutably.
    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// Validate that every dependency resolves to a task in this plan and
    /// that the dependency relation is acyclic.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending task on the first violation.
    pub fn validate_dag(&self) -> Result<(), String> {
        use std::collections::HashSet;

        let ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        for task in &self.tasks {
            for dep in &task.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(format!(
                        "task '{}' depends on unknown task '{dep}'",
                        task.id
                    ));
                }
            }
        }

        // Kahn's algorithm: if a topological order covers every task, the
        // relation is acyclic.
        let mut in_degree: HashMap<&str, usize> = self
            .tasks
            .iter()
            .map(|t| (t.id.as_str(), t.dependencies.len()))
            .collect();
        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop() {
            visited += 1;
            for task in &self.tasks {
                if task.dependencies.iter().any(|d| d == id)
                    && let Some(degree) = in_degree.get_mut(task.id.as_str())
                {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(task.id.as_str());
                    }
                }
            }
        }
        if visited != self.tasks.len() {
            return Err("dependency graph contains a cycle".to_owned());
        }
        Ok(())
    }
}

/// The outcome of one task attempt.
///
/// On retry, the final attempt's result is canonical and prior attempts are
/// archived under `metadata["attempts"]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task this result belongs to.
    pub task_id: String,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Tool output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time in seconds.
    pub execution_time_seconds: f64,
    /// Free-form metadata (retry attempts, breaker state, etc.).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl TaskResult {
    /// Create a successful result.
    #[must_use]
    pub fn ok(task_id: impl Into<String>, output: Option<Value>, seconds: f64) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            output,
            error: None,
            execution_time_seconds: seconds,
            metadata: HashMap::new(),
        }
    }

    /// Create a failed result.
    #[must_use]
    pub fn fail(task_id: impl Into<String>, error: impl Into<String>, seconds: f64) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output: None,
            error: Some(error.into()),
            execution_time_seconds: seconds,
            metadata: HashMap::new(),
        }
    }
}

/// Role of a message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
}

/// A single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Conversational context for a session.
///
/// Mutated only by the controller; every other reader receives a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// Owning session id.
    pub session_id: String,
    /// Owning user id.
    pub user_id: String,
    /// Message log in append order.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Context {
    /// Create an empty context.
    #[must_use]
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// A long-lived conversational session tied to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier.
    pub id: String,
    /// Owning user id.
    pub user_id: String,
    /// Conversational context.
    pub context: Context,
    /// Whether the session accepts new work.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create a new active session for a user.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        let id = Uuid::new_v4().to_string();
        let user_id = user_id.into();
        Self {
            context: Context::new(&id, &user_id),
            id,
            user_id,
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// The record of one `execute_goal` invocation from plan to results.
///
/// Append-only; handed to memory exactly once per completed goal execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Unique identifier.
    pub id: String,
    /// The session that executed the goal.
    pub session_id: String,
    /// The final plan (including any replanned tasks).
    pub plan: Plan,
    /// One result per task in the plan.
    pub results: Vec<TaskResult>,
    /// Whether every task succeeded.
    pub success: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Episode {
    /// Create a new episode record.
    #[must_use]
    pub fn new(session_id: impl Into<String>, plan: Plan, results: Vec<TaskResult>) -> Self {
        let success = !results.is_empty() && results.iter().all(|r| r.success);
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            plan,
            results,
            success,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(TaskStatus::Pending.can_transition(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition(TaskStatus::Cancelled));
        assert!(TaskStatus::Running.can_transition(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition(TaskStatus::Failed));

        assert!(!TaskStatus::Completed.can_transition(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition(TaskStatus::Pending));
        assert!(!TaskStatus::Cancelled.can_transition(TaskStatus::Running));
        assert!(!TaskStatus::Pending.can_transition(TaskStatus::Completed));
    }

    #[test]
    fn test_task_set_status_rejects_back_edges() {
        let mut task = Task::new("plan", "t", "utility.echo", json!({}));
        assert!(task.set_status(TaskStatus::Running));
        assert!(task.set_status(TaskStatus::Completed));
        assert!(!task.set_status(TaskStatus::Running));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_plan_validate_dag_detects_cycle() {
        let goal = Goal::new("test");
        let mut plan = Plan::new(goal);
        let mut a = Task::new(&plan.id, "a", "utility.echo", json!({}));
        let mut b = Task::new(&plan.id, "b", "utility.echo", json!({}));
        let a_id = a.id.clone();
        let b_id = b.id.clone();
        a.dependencies.push(b_id);
        b.dependencies.push(a_id);
        plan.tasks = vec![a, b];

        let err = plan.validate_dag().expect_err("cycle should be rejected");
        assert!(err.contains("cycle"));
    }

    #[test]
    fn test_plan_validate_dag_unknown_dependency() {
        let goal = Goal::new("test");
        let mut plan = Plan::new(goal);
        let task =
            Task::new(&plan.id, "a", "utility.echo", json!({})).with_dependency("missing-id");
        plan.tasks = vec![task];

        let err = plan.validate_dag().expect_err("unknown dep rejected");
        assert!(err.contains("missing-id"));
    }

    #[test]
    fn test_goal_priority_clamped() {
        let goal = Goal::new("x").with_priority(99);
        assert_eq!(goal.priority, 10);
        let goal = Goal::new("x").with_priority(0);
        assert_eq!(goal.priority, 1);
    }

    #[test]
    fn test_episode_success_is_conjunction() {
        let goal = Goal::new("g");
        let plan = Plan::new(goal);
        let results = vec![
            TaskResult::ok("t1", None, 0.1),
            TaskResult::fail("t2", "boom", 0.1),
        ];
        let episode = Episode::new("s", plan, results);
        assert!(!episode.success);
    }
}
