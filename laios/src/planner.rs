//! Goal decomposition: asks the LLM for a task list and validates it into
//! a ready-to-schedule [`Plan`].
//!
//! The model is prompted with the goal, its constraints, and the schemas
//! of every registered tool, and must answer with a JSON array of task
//! records. Validation enforces that every referenced tool exists, every
//! dependency points at a declared task, and the dependency graph is
//! acyclic. Invalid output retries the prompt a small fixed number of
//! times before surfacing [`Error::Planning`].

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::{ChatProvider, GenerateRequest};
use crate::reflector::FailurePattern;
use crate::tool::ToolRegistry;
use crate::types::{Context, Goal, Message, Plan, PlanStatus, Task, TaskResult};

const PLANNER_SYSTEM_PROMPT: &str = "You are a planning assistant. Decompose the goal into a \
minimal list of tasks executed with the available tools. Respond with ONLY a JSON array; each \
element is {\"description\": string, \"tool\": string, \"parameters\": object, \"depends_on\": \
[int]} where depends_on holds zero-based indices of earlier tasks that must complete first.";

/// One task record as emitted by the model.
#[derive(Debug, Deserialize)]
struct PlannedTask {
    description: String,
    tool: String,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    depends_on: Vec<usize>,
}

/// Turns goals into validated task DAGs via the LLM router.
pub struct Planner {
    provider: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
    max_attempts: u32,
}

impl Planner {
    /// Create a planner over a provider (usually the router) and the
    /// shared tool registry.
    #[must_use]
    pub fn new(provider: Arc<dyn ChatProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            max_attempts: 3,
        }
    }

    /// Decompose a goal into a plan with status `Ready`.
    ///
    /// # Errors
    ///
    /// [`Error::Planning`] once every attempt produced invalid output, or
    /// a provider error if the LLM itself fails.
    pub async fn plan(&self, goal: &Goal, context: &Context) -> Result<Plan> {
        let prompt = self.build_prompt(goal, None, &[]);
        self.plan_with_prompt(goal, context, prompt).await
    }

    /// Request a revised plan, handing the model the prior results and
    /// observed failure patterns as structured input.
    ///
    /// # Errors
    ///
    /// Same contract as [`Planner::plan`].
    pub async fn replan(
        &self,
        goal: &Goal,
        prior_results: &[TaskResult],
        patterns: &[FailurePattern],
        context: &Context,
    ) -> Result<Plan> {
        let prompt = self.build_prompt(goal, Some(prior_results), patterns);
        self.plan_with_prompt(goal, context, prompt).await
    }

    async fn plan_with_prompt(
        &self,
        goal: &Goal,
        _context: &Context,
        prompt: String,
    ) -> Result<Plan> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            let request = GenerateRequest::new(vec![
                Message::system(PLANNER_SYSTEM_PROMPT),
                Message::user(&prompt),
            ]);
            let response = self.provider.generate(request).await?;

            match self.parse_and_validate(goal, &response.content) {
                Ok(plan) => {
                    debug!(
                        plan_id = %plan.id,
                        tasks = plan.tasks.len(),
                        attempt,
                        "plan validated"
                    );
                    return Ok(plan);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "planner output invalid");
                    last_error = err.to_string();
                }
            }
        }
        Err(Error::planning(format!(
            "no valid plan after {} attempts: {last_error}",
            self.max_attempts
        )))
    }

    fn build_prompt(
        &self,
        goal: &Goal,
        prior_results: Option<&[TaskResult]>,
        patterns: &[FailurePattern],
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str("Goal: ");
        prompt.push_str(&goal.description);
        prompt.push('\n');

        if !goal.constraints.is_empty() {
            prompt.push_str("Constraints:\n");
            for (key, value) in &goal.constraints {
                prompt.push_str(&format!("- {key}: {value}\n"));
            }
        }

        prompt.push_str("\nAvailable tools:\n");
        for definition in self.tools.list() {
            prompt.push_str(&format!(
                "- {}: {} (parameters: {})\n",
                definition.name, definition.description, definition.parameters
            ));
        }

        if let Some(results) = prior_results {
            prompt.push_str("\nPrevious attempt results:\n");
            for result in results {
                if result.success {
                    prompt.push_str(&format!("- task {} succeeded\n", result.task_id));
                } else {
                    prompt.push_str(&format!(
                        "- task {} failed: {}\n",
                        result.task_id,
                        result.error.as_deref().unwrap_or("unknown error")
                    ));
                }
            }
        }

        if !patterns.is_empty() {
            prompt.push_str("\nObserved failure patterns:\n");
            for pattern in patterns {
                prompt.push_str(&format!(
                    "- {} ({} occurrences): {}\n",
                    pattern.pattern_type, pattern.occurrences, pattern.description
                ));
            }
            prompt.push_str("Produce a revised plan that avoids these failures.\n");
        }

        prompt
    }

    fn parse_and_validate(&self, goal: &Goal, content: &str) -> Result<Plan> {
        let planned = parse_task_array(content)?;
        if planned.is_empty() {
            return Err(Error::planning("model produced an empty task list"));
        }

        let mut plan = Plan::new(goal.clone());
        let mut ids = Vec::with_capacity(planned.len());
        for entry in &planned {
            if !self.tools.has(&entry.tool) {
                return Err(Error::planning(format!(
                    "plan references unknown tool '{}'",
                    entry.tool
                )));
            }
            let parameters = if entry.parameters.is_object() {
                entry.parameters.clone()
            } else {
                Value::Object(serde_json::Map::new())
            };
            let task = Task::new(&plan.id, &entry.description, &entry.tool, parameters);
            ids.push(task.id.clone());
            plan.tasks.push(task);
        }

        for (index, entry) in planned.iter().enumerate() {
            for &dep in &entry.depends_on {
                if dep >= ids.len() {
                    return Err(Error::planning(format!(
                        "task {index} depends on out-of-range index {dep}"
                    )));
                }
                plan.tasks[index].dependencies.push(ids[dep].clone());
            }
        }

        plan.validate_dag().map_err(Error::planning)?;
        plan.status = PlanStatus::Ready;
        Ok(plan)
    }
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("provider", &self.provider.name())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Extract and parse the JSON task array from model output, tolerating
/// markdown code fences and surrounding prose.
fn parse_task_array(content: &str) -> Result<Vec<PlannedTask>> {
    let trimmed = content.trim();

    // Direct parse first, then the bracketed substring.
    if let Ok(tasks) = serde_json::from_str::<Vec<PlannedTask>>(trimmed) {
        return Ok(tasks);
    }

    let start = trimmed
        .find('[')
        .ok_or_else(|| Error::planning("no JSON array in model output"))?;
    let end = trimmed
        .rfind(']')
        .filter(|&end| end > start)
        .ok_or_else(|| Error::planning("unterminated JSON array in model output"))?;

    serde_json::from_str::<Vec<PlannedTask>>(&trimmed[start..=end])
        .map_err(|err| Error::planning(format!("malformed task array: {err}")))
}
