//! Reflection: evaluating tasks and plans, detecting failure patterns,
//! and accumulating learned insights.
//!
//! Error text is categorized against a fixed taxonomy
//! ([`FailureCategory`]); each category maps to a canned suggestion list.
//! Plan evaluation detects repeated categories, repeatedly-failing tools,
//! and overly-sequential structure, and recommends replanning when the
//! success rate falls below the configured floor.
//!
//! Evaluation success and execution success are deliberately distinct: a
//! slow-but-successful task keeps `TaskResult.success = true` (its
//! dependents still run) while its `TaskEvaluation.success` turns false
//! (feeding the replanning decision).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ReflectionConfig;
use crate::llm::{ChatProvider, GenerateRequest};
use crate::types::{Context, Episode, Message, Plan, Task, TaskResult};

/// Fixed taxonomy of failure signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The operation exceeded its deadline.
    Timeout,
    /// A permission or approval check refused the operation.
    Permission,
    /// A tool, file, or resource was missing.
    NotFound,
    /// A network or provider failure.
    Network,
    /// Parameters failed validation.
    Validation,
    /// Resource exhaustion (rate limits, breakers, memory).
    Resource,
    /// The same tool failing repeatedly.
    ToolFailure,
    /// Nothing matched the taxonomy.
    Unknown,
}

impl FailureCategory {
    /// Categorize an error message by substring matching.
    #[must_use]
    pub fn from_error(error: &str) -> Self {
        let lowered = error.to_lowercase();
        if lowered.contains("timeout") || lowered.contains("timed out") {
            Self::Timeout
        } else if lowered.contains("permission") || lowered.contains("approval denied") {
            Self::Permission
        } else if lowered.contains("not found") || lowered.contains("no such") {
            Self::NotFound
        } else if lowered.contains("network")
            || lowered.contains("connection")
            || lowered.contains("provider error")
            || lowered.contains("http")
        {
            Self::Network
        } else if lowered.contains("validation") || lowered.contains("invalid") {
            Self::Validation
        } else if lowered.contains("rate limit")
            || lowered.contains("circuit breaker")
            || lowered.contains("memory")
            || lowered.contains("resource")
        {
            Self::Resource
        } else {
            Self::Unknown
        }
    }

    /// Canned suggestions for this category.
    #[must_use]
    pub fn suggestions(self) -> Vec<String> {
        let texts: &[&str] = match self {
            Self::Timeout => &[
                "increase the task timeout",
                "split the task into smaller steps",
            ],
            Self::Permission => &[
                "request the required permission",
                "lower the trust level gate or pre-approve the tool",
            ],
            Self::NotFound => &[
                "verify the resource name before retrying",
                "add a discovery task that lists available resources first",
            ],
            Self::Network => &[
                "retry with backoff",
                "configure a fallback provider",
            ],
            Self::Validation => &[
                "tighten parameter construction against the tool schema",
            ],
            Self::Resource => &[
                "reduce request rate",
                "wait for the circuit breaker to recover",
            ],
            Self::ToolFailure => &[
                "substitute a different tool for this step",
            ],
            Self::Unknown => &["inspect the error and adjust the plan"],
        };
        texts.iter().map(|s| (*s).to_owned()).collect()
    }

    /// The wire name of this category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Resource => "resource",
            Self::ToolFailure => "tool_failure",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation of one task's outcome.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvaluation {
    /// The evaluated task.
    pub task_id: String,
    /// The evaluation verdict — distinct from `TaskResult.success`.
    pub success: bool,
    /// Confidence in the verdict, 0..1.
    pub confidence: f64,
    /// Problems observed.
    pub issues: Vec<String>,
    /// Remediation suggestions.
    pub suggestions: Vec<String>,
    /// Whether this task alone argues for replanning.
    pub should_replan: bool,
}

/// Evaluation of a whole plan execution.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEvaluation {
    /// The evaluated plan.
    pub plan_id: String,
    /// Whether the plan as a whole is considered successful.
    pub success: bool,
    /// Fraction of tasks that succeeded.
    pub success_rate: f64,
    /// Problems observed.
    pub issues: Vec<String>,
    /// Remediation suggestions.
    pub suggestions: Vec<String>,
    /// Whether the controller should request a revised plan.
    pub should_replan: bool,
    /// Patterns detected in this execution.
    pub patterns: Vec<FailurePattern>,
}

/// A recurring failure signature accumulated across evaluations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    /// Taxonomy bucket.
    pub pattern_type: FailureCategory,
    /// Human-readable description.
    pub description: String,
    /// How many times this pattern has been observed.
    pub occurrences: u32,
    /// First observation.
    pub first_seen: DateTime<Utc>,
    /// Latest observation.
    pub last_seen: DateTime<Utc>,
    /// Example error messages.
    pub examples: Vec<String>,
}

/// Category of a learned insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    /// Per-tool success rates and latency.
    ToolEffectiveness,
    /// Dominant failure modes of failed episodes.
    FailureMode,
    /// Latency outliers.
    Performance,
}

/// A durable learned fact with a confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    /// Unique identifier.
    pub id: String,
    /// What kind of fact this is.
    pub category: InsightCategory,
    /// The fact itself.
    pub description: String,
    /// Confidence 0..1.
    pub confidence: f64,
    /// Supporting evidence.
    pub evidence: Value,
    /// When the insight was generated.
    pub created_at: DateTime<Utc>,
}

/// Evaluates outcomes and accumulates patterns and insights.
pub struct Reflector {
    config: ReflectionConfig,
    provider: Option<Arc<dyn ChatProvider>>,
    insights: Mutex<Vec<Insight>>,
    patterns: Mutex<HashMap<String, FailurePattern>>,
}

impl Reflector {
    /// Create a reflector with the given thresholds.
    #[must_use]
    pub fn new(config: ReflectionConfig) -> Self {
        Self {
            config,
            provider: None,
            insights: Mutex::new(Vec::new()),
            patterns: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a provider for optional LLM reflection.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Evaluate one task's outcome.
    #[must_use]
    pub fn evaluate_task(
        &self,
        task: &Task,
        result: &TaskResult,
        _context: &Context,
    ) -> TaskEvaluation {
        let mut issues = Vec::new();
        let mut suggestions = Vec::new();
        let mut success = result.success;
        let mut confidence: f64 = if result.success { 0.9 } else { 0.3 };

        if let Some(ref error) = result.error {
            let category = FailureCategory::from_error(error);
            issues.push(format!("{category}: {error}"));
            suggestions.extend(category.suggestions());
        }

        // Slow-but-successful: the result stays successful (dependents
        // ran), the evaluation does not.
        if let Some(expected) = task
            .metadata
            .get("expected_time_seconds")
            .and_then(Value::as_f64)
            && result.execution_time_seconds
                > self.config.max_execution_time_multiplier * expected
        {
            success = false;
            confidence = confidence.min(0.4);
            issues.push(format!(
                "took too long: {:.2}s against an expected {expected:.2}s",
                result.execution_time_seconds
            ));
            suggestions.push("parallelize the work or tighten the inputs".to_owned());
        }

        if self.config.check_output_quality
            && result.success
            && result
                .output
                .as_ref()
                .is_none_or(|o| o.is_null() || o.as_str().is_some_and(str::is_empty))
        {
            issues.push("successful task produced no output".to_owned());
            confidence = confidence.min(0.7);
        }

        TaskEvaluation {
            task_id: task.id.clone(),
            should_replan: !success,
            success,
            confidence,
            issues,
            suggestions,
        }
    }

    /// Evaluate a plan execution and record any detected patterns.
    pub async fn evaluate_plan(
        &self,
        plan: &Plan,
        results: &[TaskResult],
        context: &Context,
    ) -> PlanEvaluation {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            succeeded as f64 / total as f64
        };

        let mut issues = Vec::new();
        let mut suggestions = Vec::new();
        let mut should_replan = total > 0 && success_rate < self.config.min_success_rate;

        if self.config.require_all_tasks_complete && succeeded < total {
            should_replan = true;
        }

        let patterns = self.detect_patterns(plan, results);
        for pattern in &patterns {
            issues.push(pattern.description.clone());
            suggestions.extend(pattern.pattern_type.suggestions());
        }

        if let Some(issue) = detect_sequential_structure(plan) {
            issues.push(issue);
            suggestions.push(
                "declare independent tasks without chained dependencies so they run in parallel"
                    .to_owned(),
            );
        }

        if self.config.enable_llm_reflection
            && let Some(ref provider) = self.provider
        {
            match self.llm_reflection(provider.as_ref(), plan, results, context).await {
                Ok(extra) => suggestions.extend(extra),
                Err(err) => warn!(error = %err, "llm reflection failed"),
            }
        }

        self.record_patterns(&patterns);
        debug!(
            plan_id = %plan.id,
            success_rate,
            should_replan,
            patterns = patterns.len(),
            "plan evaluated"
        );

        PlanEvaluation {
            plan_id: plan.id.clone(),
            success: total > 0 && succeeded == total,
            success_rate,
            issues,
            suggestions,
            should_replan,
            patterns,
        }
    }

    fn detect_patterns(&self, plan: &Plan, results: &[TaskResult]) -> Vec<FailurePattern> {
        let now = Utc::now();
        let mut patterns = Vec::new();

        // Same error category across three or more tasks.
        let mut by_category: HashMap<FailureCategory, Vec<&str>> = HashMap::new();
        for result in results.iter().filter(|r| !r.success) {
            let error = result.error.as_deref().unwrap_or("unknown error");
            by_category
                .entry(FailureCategory::from_error(error))
                .or_default()
                .push(error);
        }
        for (category, examples) in &by_category {
            if examples.len() >= 3 {
                patterns.push(FailurePattern {
                    pattern_type: *category,
                    description: format!(
                        "{} tasks failed with {category} errors",
                        examples.len()
                    ),
                    occurrences: examples.len() as u32,
                    first_seen: now,
                    last_seen: now,
                    examples: examples.iter().take(3).map(|e| (*e).to_owned()).collect(),
                });
            }
        }

        // Same tool failing two or more times.
        let mut by_tool: HashMap<&str, Vec<&str>> = HashMap::new();
        for result in results.iter().filter(|r| !r.success) {
            if let Some(task) = plan.task(&result.task_id) {
                by_tool
                    .entry(task.tool_name.as_str())
                    .or_default()
                    .push(result.error.as_deref().unwrap_or("unknown error"));
            }
        }
        for (tool, examples) in &by_tool {
            if examples.len() >= 2 {
                patterns.push(FailurePattern {
                    pattern_type: FailureCategory::ToolFailure,
                    description: format!("tool '{tool}' failed {} times", examples.len()),
                    occurrences: examples.len() as u32,
                    first_seen: now,
                    last_seen: now,
                    examples: examples.iter().take(3).map(|e| (*e).to_owned()).collect(),
                });
            }
        }

        patterns
    }

    fn record_patterns(&self, detected: &[FailurePattern]) {
        let mut store = self.patterns.lock().expect("reflector lock poisoned");
        for pattern in detected {
            let key = format!("{}:{}", pattern.pattern_type, pattern.description);
            store
                .entry(key)
                .and_modify(|existing| {
                    existing.occurrences += pattern.occurrences;
                    existing.last_seen = pattern.last_seen;
                    existing.examples.extend(pattern.examples.iter().cloned());
                    existing.examples.truncate(5);
                })
                .or_insert_with(|| pattern.clone());
        }
    }

    async fn llm_reflection(
        &self,
        provider: &dyn ChatProvider,
        plan: &Plan,
        results: &[TaskResult],
        _context: &Context,
    ) -> crate::error::Result<Vec<String>> {
        let failures: Vec<String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                format!(
                    "- {}: {}",
                    r.task_id,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        let prompt = format!(
            "Goal: {}\nTasks: {}\nFailures:\n{}\nSuggest up to three concrete improvements, \
             one per line.",
            plan.goal.description,
            plan.tasks
                .iter()
                .map(|t| t.description.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            failures.join("\n"),
        );

        let response = provider
            .generate(GenerateRequest::new(vec![Message::user(prompt)]))
            .await?;
        Ok(response
            .content
            .lines()
            .map(|line| line.trim_start_matches(['-', ' ', '*']).to_owned())
            .filter(|line| !line.is_empty())
            .take(3)
            .collect())
    }

    /// Derive insights from a finished episode and store them.
    pub fn learn_from_episode(&self, episode: &Episode, _context: &Context) -> Vec<Insight> {
        let mut new_insights = Vec::new();
        let now = Utc::now();

        // Tool effectiveness: success rate and mean latency per tool.
        let mut by_tool: HashMap<&str, Vec<&TaskResult>> = HashMap::new();
        for result in &episode.results {
            if let Some(task) = episode.plan.task(&result.task_id) {
                by_tool.entry(task.tool_name.as_str()).or_default().push(result);
            }
        }
        for (tool, results) in &by_tool {
            let successes = results.iter().filter(|r| r.success).count();
            let rate = successes as f64 / results.len() as f64;
            let avg_latency = results
                .iter()
                .map(|r| r.execution_time_seconds)
                .sum::<f64>()
                / results.len() as f64;
            new_insights.push(Insight {
                id: Uuid::new_v4().to_string(),
                category: InsightCategory::ToolEffectiveness,
                description: format!(
                    "tool '{tool}' succeeded {successes}/{} times (avg {avg_latency:.2}s)",
                    results.len()
                ),
                confidence: (0.3 + 0.15 * results.len() as f64).min(0.9),
                evidence: json!({
                    "tool": tool,
                    "success_rate": rate,
                    "avg_latency_seconds": avg_latency,
                    "samples": results.len(),
                }),
                created_at: now,
            });
        }

        // Failure mode: name the dominant category of a failed episode.
        if !episode.success {
            let mut counts: HashMap<FailureCategory, usize> = HashMap::new();
            for result in episode.results.iter().filter(|r| !r.success) {
                let category =
                    FailureCategory::from_error(result.error.as_deref().unwrap_or(""));
                *counts.entry(category).or_default() += 1;
            }
            if let Some((category, count)) = counts.into_iter().max_by_key(|(_, c)| *c) {
                new_insights.push(Insight {
                    id: Uuid::new_v4().to_string(),
                    category: InsightCategory::FailureMode,
                    description: format!(
                        "episode failed; dominant failure mode was {category} ({count} tasks)"
                    ),
                    confidence: 0.6,
                    evidence: json!({ "category": category, "count": count }),
                    created_at: now,
                });
            }
        }

        // Performance outliers: anything slower than 3x the median.
        let mut times: Vec<f64> = episode
            .results
            .iter()
            .map(|r| r.execution_time_seconds)
            .collect();
        times.sort_by(f64::total_cmp);
        if let Some(&median) = times.get(times.len() / 2)
            && median > 0.0
        {
            for result in &episode.results {
                if result.execution_time_seconds > 3.0 * median {
                    new_insights.push(Insight {
                        id: Uuid::new_v4().to_string(),
                        category: InsightCategory::Performance,
                        description: format!(
                            "task {} took {:.2}s, more than 3x the median of {median:.2}s",
                            result.task_id, result.execution_time_seconds
                        ),
                        confidence: 0.7,
                        evidence: json!({
                            "task_id": result.task_id,
                            "execution_time_seconds": result.execution_time_seconds,
                            "median_seconds": median,
                        }),
                        created_at: now,
                    });
                }
            }
        }

        self.insights
            .lock()
            .expect("reflector lock poisoned")
            .extend(new_insights.iter().cloned());
        new_insights
    }

    /// Query stored insights with optional category and confidence filters.
    #[must_use]
    pub fn insights(
        &self,
        category: Option<InsightCategory>,
        min_confidence: Option<f64>,
    ) -> Vec<Insight> {
        self.insights
            .lock()
            .expect("reflector lock poisoned")
            .iter()
            .filter(|i| category.is_none_or(|c| i.category == c))
            .filter(|i| min_confidence.is_none_or(|m| i.confidence >= m))
            .cloned()
            .collect()
    }

    /// Every failure pattern accumulated so far.
    #[must_use]
    pub fn failure_patterns(&self) -> Vec<FailurePattern> {
        self.patterns
            .lock()
            .expect("reflector lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Drop every stored insight and pattern.
    pub fn clear_learning_data(&self) {
        self.insights.lock().expect("reflector lock poisoned").clear();
        self.patterns.lock().expect("reflector lock poisoned").clear();
    }
}

impl std::fmt::Debug for Reflector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reflector")
            .field("llm_reflection", &self.config.enable_llm_reflection)
            .field(
                "insights",
                &self.insights.lock().expect("lock").len(),
            )
            .finish_non_exhaustive()
    }
}

/// Flag plans that are one long dependency chain.
fn detect_sequential_structure(plan: &Plan) -> Option<String> {
    let total = plan.tasks.len();
    if total < 6 {
        return None;
    }
    // Longest dependency chain, memoized over the DAG.
    let mut depth: HashMap<&str, usize> = HashMap::new();
    fn chain_depth<'a>(
        plan: &'a Plan,
        task: &'a Task,
        depth: &mut HashMap<&'a str, usize>,
    ) -> usize {
        if let Some(&d) = depth.get(task.id.as_str()) {
            return d;
        }
        let d = 1 + task
            .dependencies
            .iter()
            .filter_map(|dep| plan.task(dep))
            .map(|dep| chain_depth(plan, dep, depth))
            .max()
            .unwrap_or(0);
        depth.insert(task.id.as_str(), d);
        d
    }
    let longest = plan
        .tasks
        .iter()
        .map(|t| chain_depth(plan, t, &mut depth))
        .max()
        .unwrap_or(0);

    (longest >= 6 && longest == total).then(|| {
        format!("sequential: all {total} tasks form a single dependency chain")
    })
}
