//! The agent controller: sessions, chat, and the goal execution loop.
//!
//! [`AgentController`] owns the root container — tool registry, event bus,
//! plugin registry, LLM router, executor, planner, reflector, and memory —
//! and exposes the public runtime surface:
//!
//! - [`AgentController::create_session`] / [`AgentController::shutdown_session`]
//! - [`AgentController::process_message`] and its streaming sibling
//! - [`AgentController::execute_goal`] — plan, schedule, reflect, replan
//!   (bounded), and persist exactly one episode
//!
//! Goal execution never surfaces per-task failures as errors: the returned
//! [`GoalOutcome`] is always complete, with failures recorded per task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{Config, TrustLevel};
use crate::error::{Error, Result};
use crate::events::{EventBus, SESSION_ENDED, SESSION_STARTED};
use crate::execution::Executor;
use crate::hardening::{GracefulShutdown, HealthChecker, HealthStatus};
use crate::llm::{ChatProvider, GenerateRequest, LlmRouter, OpenAiCompatClient, RouterStrategy, TextStream};
use crate::memory::{InMemoryStore, Memory};
use crate::planner::Planner;
use crate::plugin::{Plugin, PluginContext, PluginRegistry};
use crate::reflector::Reflector;
use crate::tool::{Permission, ToolDefinition, ToolRegistry};
use crate::types::{
    Context, Episode, Goal, Message, Plan, PlanStatus, Session, TaskResult, TaskStatus,
};

const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful local-first assistant. Answer concisely and accurately.";

/// Decides whether a gated tool invocation may proceed.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Return `true` to approve running `tool` for the given task
    /// description within `session_id`.
    async fn approve(&self, session_id: &str, tool: &ToolDefinition, description: &str) -> bool;
}

/// The complete outcome of one goal execution.
#[derive(Debug, Clone, Serialize)]
pub struct GoalOutcome {
    /// The goal that was executed.
    pub goal: Goal,
    /// The final plan (after any replanning).
    pub plan: Plan,
    /// One result per task in the final plan.
    pub results: Vec<TaskResult>,
    /// Whether every task succeeded.
    pub success: bool,
    /// How many replanning iterations ran.
    pub replanning_attempts: u32,
    /// Id of the persisted episode, when memory storage succeeded.
    pub episode_id: Option<String>,
}

/// Snapshot of a session's state.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionState {
    /// Messages in the session context.
    pub message_count: usize,
    /// Whether an LLM provider is wired up.
    pub llm_available: bool,
    /// Whether reflection runs after plan execution.
    pub reflection_enabled: bool,
    /// Number of registered tools.
    pub tools_registered: usize,
}

/// The root runtime container and public API surface.
pub struct AgentController {
    config: Arc<Config>,
    tools: Arc<ToolRegistry>,
    events: Arc<EventBus>,
    plugins: Arc<PluginRegistry>,
    provider: Arc<dyn ChatProvider>,
    executor: Arc<Executor>,
    planner: Planner,
    reflector: Reflector,
    memory: Arc<dyn Memory>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    approval: Option<Arc<dyn ApprovalHandler>>,
    health: Arc<HealthChecker>,
    shutdown: Arc<GracefulShutdown>,
}

impl AgentController {
    /// Build a controller from configuration, constructing an
    /// OpenAI-compatible provider from the `llm` section.
    ///
    /// # Errors
    ///
    /// [`Error::Http`] if the HTTP provider cannot be constructed.
    pub fn new(config: Config) -> Result<Self> {
        let mut client = OpenAiCompatClient::new(&config.llm.model, &config.llm.base_url)?
            .with_timeout(std::time::Duration::from_secs_f64(config.llm.timeout))?
            .with_name(format!("{}/{}", config.llm.provider, config.llm.model));
        if let Some(ref key) = config.llm.api_key {
            client = client.with_api_key(key);
        }
        let router = LlmRouter::new(vec![Arc::new(client)], RouterStrategy::Fallback);
        Ok(Self::with_provider(config, Arc::new(router)))
    }

    /// Build a controller around an injected provider (a router, a single
    /// client, or a mock).
    #[must_use]
    pub fn with_provider(config: Config, provider: Arc<dyn ChatProvider>) -> Self {
        let config = Arc::new(config);
        let tools = Arc::new(ToolRegistry::new());
        for tool in crate::tools::default_toolbox() {
            // Registration of the fixed default set cannot collide.
            let _ = tools.register(tool);
        }
        let events = Arc::new(EventBus::new());
        let plugins = Arc::new(PluginRegistry::new(Arc::clone(&events)));
        let executor = Arc::new(Executor::new(
            &config,
            Arc::clone(&tools),
            Arc::clone(&plugins),
            Arc::clone(&events),
        ));
        let planner = Planner::new(Arc::clone(&provider), Arc::clone(&tools));
        let mut reflector = Reflector::new(config.reflection.clone());
        if config.reflection.enable_llm_reflection {
            reflector = reflector.with_provider(Arc::clone(&provider));
        }

        let health = Arc::new(HealthChecker::new());
        {
            let tools = Arc::clone(&tools);
            health.register(
                "tools",
                Arc::new(move || -> Result<(HealthStatus, String)> {
                    if tools.is_empty() {
                        Ok((HealthStatus::Degraded, "no tools registered".to_owned()))
                    } else {
                        Ok((HealthStatus::Healthy, format!("{} tools", tools.len())))
                    }
                }),
            );
        }

        let shutdown = Arc::new(GracefulShutdown::new());
        {
            let executor = Arc::clone(&executor);
            shutdown.register("executor", 10, move || {
                let executor = Arc::clone(&executor);
                Box::pin(async move {
                    executor.close().await;
                    Ok(())
                })
            });
            let plugins = Arc::clone(&plugins);
            shutdown.register("plugins", 20, move || {
                let plugins = Arc::clone(&plugins);
                Box::pin(async move {
                    plugins.unload_all().await;
                    Ok(())
                })
            });
            let events = Arc::clone(&events);
            shutdown.register("events", 30, move || {
                let events = Arc::clone(&events);
                Box::pin(async move {
                    events.clear_all();
                    Ok(())
                })
            });
        }

        Self {
            config,
            tools,
            events,
            plugins,
            provider,
            executor,
            planner,
            reflector,
            memory: Arc::new(InMemoryStore::new()),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            approval: None,
            health,
            shutdown,
        }
    }

    /// Replace the memory backend.
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = memory;
        self
    }

    /// Install the approval handler consulted by the trust gate.
    #[must_use]
    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Some(handler);
        self
    }

    /// The shared tool registry.
    #[must_use]
    pub fn tools(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.tools)
    }

    /// The shared event bus.
    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// The executor.
    #[must_use]
    pub fn executor(&self) -> Arc<Executor> {
        Arc::clone(&self.executor)
    }

    /// The reflector.
    #[must_use]
    pub const fn reflector(&self) -> &Reflector {
        &self.reflector
    }

    /// The memory backend.
    #[must_use]
    pub fn memory(&self) -> Arc<dyn Memory> {
        Arc::clone(&self.memory)
    }

    /// The health checker.
    #[must_use]
    pub fn health(&self) -> Arc<HealthChecker> {
        Arc::clone(&self.health)
    }

    /// Load plugins into the shared registry.
    ///
    /// # Errors
    ///
    /// [`Error::Dependency`] on cycles or missing dependencies; nothing
    /// from the batch loads in that case.
    pub async fn load_plugins(&self, batch: Vec<Arc<dyn Plugin>>) -> Result<()> {
        let context = PluginContext {
            tools: Arc::clone(&self.tools),
            events: Arc::clone(&self.events),
            config: Arc::clone(&self.config),
        };
        self.plugins.register_all(batch, &context).await
    }

    /// Create a new session for a user.
    pub async fn create_session(&self, user_id: impl Into<String>) -> Session {
        let session = Session::new(user_id);
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        self.events.emit(
            SESSION_STARTED,
            json!({ "session_id": session.id, "user_id": session.user_id }),
        );
        self.plugins
            .dispatch_session_start(&session.id, &session.user_id)
            .await;
        info!(session_id = %session.id, user_id = %session.user_id, "session created");
        session
    }

    /// Shut down a session; subsequent calls for its id are rejected.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the session does not exist.
    pub async fn shutdown_session(&self, session_id: &str) -> Result<()> {
        let removed = self.sessions.write().await.remove(session_id);
        let Some(mut session) = removed else {
            return Err(Error::session_not_found(session_id));
        };
        session.active = false;
        self.plugins.dispatch_session_end(session_id).await;
        self.events
            .emit(SESSION_ENDED, json!({ "session_id": session_id }));
        info!(session_id, "session shut down");
        Ok(())
    }

    /// A snapshot of a session.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the session does not exist.
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    /// A snapshot of session-level runtime state.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the session does not exist.
    pub async fn get_session_state(&self, session_id: &str) -> Result<SessionState> {
        let session = self.get_session(session_id).await?;
        Ok(SessionState {
            message_count: session.context.messages.len(),
            llm_available: true,
            reflection_enabled: self.config.agent.enable_reflection,
            tools_registered: self.tools.len(),
        })
    }

    /// Process one chat message and return the assistant's reply.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown session, or a provider error if
    /// generation fails (the user message stays appended either way).
    pub async fn process_message(&self, session_id: &str, text: &str) -> Result<String> {
        let text = self
            .plugins
            .dispatch_message(session_id, "user", text.to_owned())
            .await;

        let history = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| Error::session_not_found(session_id))?;
            session.context.messages.push(Message::user(&text));
            session.context.messages.clone()
        };

        let mut messages = vec![Message::system(CHAT_SYSTEM_PROMPT)];
        messages.extend(history);
        let request = GenerateRequest::new(messages)
            .with_temperature(self.config.llm.temperature)
            .with_max_tokens(self.config.llm.max_tokens);
        let response = self.provider.generate(request).await?;

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session
                .context
                .messages
                .push(Message::assistant(&response.content));
        }
        Ok(response.content)
    }

    /// Process one chat message as a lazy stream of text chunks.
    ///
    /// The assistant message is appended to the session context only when
    /// the stream is fully consumed; dropping the stream cancels the
    /// upstream generation.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown session.
    pub async fn process_message_stream(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<TextStream> {
        let text = self
            .plugins
            .dispatch_message(session_id, "user", text.to_owned())
            .await;

        let history = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| Error::session_not_found(session_id))?;
            session.context.messages.push(Message::user(&text));
            session.context.messages.clone()
        };

        let mut messages = vec![Message::system(CHAT_SYSTEM_PROMPT)];
        messages.extend(history);
        let request = GenerateRequest::new(messages)
            .with_temperature(self.config.llm.temperature)
            .with_max_tokens(self.config.llm.max_tokens);

        let mut upstream = self.provider.generate_stream(request);
        let sessions = Arc::clone(&self.sessions);
        let session_id = session_id.to_owned();

        Ok(Box::pin(async_stream::stream! {
            use futures::StreamExt as _;
            let mut assembled = String::new();
            while let Some(chunk) = upstream.next().await {
                match chunk {
                    Ok(text) => {
                        assembled.push_str(&text);
                        yield Ok(text);
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
            // Stream fully consumed: persist the assistant turn.
            let mut sessions = sessions.write().await;
            if let Some(session) = sessions.get_mut(&session_id) {
                session.context.messages.push(Message::assistant(assembled));
            }
        }))
    }

    /// Execute a goal end to end: plan, schedule, reflect, replan within
    /// the configured bound, and persist one episode.
    ///
    /// Per-task failures never surface as errors — the outcome is always
    /// complete, with failures recorded per task.
    ///
    /// # Errors
    ///
    /// Only for an unknown or closed session.
    pub async fn execute_goal(&self, session_id: &str, goal: Goal) -> Result<GoalOutcome> {
        let session = self.get_session(session_id).await?;
        let context = session.context.clone();

        let mut replanning_attempts = 0u32;
        let mut current: Option<(Plan, Vec<TaskResult>)> = None;

        loop {
            let planned = if replanning_attempts == 0 {
                self.planner.plan(&goal, &context).await
            } else {
                let (_, ref prior_results) =
                    *current.as_ref().expect("replanning has prior results");
                self.planner
                    .replan(
                        &goal,
                        prior_results,
                        &self.reflector.failure_patterns(),
                        &context,
                    )
                    .await
            };

            let mut plan = match planned {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(error = %err, "planning failed");
                    // No valid plan: resolve to a complete, failed outcome.
                    if let Some((plan, results)) = current {
                        return self
                            .finish_goal(session_id, goal, plan, results, replanning_attempts)
                            .await;
                    }
                    let mut abandoned = Plan::new(goal.clone());
                    abandoned.status = PlanStatus::Abandoned;
                    return self
                        .finish_goal(session_id, goal, abandoned, Vec::new(), replanning_attempts)
                        .await;
                }
            };

            self.apply_trust_gate(session_id, &mut plan).await;
            let results = self.executor.execute_plan(&mut plan, &context).await;

            let should_replan = if self.config.agent.enable_reflection {
                let evaluation = self
                    .reflector
                    .evaluate_plan(&plan, &results, &context)
                    .await;
                evaluation.should_replan
            } else {
                false
            };

            current = Some((plan, results));
            if should_replan && replanning_attempts < self.config.agent.max_replanning_attempts {
                replanning_attempts += 1;
                debug!(attempt = replanning_attempts, "replanning");
                continue;
            }

            let (plan, results) = current.expect("loop recorded an execution");
            return self
                .finish_goal(session_id, goal, plan, results, replanning_attempts)
                .await;
        }
    }

    async fn finish_goal(
        &self,
        session_id: &str,
        goal: Goal,
        mut plan: Plan,
        results: Vec<TaskResult>,
        replanning_attempts: u32,
    ) -> Result<GoalOutcome> {
        if plan.status == PlanStatus::Failed
            && replanning_attempts >= self.config.agent.max_replanning_attempts
            && replanning_attempts > 0
        {
            plan.status = PlanStatus::Abandoned;
        }
        let success = !results.is_empty() && results.iter().all(|r| r.success);

        let episode = Episode::new(session_id, plan.clone(), results.clone());
        if self.config.agent.enable_reflection {
            let context = Context::new(session_id, "");
            self.reflector.learn_from_episode(&episode, &context);
        }

        // Memory is best-effort: failures log and the outcome still returns.
        let episode_id = match self.memory.store_episode(episode).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(error = %err, "episode storage failed");
                None
            }
        };

        Ok(GoalOutcome {
            goal,
            plan,
            results,
            success,
            replanning_attempts,
            episode_id,
        })
    }

    /// Resolve the trust gate for every task in a plan. Denied tasks are
    /// failed up front with `error = "approval denied"`.
    async fn apply_trust_gate(&self, session_id: &str, plan: &mut Plan) {
        let trust = self.config.agent.trust_level;
        if trust == TrustLevel::Autonomous {
            return;
        }

        for task in &mut plan.tasks {
            let Some(tool) = self.tools.get(&task.tool_name) else {
                continue;
            };
            let definition = tool.definition();
            if !Self::needs_approval(trust, &definition) {
                continue;
            }

            let approved = match self.approval {
                Some(ref handler) => {
                    handler
                        .approve(session_id, &definition, &task.description)
                        .await
                }
                // No handler installed means nothing can approve the call.
                None => false,
            };
            if !approved {
                task.set_status(TaskStatus::Running);
                task.set_status(TaskStatus::Failed);
                task.error = Some("approval denied".to_owned());
                debug!(task_id = %task.id, tool = %task.tool_name, "trust gate denied task");
            }
        }
    }

    fn needs_approval(trust: TrustLevel, definition: &ToolDefinition) -> bool {
        match trust {
            TrustLevel::Autonomous => false,
            TrustLevel::Supervised => true,
            TrustLevel::Balanced => definition
                .required_permissions
                .iter()
                .any(|p| matches!(p, Permission::ShellExec | Permission::FilesystemWrite)),
        }
    }

    /// Run the graceful shutdown sequence: drain the executor, unload
    /// plugins, clear the bus. Returns `true` iff every handler succeeded;
    /// a second call returns `false`.
    pub async fn shutdown(&self) -> bool {
        let session_ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in session_ids {
            let _ = self.shutdown_session(&id).await;
        }
        self.shutdown.shutdown().await
    }
}

impl std::fmt::Debug for AgentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentController")
            .field("tools", &self.tools.len())
            .field("trust_level", &self.config.agent.trust_level)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use crate::types::MessageRole;
    use futures::StreamExt as _;
    use serde_json::Value;

    fn plan_json(text: &str) -> String {
        json!([{
            "description": "echo",
            "tool": "utility.echo",
            "parameters": {"text": text},
            "depends_on": []
        }])
        .to_string()
    }

    fn controller_with(responses: Vec<String>) -> AgentController {
        AgentController::with_provider(
            Config::default(),
            Arc::new(MockProvider::new(responses)),
        )
    }

    #[tokio::test]
    async fn test_session_echo_scenario() {
        let controller = controller_with(vec!["Hi there!".to_owned()]);
        let session = controller.create_session("u").await;

        let reply = controller
            .process_message(&session.id, "Hello")
            .await
            .expect("reply");
        assert_eq!(reply, "Hi there!");

        let session = controller.get_session(&session.id).await.expect("session");
        assert_eq!(session.context.messages.len(), 2);
        assert_eq!(session.context.messages[0].role, MessageRole::User);
        assert_eq!(session.context.messages[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_shutdown_session_rejects_new_work() {
        let controller = controller_with(vec!["x".to_owned()]);
        let session = controller.create_session("u").await;

        controller
            .shutdown_session(&session.id)
            .await
            .expect("shutdown");
        let err = controller
            .process_message(&session.id, "anyone home?")
            .await
            .expect_err("closed session");
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(controller.shutdown_session(&session.id).await.is_err());
    }

    #[tokio::test]
    async fn test_message_stream_appends_on_completion() {
        let controller = controller_with(vec!["streamed reply".to_owned()]);
        let session = controller.create_session("u").await;

        let stream = controller
            .process_message_stream(&session.id, "go")
            .await
            .expect("stream");
        let chunks: Vec<String> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|c| c.expect("chunk"))
            .collect();
        assert_eq!(chunks.join(""), "streamed reply");

        let session = controller.get_session(&session.id).await.expect("session");
        assert_eq!(session.context.messages.len(), 2);
        assert_eq!(session.context.messages[1].content, "streamed reply");
    }

    #[tokio::test]
    async fn test_execute_goal_end_to_end() {
        let controller = controller_with(vec![plan_json("hello goal")]);
        let session = controller.create_session("u").await;

        let outcome = controller
            .execute_goal(&session.id, Goal::new("say hello"))
            .await
            .expect("outcome");

        assert!(outcome.success);
        assert_eq!(outcome.results.len(), outcome.plan.tasks.len());
        assert_eq!(outcome.replanning_attempts, 0);
        assert_eq!(outcome.plan.status, PlanStatus::Completed);

        // Exactly one episode was persisted and round-trips.
        let episode_id = outcome.episode_id.expect("episode id");
        let episode = controller
            .memory()
            .get_episode(&episode_id)
            .await
            .expect("episode");
        assert!(episode.success);
    }

    #[tokio::test]
    async fn test_execute_goal_planning_failure_resolves_completely() {
        let controller = controller_with(vec!["not json".to_owned()]);
        let session = controller.create_session("u").await;

        let outcome = controller
            .execute_goal(&session.id, Goal::new("impossible"))
            .await
            .expect("outcome, not error");

        assert!(!outcome.success);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.plan.status, PlanStatus::Abandoned);
    }

    #[tokio::test]
    async fn test_execute_goal_replans_up_to_bound() {
        // Every plan references a tool that fails, so reflection keeps
        // recommending replanning until the bound stops it.
        let bad_plan = json!([{
            "description": "read missing file",
            "tool": "filesystem.read_file",
            "parameters": {"path": "/nonexistent/laios-test-file"},
            "depends_on": []
        }])
        .to_string();
        let controller = controller_with(vec![bad_plan]);
        let session = controller.create_session("u").await;

        let outcome = controller
            .execute_goal(&session.id, Goal::new("doomed"))
            .await
            .expect("outcome");

        assert!(!outcome.success);
        assert_eq!(
            outcome.replanning_attempts,
            Config::default().agent.max_replanning_attempts
        );
    }

    struct DenyAll;

    #[async_trait]
    impl ApprovalHandler for DenyAll {
        async fn approve(&self, _: &str, _: &ToolDefinition, _: &str) -> bool {
            false
        }
    }

    struct AllowAll;

    #[async_trait]
    impl ApprovalHandler for AllowAll {
        async fn approve(&self, _: &str, _: &ToolDefinition, _: &str) -> bool {
            true
        }
    }

    fn write_plan() -> String {
        json!([{
            "description": "write a file",
            "tool": "filesystem.write_file",
            "parameters": {"path": "/tmp/laios-trust-test.txt", "content": "x"},
            "depends_on": []
        }])
        .to_string()
    }

    #[tokio::test]
    async fn test_trust_gate_denial_fails_task() {
        let mut config = Config::default();
        config.agent.trust_level = TrustLevel::Balanced;
        config.agent.enable_reflection = false;
        let controller = AgentController::with_provider(
            config,
            Arc::new(MockProvider::fixed(write_plan())),
        )
        .with_approval_handler(Arc::new(DenyAll));
        let session = controller.create_session("u").await;

        let outcome = controller
            .execute_goal(&session.id, Goal::new("write something"))
            .await
            .expect("outcome");

        assert!(!outcome.success);
        assert_eq!(
            outcome.results[0].error.as_deref(),
            Some("approval denied")
        );
    }

    #[tokio::test]
    async fn test_trust_gate_approval_allows_task() {
        let mut config = Config::default();
        config.agent.trust_level = TrustLevel::Balanced;
        config.agent.enable_reflection = false;
        let controller = AgentController::with_provider(
            config,
            Arc::new(MockProvider::fixed(write_plan())),
        )
        .with_approval_handler(Arc::new(AllowAll));
        let session = controller.create_session("u").await;

        let outcome = controller
            .execute_goal(&session.id, Goal::new("write something"))
            .await
            .expect("outcome");
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_autonomous_trust_never_prompts() {
        let mut config = Config::default();
        config.agent.trust_level = TrustLevel::Autonomous;
        config.agent.enable_reflection = false;
        // No approval handler installed: autonomous mode must not need one.
        let controller = AgentController::with_provider(
            config,
            Arc::new(MockProvider::fixed(write_plan())),
        );
        let session = controller.create_session("u").await;

        let outcome = controller
            .execute_goal(&session.id, Goal::new("write something"))
            .await
            .expect("outcome");
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_session_state_snapshot() {
        let controller = controller_with(vec!["hi".to_owned()]);
        let session = controller.create_session("u").await;
        controller
            .process_message(&session.id, "hello")
            .await
            .expect("reply");

        let state = controller
            .get_session_state(&session.id)
            .await
            .expect("state");
        assert_eq!(state.message_count, 2);
        assert!(state.llm_available);
        assert!(state.tools_registered > 0);
    }

    #[tokio::test]
    async fn test_controller_shutdown_runs_once() {
        let controller = controller_with(vec!["x".to_owned()]);
        let session = controller.create_session("u").await;
        let _ = session;

        assert!(controller.shutdown().await);
        assert!(!controller.shutdown().await);
    }

    #[tokio::test]
    async fn test_plugin_message_chain_applies() {
        struct Upcase;

        #[async_trait]
        impl Plugin for Upcase {
            fn meta(&self) -> crate::plugin::PluginMeta {
                crate::plugin::PluginMeta::new("upcase", "1.0.0")
            }

            async fn on_message(
                &self,
                _session_id: &str,
                _role: &str,
                content: &str,
            ) -> Option<String> {
                Some(content.to_uppercase())
            }
        }

        let controller = controller_with(vec!["ok".to_owned()]);
        controller
            .load_plugins(vec![Arc::new(Upcase)])
            .await
            .expect("plugins");
        let session = controller.create_session("u").await;
        controller
            .process_message(&session.id, "hello")
            .await
            .expect("reply");

        let session = controller.get_session(&session.id).await.expect("session");
        assert_eq!(session.context.messages[0].content, "HELLO");
    }

    #[tokio::test]
    async fn test_goal_outcome_serializes() {
        let controller = controller_with(vec![plan_json("x")]);
        let session = controller.create_session("u").await;
        let outcome = controller
            .execute_goal(&session.id, Goal::new("serialize me"))
            .await
            .expect("outcome");

        let value: Value = serde_json::to_value(&outcome).expect("serialize");
        assert!(value["goal"]["description"].is_string());
        assert!(value["results"].is_array());
    }
}
