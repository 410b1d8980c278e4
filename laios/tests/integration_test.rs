//! Integration tests for the laios runtime.

#![allow(clippy::unwrap_used, clippy::panic, clippy::clone_on_ref_ptr)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use laios::prelude::*;
use serde_json::{Value, json};

/// A tool that sleeps for the requested number of seconds.
#[derive(Debug, Clone, Copy, Default)]
struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("test.sleep", "Sleeps then succeeds", ToolCategory::Utility)
            .with_parameters(json!({
                "type": "object",
                "properties": {
                    "seconds": {"type": "number", "description": "How long to sleep"}
                },
                "required": []
            }))
    }

    async fn execute(&self, params: Value) -> ToolOutput {
        let seconds = params
            .get("seconds")
            .and_then(Value::as_f64)
            .unwrap_or(10.0);
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        ToolOutput::ok("slept")
    }
}

/// A tool that counts invocations and fails a scripted number of times.
#[derive(Debug)]
struct CountingTool {
    calls: Arc<AtomicUsize>,
    fail_first: usize,
}

#[async_trait]
impl Tool for CountingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("test.counting", "Counts calls", ToolCategory::Utility)
    }

    async fn execute(&self, _params: Value) -> ToolOutput {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            ToolOutput::fail("simulated failure")
        } else {
            ToolOutput::ok(json!({ "call": call + 1 }))
        }
    }
}

/// A plugin that injects a marker into every task's parameters.
struct ParamModifier;

#[async_trait]
impl Plugin for ParamModifier {
    fn meta(&self) -> PluginMeta {
        PluginMeta::new("param_modifier", "1.0.0")
            .with_description("injects a marker into task parameters")
    }

    async fn on_before_task(
        &self,
        _task_id: &str,
        _tool_name: &str,
        params: &Value,
    ) -> Option<Value> {
        let mut updated = params.clone();
        if let Some(obj) = updated.as_object_mut() {
            obj.insert("injected_by".to_owned(), json!("param_modifier"));
        }
        Some(updated)
    }
}

/// A tool that echoes its parameters back, for observing plugin rewrites.
#[derive(Debug, Clone, Copy, Default)]
struct ParamsEchoTool;

#[async_trait]
impl Tool for ParamsEchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "test.params_echo",
            "Returns the parameters it received",
            ToolCategory::Utility,
        )
    }

    async fn execute(&self, params: Value) -> ToolOutput {
        ToolOutput::ok(params)
    }
}

fn controller(responses: Vec<String>) -> AgentController {
    AgentController::with_provider(Config::default(), Arc::new(MockProvider::new(responses)))
}

#[tokio::test]
async fn test_session_echo_flow() {
    let agent = controller(vec!["Hello from the assistant!".to_owned()]);
    let session = agent.create_session("u").await;

    let reply = agent.process_message(&session.id, "Hello").await.unwrap();
    assert_eq!(reply, "Hello from the assistant!");

    let session = agent.get_session(&session.id).await.unwrap();
    assert_eq!(session.context.messages.len(), 2);
    assert_eq!(session.context.messages[0].role, MessageRole::User);
    assert_eq!(session.context.messages[1].role, MessageRole::Assistant);
}

#[tokio::test]
async fn test_timeout_scenario() {
    let agent = controller(vec!["unused".to_owned()]);
    agent.tools().register(Arc::new(SleepTool)).unwrap();

    let mut task = Task::new("plan", "sleep forever", "test.sleep", json!({"seconds": 10.0}));
    let context = Context::new("s", "u");
    let result = agent
        .executor()
        .execute_task(
            &mut task,
            &context,
            Some(Duration::from_millis(500)),
            None,
        )
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("timeout"));
    assert_eq!(task.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_retry_success_scenario() {
    let agent = controller(vec!["unused".to_owned()]);
    let calls = Arc::new(AtomicUsize::new(0));
    agent
        .tools()
        .register(Arc::new(CountingTool {
            calls: Arc::clone(&calls),
            fail_first: 1,
        }))
        .unwrap();

    let mut task = Task::new("plan", "flaky", "test.counting", json!({}));
    let context = Context::new("s", "u");
    let result = agent
        .executor()
        .execute_with_retry(
            &mut task,
            &context,
            RetryOptions {
                max_retries: 2,
                retry_delay: 0.05,
                backoff_multiplier: 2.0,
                jitter: false,
            },
        )
        .await;

    assert!(result.success);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_circuit_breaker_flip_scenario() {
    let breaker = CircuitBreaker::new(
        "flip",
        laios::config::CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: 0.1,
        },
    );

    // Three failing calls open the breaker.
    for _ in 0..3 {
        let result: laios::Result<()> = breaker
            .call(async { Err(laios::Error::internal("boom")) })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // The next call is rejected without invoking the body.
    let invoked = AtomicUsize::new(0);
    let result: laios::Result<()> = breaker
        .call(async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(laios::Error::CircuitBreakerOpen(_))));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    // After the recovery timeout: half-open, one success closes it.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_plugin_param_rewrite_scenario() {
    let agent = controller(vec!["unused".to_owned()]);
    agent.tools().register(Arc::new(ParamsEchoTool)).unwrap();
    agent
        .load_plugins(vec![Arc::new(ParamModifier)])
        .await
        .unwrap();

    let mut task = Task::new(
        "plan",
        "observe params",
        "test.params_echo",
        json!({"original": "value"}),
    );
    let context = Context::new("s", "u");
    let result = agent
        .executor()
        .execute_task(&mut task, &context, None, None)
        .await;

    // The tool body received both the original params and the injection.
    let output = result.output.unwrap();
    assert_eq!(output["original"], "value");
    assert_eq!(output["injected_by"], "param_modifier");
}

#[tokio::test]
async fn test_plan_with_dependency_failure_scenario() {
    let plan_json = json!([
        {
            "description": "t1 reads a missing file",
            "tool": "filesystem.read_file",
            "parameters": {"path": "/nonexistent/laios-integration-test"},
            "depends_on": []
        },
        {
            "description": "t2 depends on t1",
            "tool": "utility.echo",
            "parameters": {"text": "after t1"},
            "depends_on": [0]
        },
        {
            "description": "t3 is independent",
            "tool": "utility.echo",
            "parameters": {"text": "independent"},
            "depends_on": []
        }
    ])
    .to_string();

    let mut config = Config::default();
    config.agent.enable_reflection = false;
    let agent =
        AgentController::with_provider(config, Arc::new(MockProvider::fixed(plan_json)));
    let session = agent.create_session("u").await;

    let outcome = agent
        .execute_goal(&session.id, Goal::new("doomed chain"))
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.results.len(), 3);

    let t2 = &outcome.plan.tasks[1];
    assert_eq!(t2.status, TaskStatus::Cancelled);
    assert_eq!(t2.error.as_deref(), Some("dependency failed"));

    let t3 = &outcome.plan.tasks[2];
    assert_eq!(t3.status, TaskStatus::Completed);

    // Exactly one episode stored, and it round-trips.
    let episode_id = outcome.episode_id.unwrap();
    let episode = agent.memory().get_episode(&episode_id).await.unwrap();
    assert_eq!(episode.results.len(), 3);
    assert!(!episode.success);
}

#[tokio::test]
async fn test_goal_execution_with_reflection_and_insights() {
    let plan_json = json!([{
        "description": "classify sentiment",
        "tool": "text.sentiment",
        "parameters": {"text": "what a great and wonderful day"},
        "depends_on": []
    }])
    .to_string();

    let agent = controller(vec![plan_json]);
    let session = agent.create_session("u").await;

    let outcome = agent
        .execute_goal(&session.id, Goal::new("how positive is this?"))
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.results.len(), 1);
    let output = outcome.results[0].output.clone().unwrap();
    assert_eq!(output["label"], "positive");

    // Reflection learned a tool-effectiveness insight from the episode.
    let insights = agent
        .reflector()
        .insights(Some(InsightCategory::ToolEffectiveness), None);
    assert!(!insights.is_empty());
}

#[tokio::test]
async fn test_event_bus_records_task_lifecycle() {
    let agent = controller(vec!["unused".to_owned()]);
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = Arc::clone(&seen);
    agent.events().subscribe("task.*", move |_| {
        seen_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let mut task = Task::new("plan", "echo", "utility.echo", json!({"text": "x"}));
    let context = Context::new("s", "u");
    agent
        .executor()
        .execute_task(&mut task, &context, None, None)
        .await;

    // started + completed
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    let history = agent.events().history(Some("task.*"), None);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].name, "task.started");
    assert_eq!(history[1].name, "task.completed");
}

#[tokio::test]
async fn test_streaming_chat_round_trip() {
    use futures::StreamExt as _;

    let agent = controller(vec!["one two three four".to_owned()]);
    let session = agent.create_session("u").await;

    let stream = agent
        .process_message_stream(&session.id, "count")
        .await
        .unwrap();
    let chunks: Vec<String> = stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|c| c.unwrap())
        .collect();

    assert!(chunks.len() > 1);
    assert_eq!(chunks.join(""), "one two three four");

    let session = agent.get_session(&session.id).await.unwrap();
    assert_eq!(session.context.messages.len(), 2);
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let agent = Arc::new(controller(vec![
        "reply-a".to_owned(),
        "reply-b".to_owned(),
    ]));
    let session_a = agent.create_session("alice").await;
    let session_b = agent.create_session("bob").await;

    let (ra, rb) = tokio::join!(
        agent.process_message(&session_a.id, "hi from a"),
        agent.process_message(&session_b.id, "hi from b"),
    );
    ra.unwrap();
    rb.unwrap();

    let a = agent.get_session(&session_a.id).await.unwrap();
    let b = agent.get_session(&session_b.id).await.unwrap();
    assert_eq!(a.context.messages.len(), 2);
    assert_eq!(b.context.messages.len(), 2);
    assert_eq!(a.context.messages[0].content, "hi from a");
    assert_eq!(b.context.messages[0].content, "hi from b");
}
