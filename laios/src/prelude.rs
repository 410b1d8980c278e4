//! Convenience re-exports for the common runtime surface.
//!
//! ```rust,ignore
//! use laios::prelude::*;
//! ```

pub use crate::agent::{AgentController, ApprovalHandler, GoalOutcome, SessionState};
pub use crate::config::{Config, TrustLevel};
pub use crate::error::{Error, Result};
pub use crate::events::{Event, EventBus};
pub use crate::execution::{Executor, ProgressStatus, ProgressUpdate, RetryOptions};
pub use crate::hardening::{
    CircuitBreaker, CircuitState, GracefulShutdown, HealthChecker, HealthStatus, InputSanitizer,
    RateLimiter,
};
pub use crate::llm::{
    ChatProvider, GenerateRequest, GenerateResponse, LlmRouter, MockProvider, OpenAiCompatClient,
    RouterStrategy, TextStream,
};
pub use crate::memory::{InMemoryStore, Memory};
pub use crate::planner::Planner;
pub use crate::plugin::{Plugin, PluginContext, PluginMeta, PluginRegistry};
pub use crate::reflector::{
    FailureCategory, FailurePattern, Insight, InsightCategory, Reflector,
};
pub use crate::tool::{
    Permission, Tool, ToolCategory, ToolDefinition, ToolOutput, ToolRegistry,
};
pub use crate::types::{
    Context, Episode, Goal, Message, MessageRole, Plan, PlanStatus, Session, Task, TaskResult,
    TaskStatus,
};
