//! Error types for the laios runtime.
//!
//! Every failure a component can surface is a variant of [`Error`]. The
//! executor converts tool, timeout, and sanitization failures into
//! [`TaskResult`](crate::types::TaskResult) records rather than letting them
//! escape; the controller does the same for planning failures. Only genuinely
//! unrecoverable conditions (missing session, closed runtime) propagate to
//! the caller.

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for runtime operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Parameters failed schema or value validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A tool, task, session, or check was looked up by a name that does
    /// not exist.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What kind of entity was missing (e.g. "tool", "session").
        kind: &'static str,
        /// The name or id that failed to resolve.
        name: String,
    },

    /// The trust gate or a permission check refused the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A tool body reported failure.
    #[error("tool '{tool_name}' failed: {message}")]
    ToolExecution {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("timeout after {seconds}s")]
    Timeout {
        /// The deadline that was exceeded, in seconds.
        seconds: f64,
    },

    /// The operation was cancelled before or during execution.
    #[error("cancelled")]
    Cancelled,

    /// A circuit breaker is open and rejected the call without invoking it.
    #[error("circuit breaker '{0}' is open")]
    CircuitBreakerOpen(String),

    /// A token bucket was exhausted.
    #[error("rate limit exceeded for '{0}'")]
    RateLimitExceeded(String),

    /// Input was rejected by the sanitizer.
    #[error("sanitization error: {0}")]
    Sanitization(String),

    /// The planner could not produce a valid plan.
    #[error("planning error: {0}")]
    Planning(String),

    /// A plugin dependency cycle or missing dependency.
    #[error("plugin dependency error: {0}")]
    Dependency(String),

    /// An LLM provider or network failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a [`Error::NotFound`] for a tool name.
    #[must_use]
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "tool",
            name: name.into(),
        }
    }

    /// Create a [`Error::NotFound`] for a session id.
    #[must_use]
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "session",
            name: id.into(),
        }
    }

    /// Create a new tool execution error.
    #[must_use]
    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new provider error.
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    /// Create a new planning error.
    #[must_use]
    pub fn planning(message: impl Into<String>) -> Self {
        Self::Planning(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` if this error represents a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if this error came from an open circuit breaker.
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitBreakerOpen(_))
    }
}
