//! Runtime configuration.
//!
//! All sections deserialize with serde and carry sensible defaults, so a
//! fully-default [`Config`] is usable out of the box. How the configuration
//! is loaded (file, environment, embedded) is the caller's concern.

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider settings.
    pub llm: LlmConfig,
    /// Agent controller settings.
    pub agent: AgentConfig,
    /// Reflection thresholds.
    pub reflection: ReflectionConfig,
    /// Hardening layer settings.
    pub hardening: HardeningConfig,
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider kind (e.g. "ollama", "openai").
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: String,
    /// API key, if the endpoint requires one.
    pub api_key: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Request timeout in seconds.
    pub timeout: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_owned(),
            model: "llama2".to_owned(),
            base_url: "http://localhost:11434/v1".to_owned(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 2048,
            timeout: 120.0,
        }
    }
}

/// How much human approval tool execution requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Never prompt.
    Autonomous,
    /// Prompt for tools requiring shell or filesystem-write permissions.
    #[default]
    Balanced,
    /// Prompt for every tool.
    Supervised,
}

/// Agent controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Approval policy for destructive tools.
    pub trust_level: TrustLevel,
    /// Whether to run the reflector after each plan execution.
    pub enable_reflection: bool,
    /// Upper bound on replanning iterations per goal.
    pub max_replanning_attempts: u32,
    /// Parallel worker count for the task scheduler.
    pub max_workers: usize,
    /// Default per-task timeout in seconds.
    pub default_task_timeout_seconds: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            trust_level: TrustLevel::default(),
            enable_reflection: true,
            max_replanning_attempts: 2,
            max_workers: 4,
            default_task_timeout_seconds: 60.0,
        }
    }
}

/// Reflection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Plan success rate below which replanning is recommended.
    pub min_success_rate: f64,
    /// A task slower than `multiplier * expected_time_seconds` is flagged.
    pub max_execution_time_multiplier: f64,
    /// Whether an incomplete plan always recommends replanning.
    pub require_all_tasks_complete: bool,
    /// Whether to inspect successful outputs for emptiness.
    pub check_output_quality: bool,
    /// Whether to ask the LLM for additional reflection suggestions.
    pub enable_llm_reflection: bool,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            min_success_rate: 0.8,
            max_execution_time_multiplier: 3.0,
            require_all_tasks_complete: false,
            check_output_quality: true,
            enable_llm_reflection: false,
        }
    }
}

/// Hardening layer settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardeningConfig {
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Rate limiter settings.
    pub rate_limit: RateLimitConfig,
    /// Input sanitizer settings.
    pub sanitizer: SanitizerConfig,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before a trial call is allowed.
    pub recovery_timeout: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: 30.0,
        }
    }
}

/// Token bucket rate limiter settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Refill rate per key, tokens per second.
    pub rate: f64,
    /// Bucket capacity per key.
    pub capacity: f64,
    /// Optional global refill rate, tokens per second.
    pub global_rate: Option<f64>,
    /// Optional global bucket capacity.
    pub global_capacity: Option<f64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: 10.0,
            capacity: 20.0,
            global_rate: None,
            global_capacity: None,
        }
    }
}

/// Input sanitizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Inputs longer than this are rejected.
    pub max_input_length: usize,
    /// Path prefixes that are never readable or writable.
    pub blocked_paths: Vec<String>,
    /// URL schemes the sanitizer accepts.
    pub allowed_url_schemes: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_input_length: 10_000,
            blocked_paths: vec![
                "/etc/shadow".to_owned(),
                "/etc/passwd".to_owned(),
                "/root/.ssh".to_owned(),
            ],
            allowed_url_schemes: vec!["http".to_owned(), "https".to_owned()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_usable() {
        let config = Config::default();
        assert_eq!(config.agent.max_workers, 4);
        assert_eq!(config.agent.trust_level, TrustLevel::Balanced);
        assert!(config.hardening.rate_limit.global_rate.is_none());
    }

    #[test]
    fn test_config_deserializes_partial_input() {
        let config: Config = serde_json::from_str(
            r#"{"agent": {"max_workers": 8}, "llm": {"model": "gemma3:4b"}}"#,
        )
        .expect("partial config should deserialize");
        assert_eq!(config.agent.max_workers, 8);
        assert_eq!(config.llm.model, "gemma3:4b");
        // Untouched sections fall back to defaults.
        assert!((config.reflection.min_success_rate - 0.8).abs() < f64::EPSILON);
    }
}
