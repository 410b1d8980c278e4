//! LLM provider interface and routing.
//!
//! This module provides:
//! - [`ChatProvider`]: the core trait every provider implements
//! - [`GenerateRequest`] / [`GenerateResponse`]: the provider surface
//! - [`LlmRouter`]: fallback / round-robin routing across providers
//! - [`OpenAiCompatClient`]: an HTTP client for OpenAI-compatible
//!   endpoints (OpenAI itself, Ollama's `/v1`, vLLM, …)
//! - [`MockProvider`]: canned responses for tests
//!
//! The router implements [`ChatProvider`] itself, so anything that accepts
//! a provider accepts a router transparently.

mod mock;
mod openai;
mod router;

pub use mock::MockProvider;
pub use openai::OpenAiCompatClient;
pub use router::{LlmRouter, ProviderStats, RouterStrategy};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Message;

/// Token accounting for one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u32,
    /// Tokens produced by the model.
    pub output_tokens: u32,
}

/// A chat generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Conversation messages, oldest first.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl GenerateRequest {
    /// Create a request from a message list.
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the generation token cap.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A completed chat generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Generated text.
    pub content: String,
    /// Model that produced it.
    pub model: String,
    /// Token accounting, when the provider reports it.
    pub usage: TokenUsage,
    /// Why generation stopped (e.g. "stop", "length").
    pub finish_reason: Option<String>,
}

/// A lazy stream of generated text chunks.
///
/// Dropping the stream cancels the upstream generation.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Core trait for LLM providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider name, used as the stats key by the router.
    fn name(&self) -> &str;

    /// Generate a complete response.
    ///
    /// # Errors
    ///
    /// [`Error::Provider`](crate::Error::Provider) on timeouts, transport
    /// failures, or malformed provider output.
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;

    /// Generate a response as a stream of text chunks.
    fn generate_stream(&self, request: GenerateRequest) -> TextStream;
}
