//! HTTP client for OpenAI-compatible chat completion endpoints.
//!
//! Works against OpenAI itself, Ollama's `/v1` endpoint, vLLM, and any
//! other server speaking the same wire format. Streaming uses the SSE
//! `data:` line protocol terminated by `[DONE]`.

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt as _;
use serde::{Deserialize, Serialize};

use super::{ChatProvider, GenerateRequest, GenerateResponse, TextStream, TokenUsage};
use crate::error::{Error, Result};
use crate::types::{Message, MessageRole};

/// Client for an OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a client for `model` at `base_url` (e.g.
    /// `http://localhost:11434/v1`).
    ///
    /// # Errors
    ///
    /// [`Error::Http`] if the underlying HTTP client cannot be built.
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(120.0))
            .build()?;
        Ok(Self {
            name: format!("openai-compat/{model}"),
            model,
            base_url: base_url.into(),
            api_key: None,
            client,
        })
    }

    /// Set the bearer API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the request timeout.
    ///
    /// # Errors
    ///
    /// [`Error::Http`] if the HTTP client cannot be rebuilt.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Set a custom provider name (used as the router stats key).
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn build_body(&self, request: &GenerateRequest, stream: bool) -> ChatCompletionBody {
        ChatCompletionBody {
            model: self.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: request.stop.clone(),
            stream,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_builder(&self, body: &ChatCompletionBody) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.endpoint()).json(body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let body = self.build_body(&request, false);
        let response = self.request_builder(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!(
                "{} returned {status}: {detail}",
                self.name
            )));
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("completion had no choices"))?;
        Ok(GenerateResponse {
            content: choice.message.content.unwrap_or_default(),
            model: completion.model.unwrap_or_else(|| self.model.clone()),
            usage: completion.usage.map(Into::into).unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }

    fn generate_stream(&self, request: GenerateRequest) -> TextStream {
        let body = self.build_body(&request, true);
        let builder = self.request_builder(&body);
        let name = self.name.clone();

        Box::pin(try_stream! {
            let response = builder.send().await?;
            let status = response.status();
            if !status.is_success() {
                Err(Error::provider(format!("{name} returned {status}")))?;
            }

            // SSE frames may split across network chunks; buffer until a
            // newline completes a line.
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    match parse_sse_line(line.trim()) {
                        SseLine::Content(text) => yield text,
                        SseLine::Done => return,
                        SseLine::Skip => {}
                        SseLine::Malformed(message) => {
                            Err(Error::provider(message))?;
                        }
                    }
                }
            }
        })
    }
}

/// The result of parsing one SSE line.
enum SseLine {
    Content(String),
    Done,
    Skip,
    Malformed(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data: ") else {
        return SseLine::Skip;
    };
    if data.trim() == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .map_or(SseLine::Skip, SseLine::Content),
        Err(err) => SseLine::Malformed(format!("failed to parse streaming chunk: {err}")),
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        Self {
            role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    choices: Vec<CompletionChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_content_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        match parse_sse_line(line) {
            SseLine::Content(text) => assert_eq!(text, "Hello"),
            _ => panic!("expected content"),
        }
    }

    #[test]
    fn test_parse_sse_done_and_noise() {
        assert!(matches!(parse_sse_line("data: [DONE]"), SseLine::Done));
        assert!(matches!(parse_sse_line(""), SseLine::Skip));
        assert!(matches!(parse_sse_line(": keep-alive"), SseLine::Skip));
        assert!(matches!(
            parse_sse_line("data: {not json"),
            SseLine::Malformed(_)
        ));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client =
            OpenAiCompatClient::new("llama2", "http://localhost:11434/v1/").expect("client");
        assert_eq!(
            client.endpoint(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_wire_message_roles() {
        let wire = WireMessage::from(&Message::user("hi"));
        assert_eq!(wire.role, "user");
        let wire = WireMessage::from(&Message::system("sys"));
        assert_eq!(wire.role, "system");
    }
}
