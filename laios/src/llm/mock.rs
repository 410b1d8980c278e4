//! Mock provider for testing.
//!
//! Returns predefined responses in sequence, cycling through them, and can
//! be scripted to fail a fixed number of leading calls — enough to exercise
//! router fallback and retry paths without a live endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt as _;

use super::{ChatProvider, GenerateRequest, GenerateResponse, TextStream, TokenUsage};
use crate::error::{Error, Result};

/// A canned-response provider.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    responses: Vec<String>,
    call_index: AtomicUsize,
    fail_first: usize,
}

impl MockProvider {
    /// Create a mock cycling through `responses`.
    #[must_use]
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            name: "mock".to_owned(),
            responses,
            call_index: AtomicUsize::new(0),
            fail_first: 0,
        }
    }

    /// Create a mock with a single fixed response.
    #[must_use]
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Set a custom provider name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fail the first `count` calls with a provider error.
    #[must_use]
    pub const fn failing_first(mut self, count: usize) -> Self {
        self.fail_first = count;
        self
    }

    /// Number of `generate` calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.call_index.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Result<String> {
        let index = self.call_index.fetch_add(1, Ordering::SeqCst);
        if index < self.fail_first {
            return Err(Error::provider(format!(
                "mock '{}' scripted failure #{}",
                self.name,
                index + 1
            )));
        }
        Ok(self
            .responses
            .get(index % self.responses.len().max(1))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse> {
        let content = self.next_response()?;
        Ok(GenerateResponse {
            content,
            model: "mock-model".to_owned(),
            usage: TokenUsage::default(),
            finish_reason: Some("stop".to_owned()),
        })
    }

    fn generate_stream(&self, _request: GenerateRequest) -> TextStream {
        // Split the canned response into word-sized chunks.
        match self.next_response() {
            Ok(content) => {
                let chunks: Vec<Result<String>> = content
                    .split_inclusive(' ')
                    .map(|chunk| Ok(chunk.to_owned()))
                    .collect();
                futures::stream::iter(chunks).boxed()
            }
            Err(err) => futures::stream::iter(vec![Err(err)]).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_cycles_responses() {
        let provider = MockProvider::new(vec!["first".to_owned(), "second".to_owned()]);
        let request = GenerateRequest::default();

        let r1 = provider.generate(request.clone()).await.expect("generate");
        assert_eq!(r1.content, "first");
        let r2 = provider.generate(request.clone()).await.expect("generate");
        assert_eq!(r2.content, "second");
        let r3 = provider.generate(request).await.expect("generate");
        assert_eq!(r3.content, "first");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_scripted_failures() {
        let provider = MockProvider::fixed("ok").failing_first(2);
        let request = GenerateRequest::default();

        assert!(provider.generate(request.clone()).await.is_err());
        assert!(provider.generate(request.clone()).await.is_err());
        let response = provider.generate(request).await.expect("third succeeds");
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn test_mock_stream_chunks_rejoin() {
        let provider = MockProvider::fixed("one two three");
        let chunks: Vec<String> = provider
            .generate_stream(GenerateRequest::default())
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|c| c.expect("chunk"))
            .collect();
        assert!(chunks.len() > 1);
        assert_eq!(chunks.join(""), "one two three");
    }
}
