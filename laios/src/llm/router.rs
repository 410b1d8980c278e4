//! Provider routing with fallback and round-robin strategies.
//!
//! The router wraps an ordered provider list and is itself a
//! [`ChatProvider`], so it is drop-in substitutable anywhere a single
//! provider is expected.
//!
//! - **Fallback**: always try the first provider; on failure move to the
//!   next, surfacing the first success or the last error.
//! - **Round-robin**: rotate through providers with a monotonic counter;
//!   a failure surfaces immediately without falling back.
//!
//! Every call and every failure is accounted per provider and exposed via
//! [`LlmRouter::usage_stats`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use super::{ChatProvider, GenerateRequest, GenerateResponse, TextStream};
use crate::error::{Error, Result};

/// How the router picks a provider for each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouterStrategy {
    /// Try providers in order until one succeeds.
    #[default]
    Fallback,
    /// Rotate through providers; no automatic fallback.
    RoundRobin,
}

/// Per-provider call accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStats {
    /// Total calls routed to this provider.
    pub calls: u64,
    /// Calls that surfaced an error.
    pub errors: u64,
}

/// Routes generation requests across an ordered list of providers.
pub struct LlmRouter {
    providers: Vec<Arc<dyn ChatProvider>>,
    strategy: RouterStrategy,
    counter: AtomicUsize,
    stats: Mutex<HashMap<String, ProviderStats>>,
}

impl LlmRouter {
    /// Create a router over `providers` with the given strategy.
    ///
    /// # Panics
    ///
    /// Panics if `providers` is empty — a router with nothing to route to
    /// is a construction bug, not a runtime condition.
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>, strategy: RouterStrategy) -> Self {
        assert!(!providers.is_empty(), "router requires at least one provider");
        let stats = providers
            .iter()
            .map(|p| (p.name().to_owned(), ProviderStats::default()))
            .collect();
        Self {
            providers,
            strategy,
            counter: AtomicUsize::new(0),
            stats: Mutex::new(stats),
        }
    }

    /// Per-provider `{calls, errors}` counters.
    #[must_use]
    pub fn usage_stats(&self) -> HashMap<String, ProviderStats> {
        self.stats.lock().expect("router stats lock poisoned").clone()
    }

    /// Number of wrapped providers.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    fn record_call(&self, provider: &str) {
        let mut stats = self.stats.lock().expect("router stats lock poisoned");
        stats.entry(provider.to_owned()).or_default().calls += 1;
    }

    fn record_error(&self, provider: &str) {
        let mut stats = self.stats.lock().expect("router stats lock poisoned");
        stats.entry(provider.to_owned()).or_default().errors += 1;
    }

    fn next_round_robin(&self) -> &Arc<dyn ChatProvider> {
        let k = self.counter.fetch_add(1, Ordering::Relaxed);
        &self.providers[k % self.providers.len()]
    }

    async fn generate_fallback(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let mut last_error = Error::provider("no providers configured");
        for provider in &self.providers {
            self.record_call(provider.name());
            match provider.generate(request.clone()).await {
                Ok(response) => {
                    debug!(provider = provider.name(), "fallback route succeeded");
                    return Ok(response);
                }
                Err(err) => {
                    warn!(provider = provider.name(), error = %err, "provider failed, trying next");
                    self.record_error(provider.name());
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn generate_round_robin(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let provider = self.next_round_robin();
        self.record_call(provider.name());
        match provider.generate(request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.record_error(provider.name());
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ChatProvider for LlmRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        match self.strategy {
            RouterStrategy::Fallback => self.generate_fallback(request).await,
            RouterStrategy::RoundRobin => self.generate_round_robin(request).await,
        }
    }

    fn generate_stream(&self, request: GenerateRequest) -> TextStream {
        // Streaming picks one provider up front; fallback mid-stream would
        // replay partial output to the consumer.
        let provider = match self.strategy {
            RouterStrategy::Fallback => &self.providers[0],
            RouterStrategy::RoundRobin => self.next_round_robin(),
        };
        self.record_call(provider.name());
        provider.generate_stream(request)
    }
}

impl std::fmt::Debug for LlmRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmRouter")
            .field("strategy", &self.strategy)
            .field("providers", &self.providers.len())
            .finish_non_exhaustive()
    }
}
