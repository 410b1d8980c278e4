//! Three-state circuit breaker for protecting flaky operations.
//!
//! State machine: `Closed → Open → HalfOpen → Closed`.
//!
//! - **Closed**: consecutive failures are counted; the Nth consecutive
//!   failure opens the breaker. Any success resets the run.
//! - **Open**: calls are rejected immediately until `recovery_timeout`
//!   elapses, after which the next acquisition moves to `HalfOpen`.
//! - **HalfOpen**: exactly one trial call; success closes the breaker,
//!   failure re-opens it and restarts the timer.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{Error, Result};

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through; failures are counted.
    Closed,
    /// Calls are rejected without invoking the protected operation.
    Open,
    /// One trial call decides whether to close or re-open.
    HalfOpen,
}

/// A snapshot of breaker accounting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    /// The breaker's name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Lifetime successful calls.
    pub success_count: u64,
    /// Lifetime failed calls.
    pub failure_count: u64,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    success_count: u64,
    failure_count: u64,
    opened_at: Option<Instant>,
}

/// A named circuit breaker.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs_f64(config.recovery_timeout.max(0.0)),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                success_count: 0,
                failure_count: 0,
                opened_at: None,
            }),
        }
    }

    /// The breaker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, advancing `Open → HalfOpen` if the recovery timeout
    /// has elapsed.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.advance_if_recovered(&mut inner);
        inner.state
    }

    /// Gate a call: `Ok(())` admits it, an error rejects it.
    ///
    /// # Errors
    ///
    /// [`Error::CircuitBreakerOpen`] while the breaker is open and the
    /// recovery timeout has not yet elapsed.
    pub fn acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.advance_if_recovered(&mut inner);
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => Err(Error::CircuitBreakerOpen(self.name.clone())),
        }
    }

    fn advance_if_recovered(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.recovery_timeout)
        {
            debug!(breaker = %self.name, "recovery timeout elapsed, entering half-open");
            inner.state = CircuitState::HalfOpen;
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.success_count += 1;
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            debug!(breaker = %self.name, "trial call succeeded, closing");
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failure_count += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, opening"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "trial call failed, re-opening");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    /// Run `operation` under the breaker, recording the outcome.
    ///
    /// # Errors
    ///
    /// [`Error::CircuitBreakerOpen`] if rejected, otherwise whatever the
    /// operation returns.
    pub async fn call<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        self.acquire()?;
        match operation.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Force the breaker closed and reset the consecutive-failure run.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Snapshot the breaker's accounting.
    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        let state = self.state();
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerStats {
            name: self.name.clone(),
            state,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
