//! Health probes and readiness/liveness roll-ups.
//!
//! Named probes run on demand; the overall status is the worst status any
//! probe reports. A probe that errors yields `Unhealthy` with the error
//! message, as does asking for a probe that was never registered.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// Probe verdict, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational with degraded capacity.
    Degraded,
    /// Not operational.
    Unhealthy,
}

/// The result of running one probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Probe name.
    pub name: String,
    /// Probe verdict.
    pub status: HealthStatus,
    /// Human-readable detail.
    pub message: String,
    /// How long the probe took.
    pub latency_ms: f64,
    /// When the probe ran.
    pub checked_at: DateTime<Utc>,
}

/// A health probe.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Run the probe, returning a status and message.
    ///
    /// # Errors
    ///
    /// An error is reported as `Unhealthy` with the error message.
    async fn probe(&self) -> Result<(HealthStatus, String)>;
}

/// Blanket probe over an async-compatible closure returning a verdict.
#[async_trait]
impl<F> HealthProbe for F
where
    F: Fn() -> Result<(HealthStatus, String)> + Send + Sync,
{
    async fn probe(&self) -> Result<(HealthStatus, String)> {
        self()
    }
}

/// Registry of named probes.
#[derive(Default)]
pub struct HealthChecker {
    probes: RwLock<HashMap<String, Arc<dyn HealthProbe>>>,
}

impl HealthChecker {
    /// Create an empty checker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a probe under a name, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, probe: Arc<dyn HealthProbe>) {
        self.probes
            .write()
            .expect("health checker lock poisoned")
            .insert(name.into(), probe);
    }

    /// Remove a probe. Returns `true` if it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.probes
            .write()
            .expect("health checker lock poisoned")
            .remove(name)
            .is_some()
    }

    /// Run one probe by name.
    ///
    /// An unknown name and a probe error both yield `Unhealthy`.
    pub async fn check(&self, name: &str) -> HealthCheck {
        let probe = self
            .probes
            .read()
            .expect("health checker lock poisoned")
            .get(name)
            .map(Arc::clone);

        let started = Instant::now();
        let (status, message) = match probe {
            Some(probe) => match probe.probe().await {
                Ok((status, message)) => (status, message),
                Err(err) => (HealthStatus::Unhealthy, err.to_string()),
            },
            None => (
                HealthStatus::Unhealthy,
                format!("unknown health check '{name}'"),
            ),
        };

        HealthCheck {
            name: name.to_owned(),
            status,
            message,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            checked_at: Utc::now(),
        }
    }

    /// Run every registered probe.
    pub async fn check_all(&self) -> Vec<HealthCheck> {
        let names: Vec<String> = {
            let probes = self.probes.read().expect("health checker lock poisoned");
            let mut names: Vec<String> = probes.keys().cloned().collect();
            names.sort();
            names
        };
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            results.push(self.check(&name).await);
        }
        results
    }

    /// Worst status across all probes; `Healthy` when none are registered.
    pub async fn overall(&self) -> HealthStatus {
        self.check_all()
            .await
            .into_iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// `true` iff every probe reports `Healthy`.
    pub async fn is_ready(&self) -> bool {
        self.overall().await == HealthStatus::Healthy
    }

    /// `true` iff no probe reports `Unhealthy`.
    pub async fn is_alive(&self) -> bool {
        self.overall().await != HealthStatus::Unhealthy
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let probes = self.probes.read().expect("health checker lock poisoned");
        f.debug_struct("HealthChecker")
            .field("probes", &probes.len())
            .finish()
    }
}
